//! Deterministic pre-send message compaction.
//!
//! Before a request leaves the client, an oversized message list is reduced
//! without an LLM round-trip: the leading system message and the last four
//! messages survive verbatim, the discarded middle is folded into a single
//! synthetic digest, and any single message still over the per-message cap
//! is cut with a marker.

use sov_domain::message::{Message, Role};

/// Per-message hard cap applied after list-level compaction.
const SINGLE_MESSAGE_CAP: usize = 30_000;
/// How many of the discarded middle messages contribute digest bullets.
const DIGEST_SOURCE_COUNT: usize = 6;

/// Total characters across the list.
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.content.len()).sum()
}

/// Compact `messages` to fit `max_chars`. Returns the input unchanged when
/// it already fits.
pub fn compact_messages(messages: &[Message], max_chars: usize) -> Vec<Message> {
    if total_chars(messages) <= max_chars {
        return messages.to_vec();
    }

    tracing::warn!(
        total_chars = total_chars(messages),
        max_chars,
        "compacting oversized message list before send"
    );

    // Too few messages to drop any: split the budget across them.
    if messages.len() <= 3 {
        let per_message = max_chars / messages.len().max(1);
        return messages
            .iter()
            .map(|m| {
                let mut m = m.clone();
                m.content = truncate_at_char_boundary(&m.content, per_message).to_string();
                m
            })
            .collect();
    }

    let mut result = vec![messages[0].clone()];

    let middle = &messages[1..messages.len() - 4];
    let recent = &messages[messages.len() - 4..];

    if !middle.is_empty() {
        let digest = digest_messages(middle);
        if !digest.is_empty() {
            result.push(Message::system(format!(
                "[Earlier conversation summary]\n{digest}"
            )));
        }
    }

    result.extend(recent.iter().cloned());

    // Final safety: cap any single message that is still enormous.
    for msg in &mut result {
        if msg.content.len() > SINGLE_MESSAGE_CAP {
            let cut = truncate_at_char_boundary(&msg.content, SINGLE_MESSAGE_CAP);
            msg.content = format!("{cut}\n[...truncated...]");
        }
    }

    result
}

/// Bullet digest of the last few discarded messages.
fn digest_messages(middle: &[Message]) -> String {
    let start = middle.len().saturating_sub(DIGEST_SOURCE_COUNT);
    let mut parts = Vec::new();

    for msg in &middle[start..] {
        match msg.role {
            Role::User => {
                let preview = truncate_at_char_boundary(&msg.content, 200);
                parts.push(format!("User: {preview}..."));
            }
            Role::Assistant => {
                if msg.content.contains("<tool") {
                    parts.push("Assistant: [executed tools]".to_string());
                } else {
                    let preview = truncate_at_char_boundary(&msg.content, 100);
                    parts.push(format!("Assistant: {preview}..."));
                }
            }
            Role::System => {}
        }
    }

    parts.join("\n")
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
pub(crate) fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message::new(role, content)
    }

    #[test]
    fn no_compaction_when_under_limit() {
        let messages = vec![msg(Role::System, "sys"), msg(Role::User, "hello")];
        let out = compact_messages(&messages, 1000);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].content, "hello");
    }

    #[test]
    fn keeps_first_and_last_four() {
        let mut messages = vec![msg(Role::System, &"s".repeat(100))];
        for i in 0..10 {
            messages.push(msg(Role::User, &format!("user message {i} {}", "x".repeat(200))));
            messages.push(msg(Role::Assistant, &format!("reply {i} {}", "y".repeat(200))));
        }

        let out = compact_messages(&messages, 1500);

        // system + digest + last 4
        assert_eq!(out.len(), 6);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].role, Role::System);
        assert!(out[1].content.starts_with("[Earlier conversation summary]"));
        let originals = &messages[messages.len() - 4..];
        for (kept, original) in out[2..].iter().zip(originals) {
            assert_eq!(kept.content, original.content);
        }
    }

    #[test]
    fn digest_marks_tool_bearing_assistant_messages() {
        let mut messages = vec![msg(Role::System, "sys")];
        for _ in 0..8 {
            messages.push(msg(Role::User, &"q".repeat(300)));
            messages.push(msg(
                Role::Assistant,
                "<tool name=\"read_file\"><param name=\"path\">/a</param></tool>",
            ));
        }

        let out = compact_messages(&messages, 1200);
        let digest = &out[1].content;
        assert!(digest.contains("Assistant: [executed tools]"));
    }

    #[test]
    fn tiny_lists_split_the_budget() {
        let messages = vec![
            msg(Role::System, &"a".repeat(5000)),
            msg(Role::User, &"b".repeat(5000)),
        ];
        let out = compact_messages(&messages, 4000);
        assert_eq!(out.len(), 2);
        assert!(out[0].content.len() <= 2000);
        assert!(out[1].content.len() <= 2000);
    }

    #[test]
    fn oversized_survivor_is_capped_with_marker() {
        let mut messages = vec![msg(Role::System, "sys")];
        for _ in 0..6 {
            messages.push(msg(Role::User, &"u".repeat(100)));
        }
        messages.push(msg(Role::User, &"z".repeat(40_000)));

        let out = compact_messages(&messages, 10_000);
        let last = out.last().unwrap();
        assert!(last.content.len() <= SINGLE_MESSAGE_CAP + 32);
        assert!(last.content.ends_with("[...truncated...]"));
    }

    #[test]
    fn truncate_respects_utf8_boundaries() {
        let s = "héllo";
        // Byte 2 lands inside the two-byte 'é'.
        assert_eq!(truncate_at_char_boundary(s, 2), "h");
        assert_eq!(truncate_at_char_boundary(s, 100), "héllo");
    }
}
