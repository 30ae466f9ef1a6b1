//! Context window management.
//!
//! Prompt assembly works over an unordered bag of priority-tagged blocks.
//! Selection is greedy by priority under a token budget; a critical block
//! that does not fit is truncated at a sentence boundary rather than
//! dropped. Emission rebuilds the chat-message shape: one system message
//! (with retrieved context and summary folded in), then history in arrival
//! order, then recent tool results.
//!
//! Token counts here are estimates (`⌈chars/4⌉`); the LLM client remains
//! the final authority on truncation.

use regex::Regex;

use sov_domain::config::ContextConfig;
use sov_domain::message::{Message, Role};

use crate::analyzer::TaskType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Priority levels; lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockPriority {
    /// Must include (system prompt, current task).
    Critical = 1,
    /// Recent messages and tool results.
    High = 2,
    /// Retrieved context and summaries.
    Medium = 3,
    /// Old history.
    Low = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCategory {
    System,
    History,
    ToolResult,
    Rag,
    Summary,
}

#[derive(Debug, Clone)]
pub struct ContextBlock {
    pub content: String,
    pub priority: BlockPriority,
    pub category: BlockCategory,
    pub tokens: usize,
    /// Original role for history blocks.
    pub role: Option<Role>,
}

/// `⌈chars/4⌉`, the conventional rough estimate.
pub fn estimate_tokens(content: &str) -> usize {
    content.len().div_ceil(4)
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ContextStats {
    pub total_builds: u64,
    pub truncations: u64,
    pub summarizations: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextWindowManager {
    max_tokens: usize,
    reserve_for_response: usize,
    max_rag_tokens: usize,
    blocks: Vec<ContextBlock>,
    stats: ContextStats,
}

impl ContextWindowManager {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            reserve_for_response: config.reserve_for_response,
            max_rag_tokens: config.max_rag_tokens,
            blocks: Vec::new(),
            stats: ContextStats::default(),
        }
    }

    /// Resize the budget to a known model context window, reserving a
    /// quarter of it for the response.
    pub fn adapt_for_model(&mut self, context_window_tokens: usize) {
        self.max_tokens = context_window_tokens;
        self.reserve_for_response = context_window_tokens / 4;
    }

    /// Scale the retrieval budget to the task: implementation work wants
    /// more surrounding code, explanation wants less.
    pub fn adapt_for_task(&mut self, task_type: TaskType) {
        self.max_rag_tokens = match task_type {
            TaskType::Implement | TaskType::Refactor | TaskType::Ultrathink => 3000,
            TaskType::Explain | TaskType::Document => 1000,
            TaskType::Debug => 2000,
            _ => self.max_rag_tokens,
        };
    }

    pub fn max_rag_tokens(&self) -> usize {
        self.max_rag_tokens
    }

    pub fn available_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserve_for_response)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    /// Record that older history was replaced by a digest for this build.
    /// Called by the turn loop at the point it feeds a [`summarize_history`]
    /// digest into [`Self::add_summary`].
    pub fn record_summarization(&mut self) {
        self.stats.summarizations += 1;
    }

    // ── Typed add helpers ──────────────────────────────────────────

    fn add_block(
        &mut self,
        content: String,
        priority: BlockPriority,
        category: BlockCategory,
        role: Option<Role>,
    ) {
        let tokens = estimate_tokens(&content);
        self.blocks.push(ContextBlock {
            content,
            priority,
            category,
            tokens,
            role,
        });
    }

    pub fn add_system_prompt(&mut self, content: impl Into<String>) {
        self.add_block(content.into(), BlockPriority::Critical, BlockCategory::System, None);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>, is_current: bool) {
        let priority = if is_current {
            BlockPriority::Critical
        } else {
            BlockPriority::High
        };
        self.add_block(content.into(), priority, BlockCategory::History, Some(Role::User));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>, is_recent: bool) {
        let priority = if is_recent {
            BlockPriority::High
        } else {
            BlockPriority::Medium
        };
        self.add_block(content.into(), priority, BlockCategory::History, Some(Role::Assistant));
    }

    pub fn add_tool_result(&mut self, tool_name: &str, result: &str, is_recent: bool) {
        let priority = if is_recent {
            BlockPriority::High
        } else {
            BlockPriority::Low
        };
        let content = format!("[Tool: {tool_name}]\n{result}");
        self.add_block(content, priority, BlockCategory::ToolResult, None);
    }

    pub fn add_rag_context(&mut self, content: impl Into<String>) {
        self.add_block(content.into(), BlockPriority::Medium, BlockCategory::Rag, None);
    }

    pub fn add_summary(&mut self, content: impl Into<String>) {
        self.add_block(content.into(), BlockPriority::Medium, BlockCategory::Summary, None);
    }

    // ── Build ──────────────────────────────────────────────────────

    /// Select blocks under the budget and emit chat messages.
    pub fn build(&mut self) -> Vec<Message> {
        self.stats.total_builds += 1;
        let available = self.available_tokens();

        // Stable sort keeps arrival order within a priority level.
        let mut sorted: Vec<ContextBlock> = self.blocks.clone();
        sorted.sort_by_key(|b| b.priority);

        let mut selected: Vec<ContextBlock> = Vec::new();
        let mut used = 0usize;

        for mut block in sorted {
            if used + block.tokens <= available {
                used += block.tokens;
                selected.push(block);
            } else if block.priority == BlockPriority::Critical {
                // Critical content must appear; truncate it into the
                // remaining budget when at least 100 tokens are left.
                let remaining = available.saturating_sub(used);
                if remaining >= 100 {
                    block.content = truncate_at_boundary(&block.content, remaining * 4);
                    block.tokens = estimate_tokens(&block.content);
                    used += block.tokens;
                    selected.push(block);
                    self.stats.truncations += 1;
                }
            }
        }

        tracing::debug!(
            blocks = selected.len(),
            used_tokens = used,
            available,
            "assembled context"
        );

        blocks_to_messages(&selected)
    }
}

/// Re-emit the selected blocks as chat messages in the wire order.
fn blocks_to_messages(blocks: &[ContextBlock]) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();

    let contents = |category: BlockCategory| -> Vec<&str> {
        blocks
            .iter()
            .filter(|b| b.category == category)
            .map(|b| b.content.as_str())
            .collect()
    };

    let system_parts = contents(BlockCategory::System);
    if !system_parts.is_empty() {
        let mut system = system_parts.join("\n\n");

        let rag_parts = contents(BlockCategory::Rag);
        if !rag_parts.is_empty() {
            system.push_str("\n\n## Relevant Context\n");
            system.push_str(&rag_parts.join("\n\n"));
        }

        let summary_parts = contents(BlockCategory::Summary);
        if !summary_parts.is_empty() {
            system.push_str("\n\n## Conversation Summary\n");
            system.push_str(&summary_parts.join("\n\n"));
        }

        messages.push(Message::system(system));
    }

    for block in blocks.iter().filter(|b| b.category == BlockCategory::History) {
        let role = block.role.unwrap_or(Role::User);
        messages.push(Message::new(role, block.content.clone()));
    }

    for block in blocks.iter().filter(|b| b.category == BlockCategory::ToolResult) {
        match messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content.push_str("\n\n");
                last.content.push_str(&block.content);
            }
            _ => messages.push(Message::assistant(block.content.clone())),
        }
    }

    messages
}

/// Truncate to `max_chars`, preferring the last sentence or line boundary
/// when that keeps more than half of the budget.
fn truncate_at_boundary(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        return content.to_string();
    }

    let mut end = max_chars.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    let head = &content[..end];

    let cut = head
        .rfind('.')
        .max(head.rfind('\n'))
        .filter(|&pos| pos > max_chars / 2)
        .map(|pos| pos + 1)
        .unwrap_or(end);

    format!("{}\n...[truncated]", &head[..cut])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History summarization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic digest of older history.
///
/// Keeps the last `keep_recent` messages verbatim and renders the rest as
/// bullets: a short preview per user message, and per assistant message
/// either the set of tool names found in its tool-call spans or a preview.
/// No LLM round-trip is involved.
pub fn summarize_history(messages: &[Message], keep_recent: usize) -> (String, Vec<Message>) {
    if messages.len() <= keep_recent {
        return (String::new(), messages.to_vec());
    }

    let old = &messages[..messages.len() - keep_recent];
    let recent = messages[messages.len() - keep_recent..].to_vec();

    let tool_re = Regex::new(r#"<tool\s+name="([^"]+)""#).expect("tool pattern is valid");

    let mut bullets: Vec<String> = Vec::new();
    for msg in old {
        match msg.role {
            Role::User => {
                let preview: String = msg.content.chars().take(150).collect();
                bullets.push(format!("- User requested: {}...", preview.replace('\n', " ")));
            }
            Role::Assistant => {
                let tools: Vec<String> = {
                    let mut seen = Vec::new();
                    for capture in tool_re.captures_iter(&msg.content) {
                        let name = capture[1].to_string();
                        if !seen.contains(&name) {
                            seen.push(name);
                        }
                    }
                    seen
                };
                if tools.is_empty() {
                    let preview: String = msg.content.chars().take(100).collect();
                    bullets.push(format!(
                        "- Assistant responded: {}...",
                        preview.replace('\n', " ")
                    ));
                } else {
                    bullets.push(format!("- Assistant used tools: {}", tools.join(", ")));
                }
            }
            Role::System => {}
        }
    }

    let tail_start = bullets.len().saturating_sub(10);
    let summary = format!("Previous conversation:\n{}", bullets[tail_start..].join("\n"));
    (summary, recent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(max_tokens: usize, reserve: usize) -> ContextWindowManager {
        ContextWindowManager::new(&ContextConfig {
            max_tokens,
            reserve_for_response: reserve,
            ..Default::default()
        })
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn everything_fits_under_a_roomy_budget() {
        let mut mgr = manager_with(8192, 2048);
        mgr.add_system_prompt("You are an agent.");
        mgr.add_user_message("old question", false);
        mgr.add_assistant_message("old answer", false);
        mgr.add_user_message("current question", true);

        let messages = mgr.build();
        assert_eq!(messages[0].role, Role::System);
        // History in arrival order with original roles.
        assert_eq!(messages[1].content, "old question");
        assert_eq!(messages[2].content, "old answer");
        assert_eq!(messages[3].content, "current question");
    }

    #[test]
    fn low_priority_blocks_are_dropped_first() {
        let mut mgr = manager_with(200, 50); // 150 tokens available
        mgr.add_system_prompt(&"s".repeat(400)); // 100 tokens, critical
        mgr.add_user_message(&"u".repeat(160), true); // 40 tokens, critical
        mgr.add_tool_result("read_file", &"t".repeat(400), false); // low, won't fit

        let messages = mgr.build();
        let total: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        assert!(total <= 150 + 1, "estimated {total} tokens");
        assert!(!messages.iter().any(|m| m.content.contains("[Tool:")));
    }

    #[test]
    fn critical_block_is_truncated_not_dropped() {
        let mut mgr = manager_with(1000, 200); // 800 tokens available
        mgr.add_system_prompt("short preamble.");
        // A critical block far over budget.
        let big = "A sentence here. ".repeat(1000);
        mgr.add_user_message(&big, true);

        let messages = mgr.build();
        assert_eq!(mgr.stats().truncations, 1);
        let user = messages.iter().find(|m| m.role == Role::User).unwrap();
        assert!(user.content.ends_with("...[truncated]"));
        assert!(user.content.len() < big.len());
    }

    #[test]
    fn oversized_noncritical_is_simply_dropped() {
        let mut mgr = manager_with(200, 50);
        mgr.add_system_prompt("tiny");
        mgr.add_rag_context(&"r".repeat(4000));

        let messages = mgr.build();
        assert_eq!(mgr.stats().truncations, 0);
        assert!(!messages[0].content.contains("Relevant Context"));
    }

    #[test]
    fn rag_and_summary_fold_into_system_message() {
        let mut mgr = manager_with(8192, 2048);
        mgr.add_system_prompt("base prompt");
        mgr.add_rag_context("retrieved snippet");
        mgr.add_summary("earlier the user asked about parsing");
        mgr.add_user_message("now", true);

        let messages = mgr.build();
        let system = &messages[0].content;
        assert!(system.contains("## Relevant Context"));
        assert!(system.contains("retrieved snippet"));
        assert!(system.contains("## Conversation Summary"));
        let rag_pos = system.find("Relevant Context").unwrap();
        let sum_pos = system.find("Conversation Summary").unwrap();
        assert!(rag_pos < sum_pos);
    }

    #[test]
    fn tool_results_append_to_trailing_assistant() {
        let mut mgr = manager_with(8192, 2048);
        mgr.add_system_prompt("sys");
        mgr.add_assistant_message("I'll check.", true);
        mgr.add_tool_result("read_file", "contents", true);

        let messages = mgr.build();
        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("I'll check."));
        assert!(last.content.contains("[Tool: read_file]"));
    }

    #[test]
    fn tool_results_without_assistant_become_assistant_messages() {
        let mut mgr = manager_with(8192, 2048);
        mgr.add_system_prompt("sys");
        mgr.add_tool_result("read_file", "contents", true);

        let messages = mgr.build();
        assert_eq!(messages.last().unwrap().role, Role::Assistant);
    }

    #[test]
    fn adapt_for_model_reserves_a_quarter() {
        let mut mgr = manager_with(100, 10);
        mgr.adapt_for_model(32_768);
        assert_eq!(mgr.available_tokens(), 32_768 - 8192);
    }

    #[test]
    fn summarization_events_are_counted() {
        let mut mgr = manager_with(8192, 2048);
        assert_eq!(mgr.stats().summarizations, 0);

        mgr.record_summarization();
        mgr.add_summary("digest of earlier turns");
        mgr.add_system_prompt("sys");
        mgr.build();

        assert_eq!(mgr.stats().summarizations, 1);
    }

    #[test]
    fn adapt_for_task_scales_rag_budget() {
        let mut mgr = manager_with(8192, 2048);
        mgr.adapt_for_task(TaskType::Implement);
        assert_eq!(mgr.max_rag_tokens(), 3000);
        mgr.adapt_for_task(TaskType::Explain);
        assert_eq!(mgr.max_rag_tokens(), 1000);
        mgr.adapt_for_task(TaskType::Debug);
        assert_eq!(mgr.max_rag_tokens(), 2000);
    }

    // ── summarize_history ──────────────────────────────────────────

    #[test]
    fn short_history_is_not_summarized() {
        let messages = vec![Message::user("a"), Message::assistant("b")];
        let (summary, recent) = summarize_history(&messages, 4);
        assert!(summary.is_empty());
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn digest_keeps_recent_and_bullets_old() {
        let mut messages = Vec::new();
        for i in 0..8 {
            messages.push(Message::user(format!("question number {i}")));
            messages.push(Message::assistant(format!("answer number {i}")));
        }

        let (summary, recent) = summarize_history(&messages, 4);
        assert_eq!(recent.len(), 4);
        assert!(summary.starts_with("Previous conversation:"));
        assert!(summary.contains("- User requested: question"));
        // Bullet list is capped at 10 entries.
        assert!(summary.lines().count() <= 11);
    }

    #[test]
    fn digest_extracts_tool_names_from_spans() {
        let messages = vec![
            Message::user("please read both files"),
            Message::assistant(
                "<tool name=\"read_file\"><param name=\"path\">/a</param></tool>\n\
                 <tool name=\"code_search\"><param name=\"pattern\">x</param></tool>\n\
                 <tool name=\"read_file\"><param name=\"path\">/b</param></tool>",
            ),
            Message::user("r1"),
            Message::user("r2"),
            Message::user("r3"),
            Message::user("r4"),
        ];

        let (summary, _) = summarize_history(&messages, 4);
        assert!(summary.contains("Assistant used tools: read_file, code_search"));
    }
}
