//! Tool-call wire format.
//!
//! The model emits tool invocations as tag spans:
//!
//! ```text
//! <tool name="read_file">
//! <param name="path">/tmp/a.txt</param>
//! </tool>
//! ```
//!
//! [`ToolCallParser::parse`] extracts them in order; [`render_call`] is the
//! inverse, so `parse(render(calls)) == calls` for well-formed calls.
//! Results go back to the model as `<tool_result>` spans.

use regex::Regex;

use sov_domain::message::{ToolCall, ToolParams, ToolResult};

pub struct ToolCallParser {
    tool_re: Regex,
    param_re: Regex,
}

impl Default for ToolCallParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallParser {
    pub fn new() -> Self {
        // The patterns are static; construction cannot fail.
        Self {
            tool_re: Regex::new(r#"(?s)<tool\s+name="([^"]+)">(.*?)</tool>"#)
                .expect("tool pattern is valid"),
            param_re: Regex::new(r#"(?s)<param\s+name="([^"]+)">(.*?)</param>"#)
                .expect("param pattern is valid"),
        }
    }

    /// Extract tool calls from assistant text, in source order.
    ///
    /// Tolerant by construction: unrecognized tags are ignored and malformed
    /// spans simply fail to match. Duplicate calls are preserved;
    /// deduplication is the cache's job, not the parser's.
    pub fn parse(&self, text: &str) -> Vec<ToolCall> {
        let mut calls = Vec::new();

        for capture in self.tool_re.captures_iter(text) {
            let name = capture[1].to_string();
            let body = &capture[2];

            let mut params = ToolParams::new();
            for param in self.param_re.captures_iter(body) {
                params.insert(param[1].to_string(), param[2].trim().to_string());
            }

            calls.push(ToolCall {
                name,
                params,
                raw: capture[0].to_string(),
            });
        }

        calls
    }

    /// Whether the text contains at least one tool-call span.
    pub fn contains_tool_call(&self, text: &str) -> bool {
        self.tool_re.is_match(text)
    }

    /// Tool names mentioned in the text, in order, duplicates preserved.
    pub fn tool_names(&self, text: &str) -> Vec<String> {
        self.tool_re
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .collect()
    }
}

/// Render a call back to its wire form.
pub fn render_call(call: &ToolCall) -> String {
    let mut out = format!("<tool name=\"{}\">\n", call.name);
    for (key, value) in &call.params {
        out.push_str(&format!("<param name=\"{key}\">{value}</param>\n"));
    }
    out.push_str("</tool>");
    out
}

/// Render a tool result for the next user-role message.
pub fn render_result(call: &ToolCall, result: &ToolResult) -> String {
    let status = if result.success { "success" } else { "error" };
    format!(
        "<tool_result name=\"{}\" status=\"{status}\">\n{}\n</tool_result>",
        call.name,
        result.text(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ToolCallParser {
        ToolCallParser::new()
    }

    #[test]
    fn parses_single_call_with_params() {
        let text = r#"Let me read that file.
<tool name="read_file">
<param name="path">/tmp/data/a.txt</param>
</tool>"#;

        let calls = parser().parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].params.get("path").unwrap(), "/tmp/data/a.txt");
        assert!(calls[0].raw.starts_with("<tool"));
    }

    #[test]
    fn parses_multiple_calls_in_order() {
        let text = r#"
<tool name="list_directory"><param name="path">/a</param></tool>
some narration
<tool name="read_file"><param name="path">/a/b.txt</param></tool>
"#;
        let calls = parser().parse(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "list_directory");
        assert_eq!(calls[1].name, "read_file");
    }

    #[test]
    fn param_values_are_trimmed_but_inner_whitespace_kept() {
        let text = "<tool name=\"write_file\">\n<param name=\"content\">\n  line one\n  line two\n</param>\n</tool>";
        let calls = parser().parse(text);
        assert_eq!(
            calls[0].params.get("content").unwrap(),
            "line one\n  line two"
        );
    }

    #[test]
    fn multiline_param_values_parse() {
        let content = "fn main() {\n    println!(\"hi\");\n}";
        let text = format!(
            "<tool name=\"write_file\">\n<param name=\"path\">main.rs</param>\n<param name=\"content\">{content}</param>\n</tool>"
        );
        let calls = parser().parse(&text);
        assert_eq!(calls[0].params.get("content").unwrap(), content);
    }

    #[test]
    fn malformed_spans_produce_no_calls() {
        assert!(parser().parse("<tool name=\"oops\"><param name=\"x\">1</param>").is_empty());
        assert!(parser().parse("<tool>no name</tool>").is_empty());
        assert!(parser().parse("plain prose, no tags").is_empty());
    }

    #[test]
    fn unrecognized_tags_are_ignored() {
        let text = "<thinking>hmm</thinking>\n<tool name=\"read_file\"><param name=\"path\">x</param></tool>";
        let calls = parser().parse(text);
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn duplicate_calls_are_preserved() {
        let span = "<tool name=\"read_file\"><param name=\"path\">/same</param></tool>";
        let calls = parser().parse(&format!("{span}\n{span}"));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].params, calls[1].params);
    }

    #[test]
    fn render_parse_round_trip() {
        let mut params = ToolParams::new();
        params.insert("path".into(), "src/lib.rs".into());
        params.insert("pattern".into(), "fn .*test".into());
        let original = vec![
            ToolCall::new("code_search", params),
            ToolCall::new("list_directory", {
                let mut p = ToolParams::new();
                p.insert("path".into(), ".".into());
                p
            }),
        ];

        let rendered = original
            .iter()
            .map(render_call)
            .collect::<Vec<_>>()
            .join("\n");
        let parsed = parser().parse(&rendered);

        assert_eq!(parsed.len(), original.len());
        for (a, b) in parsed.iter().zip(&original) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.params, b.params);
        }
    }

    #[test]
    fn result_rendering_carries_status() {
        let call = ToolCall::new("read_file", ToolParams::new());
        let ok = render_result(&call, &ToolResult::ok("contents"));
        assert!(ok.contains("status=\"success\""));
        assert!(ok.contains("contents"));

        let err = render_result(&call, &ToolResult::err("no such file"));
        assert!(err.contains("status=\"error\""));
        assert!(err.contains("no such file"));
    }

    #[test]
    fn tool_names_lists_all_mentions() {
        let text = "<tool name=\"a\"></tool><tool name=\"b\"></tool><tool name=\"a\"></tool>";
        assert_eq!(parser().tool_names(text), vec!["a", "b", "a"]);
        assert!(parser().contains_tool_call(text));
    }
}
