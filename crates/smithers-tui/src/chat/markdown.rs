// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Conversation ↔ Markdown: serialise `ChatSegment`s to the display-markdown
//! format used by the collapsed/expanded chat pane.

use std::collections::HashMap;

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use smithers_model::{Message, MessageContent, Role};

use crate::chat::segment::ChatSegment;
use crate::markdown::StyledLines;

// ── Format helpers ────────────────────────────────────────────────────────────

/// Format a single `ChatSegment` as markdown for display.
pub fn segment_to_markdown(seg: &ChatSegment, tool_args_cache: &HashMap<String, String>) -> String {
    match seg {
        ChatSegment::Message(m) => message_to_markdown(m, tool_args_cache),
        ChatSegment::ContextCompacted { tokens_before, tokens_after, strategy, turn } => {
            use smithers_core::CompactionStrategyUsed;
            let label = match strategy {
                CompactionStrategyUsed::Structured => "Context compacted (structured)",
                CompactionStrategyUsed::Narrative => "Context compacted (narrative)",
                CompactionStrategyUsed::Emergency => "⚠ Context emergency-compacted",
            };
            let turn_note = if *turn > 0 {
                format!(" · tool round {turn}")
            } else {
                String::new()
            };
            format!(
                "\n---\n*{label}: {tokens_before} → {tokens_after} tokens{turn_note}*\n\n"
            )
        }
        ChatSegment::Error(msg) => format!("\n**Error**: {msg}\n\n"),
        ChatSegment::Thinking { content } => {
            format!("\n**Agent:thinking**\n💭 **Thought**\n```\n{}\n```\n", content)
        }
    }
}

/// Render a single-line collapsed preview for a segment (ratatui-only mode).
pub fn collapsed_preview(seg: &ChatSegment, tool_args_cache: &HashMap<String, String>) -> String {
    match seg {
        ChatSegment::Message(m) => match (&m.role, &m.content) {
            // User / assistant text: first line, up to 80 chars
            (Role::User, MessageContent::Text(t)) => {
                let first = t.lines().next().unwrap_or("").trim();
                let preview: String = first.chars().take(80).collect();
                let has_more = first.chars().count() > 80 || t.contains('\n');
                let ellipsis = if has_more { "…" } else { "" };
                format!("\n**User:** `{preview}{ellipsis}` ▶ click to expand\n")
            }
            (Role::Assistant, MessageContent::Text(t)) => {
                let first = t.lines().next().unwrap_or("").trim();
                let preview: String = first.chars().take(80).collect();
                let has_more = first.chars().count() > 80 || t.contains('\n');
                let ellipsis = if has_more { "…" } else { "" };
                format!("\n**Agent:** `{preview}{ellipsis}` ▶ click to expand\n")
            }
            (Role::Assistant, MessageContent::ToolCall { tool_call_id, function }) => {
                let args_preview = serde_json::from_str::<serde_json::Value>(&function.arguments)
                    .map(|v| {
                        if let serde_json::Value::Object(map) = &v {
                            let parts: Vec<String> = map.iter().take(2).map(|(k, val)| {
                                let s = match val {
                                    serde_json::Value::String(s) =>
                                        s.chars().take(40).collect::<String>(),
                                    other =>
                                        other.to_string().chars().take(40).collect::<String>(),
                                };
                                format!("{}={}", k, s)
                            }).collect();
                            parts.join(" ")
                        } else {
                            function.arguments.chars().take(60).collect::<String>()
                        }
                    })
                    .unwrap_or_else(|_| function.arguments.chars().take(60).collect::<String>());
                format!(
                    "\n**Agent:tool_call:{}**\n🔧 **Tool Call: {}** `{}` ▶ click to expand\n",
                    tool_call_id, function.name, args_preview
                )
            }
            (Role::Tool, MessageContent::ToolResult { tool_call_id, content }) => {
                let tool_name = tool_args_cache
                    .get(tool_call_id)
                    .map(|s| s.as_str())
                    .unwrap_or("tool");
                let content_text = content.to_string();
                let preview: String =
                    content_text.lines().next().unwrap_or("").chars().take(80).collect();
                let truncated = if content_text.len() > preview.len() + 1 { "…" } else { "" };
                format!(
                    "\n**Tool:{}**\n✅ **Tool Response: {}** `{}{}` ▶ click to expand\n",
                    tool_call_id, tool_name, preview, truncated
                )
            }
            _ => segment_to_markdown(seg, tool_args_cache),
        },
        ChatSegment::Thinking { content } => {
            let preview: String =
                content.lines().next().unwrap_or("").chars().take(80).collect();
            let truncated = if content.len() > preview.len() + 1 { "…" } else { "" };
            format!(
                "\n**Agent:thinking**\n💭 **Thought** `{}{}` ▶ click to expand\n",
                preview, truncated
            )
        }
        _ => segment_to_markdown(seg, tool_args_cache),
    }
}

/// Return `(bar_style, dim)` for a segment used to draw the per-segment colour
/// bar in the ratatui-only chat pane.
pub fn segment_bar_style(seg: &ChatSegment) -> (Option<Style>, bool) {
    match seg {
        ChatSegment::Message(m) => match (&m.role, &m.content) {
            (Role::User, MessageContent::Text(_)) =>
                (Some(Style::default().fg(Color::Green)), false),
            (Role::Assistant, MessageContent::Text(_)) =>
                (Some(Style::default().fg(Color::Blue)), false),
            (Role::Assistant, MessageContent::ToolCall { .. }) =>
                (Some(Style::default().fg(Color::Yellow)), false),
            (Role::Tool, MessageContent::ToolResult { .. }) =>
                (Some(Style::default().fg(Color::Yellow)), false),
            _ => (None, false),
        },
        ChatSegment::Thinking { .. } =>
            (Some(Style::default().fg(Color::Magenta)), false),
        ChatSegment::Error(_) =>
            (Some(Style::default().fg(Color::Red)), false),
        _ => (None, false),
    }
}

/// Prepend a coloured bar to every line and optionally apply `DIM` to content.
pub fn apply_bar_and_dim(
    lines: StyledLines,
    bar_style: Option<Style>,
    dim: bool,
    bar_char: &str,
) -> StyledLines {
    let modifier = if dim { Modifier::DIM } else { Modifier::empty() };
    lines
        .into_iter()
        .map(|line| {
            let mut spans = Vec::new();
            if let Some(style) = bar_style {
                spans.push(Span::styled(bar_char.to_string(), style));
            }
            for s in line.spans {
                spans.push(Span::styled(
                    s.content.to_string(),
                    s.style.patch(Style::default().add_modifier(modifier)),
                ));
            }
            Line::from(spans)
        })
        .collect()
}

/// Format a single `Message` as markdown.  This is the per-message building
/// block for `segment_to_markdown`.
pub(crate) fn message_to_markdown(m: &Message, tool_args_cache: &HashMap<String, String>) -> String {
    match (&m.role, &m.content) {
        (Role::User, MessageContent::Text(t)) =>
            format!("---\n\n**You:** {}\n", t),
        (Role::Assistant, MessageContent::Text(t)) =>
            format!("\n**Agent:** {}\n", t),
        (Role::Assistant, MessageContent::ToolCall { tool_call_id, function }) => {
            let pretty_args = serde_json::from_str::<serde_json::Value>(&function.arguments)
                .and_then(|v| serde_json::to_string_pretty(&v))
                .unwrap_or_else(|_| function.arguments.clone());
            format!(
                "\n**Agent:tool_call:{}**\n🔧 **Tool Call: {}**\n```json\n{}\n```\n",
                tool_call_id, function.name, pretty_args
            )
        }
        (Role::Tool, MessageContent::ToolResult { tool_call_id, content }) => {
            let tool_name = tool_args_cache
                .get(tool_call_id)
                .map(|s| s.as_str())
                .unwrap_or("tool");
            format!(
                "\n**Tool:{}**\n✅ **Tool Response: {}**\n```\n{}\n```\n",
                tool_call_id, tool_name, content
            )
        }
        (Role::System, MessageContent::Text(t)) =>
            format!("**System:** {}\n\n", t),
        _ => String::new(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use smithers_model::{FunctionCall, Message, MessageContent, Role};

    use super::*;

    // ── message_to_markdown ───────────────────────────────────────────────────

    #[test]
    fn user_message_formatted_with_separator_and_you_label() {
        let msg   = Message { role: Role::User, content: MessageContent::Text("hello world".into()) };
        let cache = HashMap::new();
        let md = message_to_markdown(&msg, &cache);
        assert!(md.starts_with("---"),       "must start with --- separator; got: {:?}", md);
        assert!(md.contains("**You:**"),     "must carry **You:** label");
        assert!(md.contains("hello world"), "must contain the user text");
        assert!(!md.starts_with('\n'),       "separator must be the first character");
    }

    #[test]
    fn agent_message_formatted_with_agent_label() {
        let msg   = Message { role: Role::Assistant, content: MessageContent::Text("response text".into()) };
        let cache = HashMap::new();
        let md = message_to_markdown(&msg, &cache);
        assert!(md.contains("**Agent:**"),    "must carry **Agent:** label");
        assert!(md.contains("response text"), "must contain the agent text");
    }

    #[test]
    fn tool_call_formatted_with_tool_call_heading_and_name_appears_once() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: "id1".into(),
                function: FunctionCall { name: "read_file".into(), arguments: r#"{"path":"/tmp/x"}"#.into() },
            },
        };
        let cache = HashMap::new();
        let md = message_to_markdown(&msg, &cache);
        assert!(md.contains("Tool Call"),  "must carry 'Tool Call' heading");
        assert!(md.contains("read_file"), "must include the tool name");
        let name_count = md.matches("read_file").count();
        assert_eq!(name_count, 1, "tool name must appear exactly once; found {name_count} in: {md:?}");
    }

    #[test]
    fn tool_result_formatted_with_response_heading_output_and_name_appears_once() {
        let mut cache = HashMap::new();
        cache.insert("id1".to_string(), "read_file".to_string());
        let msg = Message {
            role: Role::Tool,
            content: MessageContent::ToolResult { tool_call_id: "id1".into(), content: "file contents here".into() },
        };
        let md = message_to_markdown(&msg, &cache);
        assert!(md.contains("Tool Response"),       "must carry 'Tool Response' heading");
        assert!(md.contains("file contents here"),  "must include the tool output");
        assert!(md.contains("```"),                 "output must be inside a code fence");
        let name_count = md.matches("read_file").count();
        assert_eq!(name_count, 1, "tool name must appear exactly once; found {name_count} in: {md:?}");
    }
}
