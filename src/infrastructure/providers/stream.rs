//! Streaming event protocol parser.
//!
//! Each line of child stdout is one JSON object. The parser lowers both the
//! neutral tagged shapes and the Claude CLI `stream-json` envelope into the
//! [`ProviderEvent`] union. Unknown event types are counted per type and
//! logged at most [`UNKNOWN_LOG_CAP`] times each; non-JSON lines are
//! ignored.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::models::provider::ProviderEvent;
use crate::domain::ports::provider::EventStreamParser;

/// Per-type cap on unknown-event log lines.
pub const UNKNOWN_LOG_CAP: u32 = 5;

/// Parser for the line-delimited JSON protocol. One instance per run.
#[derive(Debug, Default)]
pub struct JsonLineParser {
    unknown_counts: HashMap<String, u32>,
}

impl JsonLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown-event counts observed so far, keyed by event type.
    pub fn unknown_counts(&self) -> &HashMap<String, u32> {
        &self.unknown_counts
    }

    fn note_unknown(&mut self, event_type: &str) {
        let count = self
            .unknown_counts
            .entry(event_type.to_string())
            .or_insert(0);
        *count += 1;
        if *count <= UNKNOWN_LOG_CAP {
            warn!(
                event_type,
                occurrence = *count,
                "Ignoring unknown provider event type"
            );
        }
    }

    /// Lower a Claude CLI message envelope's content blocks.
    fn lower_content_blocks(value: &Value) -> Vec<ProviderEvent> {
        let Some(blocks) = value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        events.push(ProviderEvent::Text {
                            text: text.to_string(),
                        });
                    }
                }
                Some("thinking") => {
                    if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                        events.push(ProviderEvent::Thinking {
                            text: text.to_string(),
                        });
                    }
                }
                Some("tool_use") => {
                    events.push(ProviderEvent::ToolCall {
                        tool_id: string_field(block, "id"),
                        tool_name: string_field(block, "name"),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    });
                }
                Some("tool_result") => {
                    events.push(ProviderEvent::ToolResult {
                        tool_id: string_field(block, "tool_use_id"),
                        content: block.get("content").cloned().unwrap_or(Value::Null),
                        is_error: block
                            .get("is_error")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    });
                }
                _ => {}
            }
        }
        events
    }

    fn lower_result(value: &Value) -> ProviderEvent {
        let is_error = value
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let usage = value.get("usage");
        ProviderEvent::Result {
            success: !is_error,
            input_tokens: usage
                .and_then(|u| u.get("input_tokens"))
                .and_then(Value::as_u64),
            output_tokens: usage
                .and_then(|u| u.get("output_tokens"))
                .and_then(Value::as_u64),
            error: if is_error {
                value
                    .get("result")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            } else {
                None
            },
        }
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl EventStreamParser for JsonLineParser {
    fn parse_line(&mut self, line: &str) -> Vec<ProviderEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            debug!(line = trimmed, "Skipping non-JSON provider output line");
            return Vec::new();
        };

        // Neutral shape first: the tagged union deserializes directly.
        if let Ok(event) = serde_json::from_value::<ProviderEvent>(value.clone()) {
            return vec![event];
        }

        match value.get("type").and_then(Value::as_str) {
            Some("assistant" | "user") => Self::lower_content_blocks(&value),
            Some("result") => vec![Self::lower_result(&value)],
            // Handshake/config lines carry no model output.
            Some("system") => Vec::new(),
            Some(other) => {
                self.note_unknown(other);
                Vec::new()
            }
            None => {
                self.note_unknown("<untyped>");
                Vec::new()
            }
        }
    }
}
