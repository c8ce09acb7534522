// crates/core/src/parser.rs
//! Line parser for `claude --output-format stream-json`.
//!
//! Each stdout line is one JSON envelope. A line expands into zero or more
//! [`StreamEvent`]s; every emitted event takes the next index from the shared
//! [`EventCounter`], and filtered input never consumes one.

use serde_json::{Map, Value};

use crate::event::{AssistantBlock, EventCounter, EventPayload, StreamEvent, UserBlock};

/// Parse one line of CLI output into indexed events.
pub fn parse_stream_line(line: &str, counter: &EventCounter) -> Vec<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    classify(trimmed)
        .into_iter()
        .map(|payload| StreamEvent::new(counter.next(), payload))
        .collect()
}

fn classify(trimmed: &str) -> Vec<EventPayload> {
    let data = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => {
            return vec![EventPayload::Raw {
                text: None,
                value: None,
            }]
        }
        Ok(_) | Err(_) => {
            tracing::trace!(line = trimmed, "non-object stream line");
            return vec![EventPayload::Raw {
                text: Some(trimmed.to_string()),
                value: None,
            }];
        }
    };

    match str_field(&data, "type") {
        Some("system") => {
            let subtype = str_field(&data, "subtype")
                .filter(|s| !s.is_empty())
                .unwrap_or("init")
                .to_string();
            vec![EventPayload::System { subtype, raw: data }]
        }
        Some("assistant") => assistant_blocks(&data),
        Some("user") => user_blocks(&data),
        Some("result") => {
            let text = result_text(&data);
            let is_error = bool_field(&data, "is_error");
            vec![EventPayload::Result {
                text,
                is_error,
                raw: data,
            }]
        }
        Some("stream_event") => stream_event(&data).into_iter().collect(),
        _ => vec![EventPayload::Raw {
            text: None,
            value: Some(data),
        }],
    }
}

fn assistant_blocks(data: &Map<String, Value>) -> Vec<EventPayload> {
    let mut out = Vec::new();
    for block in content_blocks(data) {
        match str_field(block, "type") {
            Some("text") => {
                let text = str_field(block, "text").unwrap_or_default().to_string();
                out.push(EventPayload::Assistant(AssistantBlock::Text(text)));
            }
            Some("tool_use") => {
                let name = str_field(block, "name").unwrap_or_default().to_string();
                let input = block.get("input").and_then(Value::as_object).cloned();
                out.push(EventPayload::Assistant(AssistantBlock::ToolUse { name, input }));
            }
            _ => {}
        }
    }
    if out.is_empty() {
        out.push(EventPayload::Assistant(AssistantBlock::Generic));
    }
    out
}

fn user_blocks(data: &Map<String, Value>) -> Vec<EventPayload> {
    let mut out: Vec<EventPayload> = content_blocks(data)
        .filter(|block| str_field(block, "type") == Some("tool_result"))
        .map(|block| {
            EventPayload::User(UserBlock::ToolResult {
                content: tool_result_content(block),
                is_error: bool_field(block, "is_error"),
            })
        })
        .collect();
    if out.is_empty() {
        out.push(EventPayload::User(UserBlock::Generic));
    }
    out
}

/// Partial-message envelopes. Only text deltas and tool starts survive.
fn stream_event(data: &Map<String, Value>) -> Option<EventPayload> {
    let event = data.get("event")?.as_object()?;
    match str_field(event, "type")? {
        "content_block_delta" => {
            let delta = event.get("delta")?.as_object()?;
            if str_field(delta, "type")? != "text_delta" {
                return None;
            }
            let text = str_field(delta, "text").unwrap_or_default().to_string();
            Some(EventPayload::Assistant(AssistantBlock::TextDelta(text)))
        }
        "content_block_start" => {
            let block = event.get("content_block")?.as_object()?;
            if str_field(block, "type")? != "tool_use" {
                return None;
            }
            let name = str_field(block, "name").unwrap_or_default().to_string();
            Some(EventPayload::Assistant(AssistantBlock::ToolStart { name }))
        }
        // ping, message_stop, and everything else
        _ => None,
    }
}

/// Object blocks under `message.content`. Non-object entries are skipped.
fn content_blocks(data: &Map<String, Value>) -> impl Iterator<Item = &Map<String, Value>> {
    data.get("message")
        .and_then(Value::as_object)
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn tool_result_content(block: &Map<String, Value>) -> String {
    match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .filter(|item| str_field(item, "type") == Some("text"))
            .filter_map(|item| str_field(item, "text"))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn result_text(data: &Map<String, Value>) -> String {
    match data.get("result") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(m)) => str_field(m, "text").unwrap_or_default().to_string(),
        _ => String::new(),
    }
}

fn str_field<'a>(m: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    m.get(key).and_then(Value::as_str)
}

fn bool_field(m: &Map<String, Value>, key: &str) -> bool {
    m.get(key).and_then(Value::as_bool).unwrap_or(false)
}
