// crates/core/src/event.rs
//! Normalized events extracted from the CLI's `stream-json` output.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Shared, monotonically increasing event index source for one job.
#[derive(Debug, Default)]
pub struct EventCounter(AtomicUsize);

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next index.
    pub fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of indices handed out so far.
    pub fn current(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Top-level event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    System,
    Assistant,
    User,
    Result,
    Raw,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::System => "system",
            EventType::Assistant => "assistant",
            EventType::User => "user",
            EventType::Result => "result",
            EventType::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssistantBlock {
    /// Assistant message with no recognized content blocks.
    Generic,
    Text(String),
    ToolUse {
        name: String,
        /// `None` when the CLI sent a non-object input.
        input: Option<Map<String, Value>>,
    },
    /// Partial text from a `content_block_delta`.
    TextDelta(String),
    /// A tool call announced by `content_block_start`.
    ToolStart { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserBlock {
    Generic,
    ToolResult { content: String, is_error: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    System {
        subtype: String,
        raw: Map<String, Value>,
    },
    Assistant(AssistantBlock),
    User(UserBlock),
    Result {
        text: String,
        is_error: bool,
        raw: Map<String, Value>,
    },
    /// Undecodable line (`text`) or an object with an unknown type (`value`).
    Raw {
        text: Option<String>,
        value: Option<Map<String, Value>>,
    },
}

/// One indexed event in a job's log.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub index: usize,
    pub payload: EventPayload,
}

impl StreamEvent {
    pub fn new(index: usize, payload: EventPayload) -> Self {
        Self { index, payload }
    }

    pub fn event_type(&self) -> EventType {
        match self.payload {
            EventPayload::System { .. } => EventType::System,
            EventPayload::Assistant(_) => EventType::Assistant,
            EventPayload::User(_) => EventType::User,
            EventPayload::Result { .. } => EventType::Result,
            EventPayload::Raw { .. } => EventType::Raw,
        }
    }

    pub fn subtype(&self) -> Option<&'static str> {
        match &self.payload {
            EventPayload::Assistant(AssistantBlock::Text(_)) => Some("text"),
            EventPayload::Assistant(AssistantBlock::ToolUse { .. }) => Some("tool_use"),
            EventPayload::Assistant(AssistantBlock::TextDelta(_)) => Some("text_delta"),
            EventPayload::Assistant(AssistantBlock::ToolStart { .. }) => Some("tool_start"),
            EventPayload::User(UserBlock::ToolResult { .. }) => Some("tool_result"),
            _ => None,
        }
    }

    /// True for complete assistant text blocks, which count as turns.
    pub fn is_assistant_text(&self) -> bool {
        matches!(self.payload, EventPayload::Assistant(AssistantBlock::Text(_)))
    }

    pub fn text(&self) -> Option<&str> {
        let text = match &self.payload {
            EventPayload::System { subtype, .. } => subtype.as_str(),
            EventPayload::Assistant(AssistantBlock::Text(t))
            | EventPayload::Assistant(AssistantBlock::TextDelta(t)) => t.as_str(),
            EventPayload::Result { text, .. } => text.as_str(),
            EventPayload::Raw { text: Some(t), .. } => t.as_str(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    pub fn is_error(&self) -> bool {
        match &self.payload {
            EventPayload::User(UserBlock::ToolResult { is_error, .. }) => *is_error,
            EventPayload::Result { is_error, .. } => *is_error,
            _ => false,
        }
    }

    /// Decoded payload of a `system` or `result` line.
    pub fn raw(&self) -> Option<&Map<String, Value>> {
        match &self.payload {
            EventPayload::System { raw, .. } | EventPayload::Result { raw, .. } => Some(raw),
            EventPayload::Raw { value, .. } => value.as_ref(),
            _ => None,
        }
    }
}

/// Keys copied verbatim from a result payload into its wire form.
const PROMOTED_RESULT_KEYS: [&str; 4] = ["duration_ms", "duration_api_ms", "num_turns", "session_id"];

impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("index", &self.index)?;
        map.serialize_entry("type", self.event_type().as_str())?;
        if let Some(subtype) = self.subtype() {
            map.serialize_entry("subtype", subtype)?;
        }
        if let Some(text) = self.text() {
            map.serialize_entry("text", text)?;
        }

        match &self.payload {
            EventPayload::Assistant(AssistantBlock::ToolUse { name, input }) => {
                if !name.is_empty() {
                    map.serialize_entry("tool_name", name)?;
                }
                if let Some(input) = input {
                    map.serialize_entry("tool_input", input)?;
                }
            }
            EventPayload::Assistant(AssistantBlock::ToolStart { name }) if !name.is_empty() => {
                map.serialize_entry("tool_name", name)?;
            }
            EventPayload::User(UserBlock::ToolResult { content, .. }) if !content.is_empty() => {
                map.serialize_entry("tool_result", content)?;
            }
            _ => {}
        }

        if self.is_error() {
            map.serialize_entry("is_error", &true)?;
        }

        match &self.payload {
            EventPayload::Result { raw, .. } => {
                if let Some(cost) = raw.get("total_cost_usd").or_else(|| raw.get("cost_usd")) {
                    map.serialize_entry("cost_usd", cost)?;
                }
                for key in PROMOTED_RESULT_KEYS {
                    if let Some(v) = raw.get(key) {
                        map.serialize_entry(key, v)?;
                    }
                }
                if let Some(usage) = raw
                    .get("usage")
                    .and_then(Value::as_object)
                    .filter(|u| !u.is_empty())
                {
                    map.serialize_entry("usage", usage)?;
                }
            }
            EventPayload::Raw {
                value: Some(value), ..
            } => {
                map.serialize_entry("raw", value)?;
            }
            _ => {}
        }

        map.end()
    }
}
