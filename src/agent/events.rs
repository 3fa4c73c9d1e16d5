//! Stream event types and wire parsing.

use serde::{Deserialize, Serialize};

/// Token usage reported by the agent host for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub cost: f64,
}

/// One event of an agent response stream.
///
/// Exactly one `Done` terminates every stream, carrying the accumulated
/// assistant text and the last usage report seen (if any).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Message {
        content: String,
    },
    Reasoning {
        content: String,
    },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    ToolReturn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        result: serde_json::Value,
    },
    Usage {
        stats: UsageStats,
    },
    Error {
        content: String,
    },
    Done {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<UsageStats>,
    },
}

/// Host wire format: JSON objects discriminated by `message_type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum WireEvent {
    AssistantMessage {
        #[serde(default)]
        content: String,
    },
    ReasoningMessage {
        #[serde(default)]
        reasoning: String,
    },
    ToolCallMessage {
        tool_call: WireToolCall,
    },
    ToolReturnMessage {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        tool_return: serde_json::Value,
    },
    UsageStatistics {
        #[serde(flatten)]
        stats: UsageStats,
    },
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Outcome of parsing one wire payload.
#[derive(Debug, PartialEq)]
pub enum ParsedLine {
    Event(StreamEvent),
    /// Valid JSON with a discriminant we don't relay.
    Unknown,
    /// Not valid JSON.
    Malformed,
}

/// Parse one `data:` payload from the host stream.
///
/// The `[DONE]` sentinel is handled by the caller; everything reaching this
/// function is expected to be a JSON object.
pub fn parse_wire_event(data: &str) -> ParsedLine {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return ParsedLine::Malformed,
    };

    match serde_json::from_value::<WireEvent>(value) {
        Ok(WireEvent::AssistantMessage { content }) => {
            ParsedLine::Event(StreamEvent::Message { content })
        }
        Ok(WireEvent::ReasoningMessage { reasoning }) => {
            ParsedLine::Event(StreamEvent::Reasoning { content: reasoning })
        }
        Ok(WireEvent::ToolCallMessage { tool_call }) => ParsedLine::Event(StreamEvent::ToolCall {
            name: tool_call.name,
            arguments: tool_call.arguments,
        }),
        Ok(WireEvent::ToolReturnMessage { name, tool_return }) => {
            ParsedLine::Event(StreamEvent::ToolReturn {
                name,
                result: tool_return,
            })
        }
        Ok(WireEvent::UsageStatistics { stats }) => {
            ParsedLine::Event(StreamEvent::Usage { stats })
        }
        Err(_) => ParsedLine::Unknown,
    }
}
