//! Client for the stateful agent host.
//!
//! Conversations are sent to the host over a streamed HTTP call; the host
//! answers with a line-oriented event stream which this module parses into
//! [`StreamEvent`]s for the relay layer.

mod client;
mod events;

pub use client::{AgentClient, AgentClientConfig, AgentError, AgentStatus};
pub use events::{ParsedLine, StreamEvent, UsageStats, parse_wire_event};
