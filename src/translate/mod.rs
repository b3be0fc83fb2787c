//! Translation between the Anthropic Messages format and the `OpenAI` chat
//! completions format.
//!
//! Everything in here is pure: no I/O, no shared state. Streaming state lives
//! in a [`streaming::ConversionContext`] owned by a single request.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod sse;
pub mod streaming;

/// Message ids handed back to the client: `msg_` + the upstream id when
/// known, otherwise a random one.
pub fn message_id(upstream_id: Option<&str>) -> String {
    match upstream_id {
        Some(id) if !id.is_empty() => format!("msg_{}", id),
        _ => format!("msg_{}", uuid::Uuid::new_v4().simple()),
    }
}

/// Fresh `toolu_` id for tool calls that arrive without one.
pub fn new_tool_use_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("toolu_{}", &hex[..24])
}
