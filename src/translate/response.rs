//! Translate a complete `OpenAI` Chat Completion response back into an
//! Anthropic Messages response.

use super::anthropic_types::{CacheControl, MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::{ChatCompletionResponse, ChatContent, ChatToolCall, ContentPart};
use super::{message_id, new_tool_use_id};
use crate::models::ResolvedModel;

/// Convert the first choice of `resp`. `original_model` is the name the
/// client asked for and is echoed back unchanged.
pub fn openai_to_anthropic(
    resp: &ChatCompletionResponse,
    original_model: &str,
    model: &ResolvedModel,
) -> MessagesResponse {
    let choice = resp.choices.first();
    let keep_cache = |hint: &Option<CacheControl>| {
        if model.cache_capable {
            hint.clone()
        } else {
            None
        }
    };

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        match &c.message.content {
            Some(ChatContent::Text(text)) if !text.is_empty() => {
                content.push(ResponseContentBlock::text(text.clone()));
            }
            Some(ChatContent::Parts(parts)) => {
                for part in parts {
                    content.push(match part {
                        ContentPart::Text(p) => ResponseContentBlock::Text {
                            text: p.text.clone(),
                            cache_control: keep_cache(&p.cache_control),
                        },
                        ContentPart::ImageUrl(_) => ResponseContentBlock::text("[IMAGE_CONTENT]"),
                        ContentPart::Other(raw) => ResponseContentBlock::text(format!(
                            "[UNKNOWN_CONTENT_TYPE:{}] {}",
                            raw.get("type").and_then(|t| t.as_str()).unwrap_or("unknown"),
                            raw
                        )),
                    });
                }
            }
            _ => {}
        }

        if content.is_empty() {
            if let Some(reasoning) = c.message.reasoning_content.as_deref() {
                if !reasoning.is_empty() {
                    content.push(ResponseContentBlock::text(reasoning));
                }
            }
        }

        for tc in c.message.tool_calls.iter().flatten() {
            content.push(ResponseContentBlock::ToolUse {
                id: if tc.id.is_empty() {
                    new_tool_use_id()
                } else {
                    tc.id.clone()
                },
                name: tc.function.name.clone(),
                input: parse_tool_arguments(tc),
                cache_control: keep_cache(&tc.cache_control),
            });
        }
    }

    // Clients expect a non-empty content array.
    if content.is_empty() {
        content.push(ResponseContentBlock::text(""));
    }

    let stop_reason = map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref()).unwrap_or(""));

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    });

    MessagesResponse {
        id: message_id(Some(resp.id.as_str())),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Parse a tool call's JSON argument string. Empty arguments mean `{}`;
/// anything that is not a JSON object is kept raw under
/// `error_parsing_arguments`.
pub fn parse_tool_arguments(tc: &ChatToolCall) -> serde_json::Value {
    let raw = tc.function.arguments.trim();
    if raw.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::json!({ "error_parsing_arguments": tc.function.arguments }),
    }
}

/// Upstream `finish_reason` to Anthropic `stop_reason`. Total: anything not
/// in the table (including empty) is `end_turn`.
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        "content_filter" => "stop_sequence",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> ChatCompletionResponse {
        serde_json::from_value(value).unwrap()
    }

    fn plain() -> ResolvedModel {
        ResolvedModel::new("gpt-4o", false)
    }

    #[test]
    fn test_simple_text_response() {
        let resp = response(json!({
            "id": "chatcmpl-abc123",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"},
                         "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
        }));

        let out = openai_to_anthropic(&resp, "claude-3-sonnet", &plain());
        assert_eq!(out.id, "msg_chatcmpl-abc123");
        assert_eq!(out.model, "claude-3-sonnet");
        assert_eq!(out.content, vec![ResponseContentBlock::text("Hello!")]);
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(out.usage.input_tokens, 10);
        assert_eq!(out.usage.output_tokens, 20);
    }

    #[test]
    fn test_tool_calls_without_text_have_no_empty_block() {
        let resp = response(json!({
            "id": "x",
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}},
                {"type": "function", "function": {"name": "broken", "arguments": "{not json"}}
            ]}, "finish_reason": "tool_calls"}]
        }));

        let out = openai_to_anthropic(&resp, "claude-3-haiku", &plain());
        assert_eq!(out.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(out.content.len(), 2);

        match &out.content[0] {
            ResponseContentBlock::ToolUse { id, name, input, .. } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "get_weather");
                assert_eq!(input, &json!({"city": "Paris"}));
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
        match &out.content[1] {
            ResponseContentBlock::ToolUse { id, input, .. } => {
                assert!(id.starts_with("toolu_"));
                assert_eq!(input, &json!({"error_parsing_arguments": "{not json"}));
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_content_gets_placeholder() {
        let resp = response(json!({
            "id": "x",
            "choices": [{"message": {"role": "assistant", "content": ""}, "finish_reason": "stop"}]
        }));
        let out = openai_to_anthropic(&resp, "claude-3-haiku", &plain());
        assert_eq!(out.content, vec![ResponseContentBlock::text("")]);
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));

        let no_choices = response(json!({"id": "y", "choices": []}));
        let out = openai_to_anthropic(&no_choices, "claude-3-haiku", &plain());
        assert_eq!(out.content, vec![ResponseContentBlock::text("")]);
    }

    #[test]
    fn test_parts_restore_cache_hints_only_when_capable() {
        let resp = response(json!({
            "id": "x",
            "choices": [{"message": {"role": "assistant", "content": [
                {"type": "text", "text": "cached", "cache_control": {"type": "ephemeral"}},
                {"type": "image_url", "image_url": {"url": "https://example.com/i.png"}},
                {"type": "audio", "data": "zz"}
            ]}, "finish_reason": "length"}]
        }));

        let capable = ResolvedModel::new("claude-3.7-sonnet", true);
        let out = openai_to_anthropic(&resp, "claude-3-opus", &capable);
        assert_eq!(out.stop_reason.as_deref(), Some("max_tokens"));
        assert_eq!(
            out.content[0],
            ResponseContentBlock::Text {
                text: "cached".to_string(),
                cache_control: Some(CacheControl::ephemeral()),
            }
        );
        assert_eq!(out.content[1], ResponseContentBlock::text("[IMAGE_CONTENT]"));
        match &out.content[2] {
            ResponseContentBlock::Text { text, .. } => {
                assert!(text.starts_with("[UNKNOWN_CONTENT_TYPE:audio] "))
            }
            other => panic!("expected text, got {other:?}"),
        }

        let out = openai_to_anthropic(&resp, "claude-3-opus", &plain());
        assert_eq!(out.content[0], ResponseContentBlock::text("cached"));
    }

    #[test]
    fn test_reasoning_content_fallback() {
        let resp = response(json!({
            "id": "x",
            "choices": [{"message": {"role": "assistant", "content": null,
                                     "reasoning_content": "thinking out loud"},
                         "finish_reason": "stop"}]
        }));
        let out = openai_to_anthropic(&resp, "claude-3-haiku", &plain());
        assert_eq!(out.content, vec![ResponseContentBlock::text("thinking out loud")]);
    }

    #[test]
    fn test_finish_reason_table() {
        assert_eq!(map_finish_reason("stop"), "end_turn");
        assert_eq!(map_finish_reason("length"), "max_tokens");
        assert_eq!(map_finish_reason("tool_calls"), "tool_use");
        assert_eq!(map_finish_reason("content_filter"), "stop_sequence");
        assert_eq!(map_finish_reason("function_call"), "end_turn");
        assert_eq!(map_finish_reason(""), "end_turn");
    }

    #[test]
    fn test_empty_arguments_are_empty_object() {
        let resp = response(json!({
            "id": "x",
            "choices": [{"message": {"tool_calls": [
                {"id": "c", "function": {"name": "noop", "arguments": ""}}
            ]}, "finish_reason": "tool_calls"}]
        }));
        let out = openai_to_anthropic(&resp, "claude-3-haiku", &plain());
        match &out.content[0] {
            ResponseContentBlock::ToolUse { input, .. } => assert_eq!(input, &json!({})),
            other => panic!("expected tool_use, got {other:?}"),
        }
    }
}
