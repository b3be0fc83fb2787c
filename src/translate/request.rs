//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Message order is preserved. One inbound message may expand into several
//! outbound ones: tool results become `tool`-role messages ahead of the user
//! message, and an assistant turn with both text and tool calls becomes a text
//! message followed by a tool-call message. Cache hints survive only when the
//! resolved model is cache-capable.

use super::anthropic_types::{
    CacheControl, ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Role,
    SystemBlock, SystemContent, Tool, ToolChoice, ToolResultBlock, ToolResultContent,
    ToolUseBlock,
};
use super::new_tool_use_id;
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, StreamOptions,
};
use crate::error::{GatewayError, Result};
use crate::models::ResolvedModel;

/// Translate an inbound request for the already-resolved upstream model.
///
/// The only failure is an empty `messages` list; unknown content degrades to
/// marked text instead.
pub fn anthropic_to_openai(
    req: &MessagesRequest,
    model: &ResolvedModel,
) -> Result<ChatCompletionRequest> {
    if req.messages.is_empty() {
        return Err(GatewayError::validation("messages: at least one message is required"));
    }

    let conv = Converter {
        cache_capable: model.cache_capable,
    };

    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref system) = req.system {
        messages.push(conv.system_message(system));
    }

    for msg in &req.messages {
        messages.extend(conv.message(msg));
    }

    let tools: Option<Vec<ChatTool>> = req
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| tools.iter().map(|t| conv.tool(t)).collect());

    let tool_choice = if tools.is_some() {
        req.tool_choice.as_ref().map(translate_tool_choice)
    } else {
        None
    };

    let streaming = req.is_streaming();

    Ok(ChatCompletionRequest {
        model: model.name.clone(),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options: streaming.then_some(StreamOptions {
            include_usage: true,
        }),
        tools,
        tool_choice,
        stop: req.stop_sequences.clone().filter(|s| !s.is_empty()),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
    })
}

struct Converter {
    cache_capable: bool,
}

impl Converter {
    fn cache(&self, hint: Option<&CacheControl>) -> Option<CacheControl> {
        if self.cache_capable {
            hint.cloned()
        } else {
            None
        }
    }

    fn system_message(&self, system: &SystemContent) -> ChatMessage {
        match system {
            SystemContent::Text(text) => ChatMessage::text("system", text.clone()),
            SystemContent::Blocks(blocks) if self.cache_capable => {
                let parts = blocks
                    .iter()
                    .filter_map(|b| {
                        b.text()
                            .map(|text| ContentPart::text(text, self.cache(b.cache_control())))
                    })
                    .collect();
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(ChatContent::Parts(parts)),
                    ..ChatMessage::default()
                }
            }
            SystemContent::Blocks(blocks) => {
                let joined = blocks
                    .iter()
                    .filter_map(SystemBlock::text)
                    .collect::<Vec<_>>()
                    .join("\n");
                ChatMessage::text("system", joined)
            }
        }
    }

    fn message(&self, msg: &Message) -> Vec<ChatMessage> {
        match (&msg.content, msg.role) {
            (MessageContent::Text(text), role) => vec![ChatMessage::text(role.as_str(), text.clone())],
            (MessageContent::Blocks(blocks), Role::User) => self.user_message(blocks),
            (MessageContent::Blocks(blocks), Role::Assistant) => self.assistant_message(blocks),
            (MessageContent::Blocks(blocks), role) => {
                let text = blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text(t) => t.text.clone(),
                        other => unknown_marker(other),
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                vec![ChatMessage::text(role.as_str(), text)]
            }
        }
    }

    fn user_message(&self, blocks: &[ContentBlock]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        let mut parts: Vec<ContentPart> = Vec::new();

        for block in blocks {
            match block {
                ContentBlock::Text(b) => {
                    parts.push(ContentPart::text(&b.text, self.cache(b.cache_control.as_ref())));
                }
                ContentBlock::Image(b) => match image_url(&b.source) {
                    Some(url) => {
                        parts.push(ContentPart::image_url(url, self.cache(b.cache_control.as_ref())));
                    }
                    None => parts.push(ContentPart::text(unknown_marker(block), None)),
                },
                ContentBlock::ToolResult(b) => messages.push(self.tool_message(b)),
                ContentBlock::ToolUse(_) | ContentBlock::Unknown(_) => {
                    parts.push(ContentPart::text(unknown_marker(block), None));
                }
            }
        }

        if !parts.is_empty() {
            messages.push(ChatMessage {
                role: "user".to_string(),
                content: Some(self.collapse(parts)),
                ..ChatMessage::default()
            });
        }

        if messages.is_empty() {
            messages.push(ChatMessage::text("user", ""));
        }

        messages
    }

    /// A lone text part collapses to a plain string unless cache hints may
    /// need the structured form.
    fn collapse(&self, parts: Vec<ContentPart>) -> ChatContent {
        if !self.cache_capable && parts.len() == 1 {
            if let Some(ContentPart::Text(part)) = parts.first() {
                return ChatContent::Text(part.text.clone());
            }
        }
        ChatContent::Parts(parts)
    }

    fn tool_message(&self, result: &ToolResultBlock) -> ChatMessage {
        ChatMessage {
            role: "tool".to_string(),
            content: Some(ChatContent::Text(tool_result_text(result))),
            tool_call_id: Some(result.tool_use_id.clone()),
            cache_control: self.cache(result.cache_control.as_ref()),
            ..ChatMessage::default()
        }
    }

    fn assistant_message(&self, blocks: &[ContentBlock]) -> Vec<ChatMessage> {
        let mut text_parts: Vec<String> = Vec::new();
        let mut text_cache: Option<CacheControl> = None;
        let mut tool_calls: Vec<ChatToolCall> = Vec::new();

        for block in blocks {
            match block {
                ContentBlock::Text(b) => {
                    text_parts.push(b.text.clone());
                    if b.cache_control.is_some() {
                        text_cache = self.cache(b.cache_control.as_ref());
                    }
                }
                ContentBlock::ToolUse(b) => tool_calls.push(self.tool_call(b)),
                other => text_parts.push(unknown_marker(other)),
            }
        }

        let mut messages = Vec::with_capacity(2);

        if !text_parts.is_empty() {
            messages.push(ChatMessage {
                cache_control: text_cache,
                ..ChatMessage::text("assistant", text_parts.join("\n"))
            });
        }

        if !tool_calls.is_empty() {
            messages.push(ChatMessage {
                role: "assistant".to_string(),
                tool_calls: Some(tool_calls),
                ..ChatMessage::default()
            });
        }

        if messages.is_empty() {
            messages.push(ChatMessage::text("assistant", ""));
        }

        messages
    }

    fn tool_call(&self, tool_use: &ToolUseBlock) -> ChatToolCall {
        let arguments = match &tool_use.input {
            None | Some(serde_json::Value::Null) => "{}".to_string(),
            Some(serde_json::Value::String(raw)) => raw.clone(),
            Some(value) => value.to_string(),
        };

        ChatToolCall {
            id: tool_use
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_tool_use_id),
            call_type: "function".to_string(),
            function: ChatToolCallFunction {
                name: tool_use.name.clone(),
                arguments,
            },
            cache_control: self.cache(tool_use.cache_control.as_ref()),
        }
    }

    fn tool(&self, tool: &Tool) -> ChatTool {
        ChatTool {
            tool_type: "function".to_string(),
            function: ChatFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
            cache_control: self.cache(tool.cache_control.as_ref()),
        }
    }
}

fn image_url(source: &ImageSource) -> Option<String> {
    match source.source_type.as_str() {
        "base64" => {
            let data = source.data.as_deref()?;
            let media_type = source.media_type.as_deref().unwrap_or("image/png");
            Some(format!("data:{};base64,{}", media_type, data))
        }
        "url" => source.url.clone(),
        _ => None,
    }
}

/// `[UNKNOWN_CONTENT_TYPE:<type>] <json>` text standing in for a block the
/// upstream format cannot carry.
fn unknown_marker(block: &ContentBlock) -> String {
    format!(
        "[UNKNOWN_CONTENT_TYPE:{}] {}",
        block.type_name(),
        block.to_json()
    )
}

/// `[ERROR]` (when flagged) followed by the result's text pieces, space-joined.
/// Known non-text blocks (images, nested tool blocks) are left out; blocks of
/// an unrecognised type keep their marker.
fn tool_result_text(result: &ToolResultBlock) -> String {
    let mut pieces: Vec<String> = Vec::new();
    if result.is_error == Some(true) {
        pieces.push("[ERROR]".to_string());
    }

    match &result.content {
        Some(ToolResultContent::Text(text)) => pieces.push(text.clone()),
        Some(ToolResultContent::Blocks(blocks)) => {
            for block in blocks {
                match block {
                    ContentBlock::Text(t) => pieces.push(t.text.clone()),
                    ContentBlock::Unknown(_) => pieces.push(unknown_marker(block)),
                    ContentBlock::Image(_)
                    | ContentBlock::ToolUse(_)
                    | ContentBlock::ToolResult(_) => {}
                }
            }
        }
        Some(ToolResultContent::Other(value)) => pieces.push(value.to_string()),
        None => {}
    }

    pieces.join(" ")
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match (tc.choice_type.as_str(), tc.name.as_deref()) {
        ("any", _) | ("tool", None) => ChatToolChoice::String("required".to_string()),
        ("tool", Some(name)) => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction {
                name: name.to_string(),
            },
        }),
        _ => ChatToolChoice::String("auto".to_string()),
    }
}
