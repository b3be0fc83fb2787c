//! Heuristic token accounting. No tokenizer is involved; the numbers are
//! estimates good enough for limit checks and `count_tokens`.

use crate::error::{GatewayError, Result};
use crate::translate::anthropic_types::{
    ContentBlock, Message, MessageContent, MessagesRequest, SystemContent, TokenCountRequest, Tool,
    ToolResultContent,
};

const IMAGE_TOKENS: u64 = 85;
const PER_MESSAGE_OVERHEAD: u64 = 4;

const LEGACY_INPUT_LIMIT: u64 = 100_000;
const DEFAULT_INPUT_LIMIT: u64 = 200_000;

/// `max(chars / 4, words * 1.3)`, at least 1 for non-empty text.
pub fn estimate_tokens(text: &str) -> u64 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0;
    }

    let chars = words.iter().map(|w| w.chars().count()).sum::<usize>() + words.len() - 1;
    let by_chars = (chars / 4) as u64;
    let by_words = (words.len() as f64 * 1.3) as u64;

    by_chars.max(by_words).max(1)
}

/// The parts of a request that count toward its input size, borrowed from
/// either a full messages request or a `count_tokens` body.
#[derive(Debug, Clone, Copy)]
pub struct TokenInput<'a> {
    pub model: &'a str,
    pub system: Option<&'a SystemContent>,
    pub messages: &'a [Message],
    pub tools: &'a [Tool],
}

impl<'a> From<&'a MessagesRequest> for TokenInput<'a> {
    fn from(req: &'a MessagesRequest) -> Self {
        Self {
            model: &req.model,
            system: req.system.as_ref(),
            messages: &req.messages,
            tools: req.tools.as_deref().unwrap_or_default(),
        }
    }
}

impl<'a> From<&'a TokenCountRequest> for TokenInput<'a> {
    fn from(req: &'a TokenCountRequest) -> Self {
        Self {
            model: &req.model,
            system: req.system.as_ref(),
            messages: &req.messages,
            tools: req.tools.as_deref().unwrap_or_default(),
        }
    }
}

pub fn count_request_tokens(input: TokenInput<'_>) -> u64 {
    let mut total = 0;

    if let Some(system) = input.system {
        total += estimate_tokens(&system.as_text());
    }

    for message in input.messages {
        total += count_message_tokens(message) + PER_MESSAGE_OVERHEAD;
    }

    for tool in input.tools {
        total += estimate_tokens(&tool.name);
        if let Some(ref description) = tool.description {
            total += estimate_tokens(description);
        }
        total += estimate_tokens(&tool.input_schema.to_string());
    }

    total
}

fn count_message_tokens(message: &Message) -> u64 {
    let role = estimate_tokens(message.role.as_str());
    let content = match &message.content {
        MessageContent::Text(text) => estimate_tokens(text),
        MessageContent::Blocks(blocks) => blocks.iter().map(count_block_tokens).sum(),
    };
    role + content
}

fn count_block_tokens(block: &ContentBlock) -> u64 {
    match block {
        ContentBlock::Text(b) => estimate_tokens(&b.text),
        ContentBlock::Image(_) => IMAGE_TOKENS,
        ContentBlock::ToolUse(b) => {
            let input = b.input.as_ref().map(|v| v.to_string()).unwrap_or_default();
            estimate_tokens(&b.name) + estimate_tokens(&input)
        }
        ContentBlock::ToolResult(b) => match &b.content {
            Some(ToolResultContent::Text(text)) => estimate_tokens(text),
            Some(ToolResultContent::Blocks(blocks)) => blocks.iter().map(count_block_tokens).sum(),
            Some(ToolResultContent::Other(value)) => estimate_tokens(&value.to_string()),
            None => 0,
        },
        ContentBlock::Unknown(u) => estimate_tokens(&u.raw.to_string()),
    }
}

/// Input context limit for an inbound model name.
pub fn input_limit(model: &str) -> u64 {
    let lower = model.to_lowercase();
    if lower.starts_with("claude-2.0") || lower.starts_with("claude-instant") {
        LEGACY_INPUT_LIMIT
    } else {
        DEFAULT_INPUT_LIMIT
    }
}

/// Reject requests whose estimated input exceeds the model's limit.
/// Returns the estimate on success.
pub fn validate_limits(input: TokenInput<'_>) -> Result<u64> {
    let estimated = count_request_tokens(input);
    let limit = input_limit(input.model);
    if estimated > limit {
        return Err(GatewayError::validation(format!(
            "Request has an estimated {} input tokens, exceeding the {} token limit for {}",
            estimated, limit, input.model
        )));
    }
    Ok(estimated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::Role;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   \n"), 0);
        assert_eq!(estimate_tokens("hi"), 1);
        // 3 words * 1.3 = 3.9 -> 3; 15 chars / 4 = 3
        assert_eq!(estimate_tokens("one two   three"), 3);
        // long single word: chars dominate
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_count_request_tokens() {
        let req: MessagesRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-3-haiku",
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "hello there"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
                ]}
            ]
        }))
        .unwrap();

        let count = count_request_tokens(TokenInput::from(&req));
        // role "user" = 1, "hello there" = 2, image = 85, overhead = 4
        assert_eq!(count, 1 + 2 + 85 + 4);
    }

    #[test]
    fn test_system_and_tools_counted() {
        let req = TokenCountRequest {
            model: "claude-3-haiku".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            system: Some(SystemContent::Text("be brief".to_string())),
            tools: Some(vec![Tool {
                name: "lookup".to_string(),
                description: Some("find things".to_string()),
                input_schema: serde_json::json!({"type": "object"}),
                cache_control: None,
            }]),
        };
        let without_extras = TokenCountRequest {
            system: None,
            tools: None,
            ..req.clone()
        };
        assert!(
            count_request_tokens(TokenInput::from(&req))
                > count_request_tokens(TokenInput::from(&without_extras))
        );
    }

    #[test]
    fn test_request_views_agree() {
        let body = serde_json::json!({
            "model": "claude-3-haiku",
            "max_tokens": 10,
            "system": "be brief",
            "messages": [{"role": "user", "content": "hello there"}],
            "tools": [{"name": "lookup", "input_schema": {"type": "object"}}]
        });
        let full: MessagesRequest = serde_json::from_value(body.clone()).unwrap();
        let counted: TokenCountRequest = serde_json::from_value(body).unwrap();

        let input = TokenInput::from(&full);
        assert_eq!(input.model, "claude-3-haiku");
        assert_eq!(input.tools.len(), 1);
        assert_eq!(
            count_request_tokens(input),
            count_request_tokens(TokenInput::from(&counted))
        );
    }

    #[test]
    fn test_input_limits() {
        assert_eq!(input_limit("claude-2.0"), 100_000);
        assert_eq!(input_limit("claude-instant-1.2"), 100_000);
        assert_eq!(input_limit("claude-3-opus-20240229"), 200_000);
    }

    #[test]
    fn test_validate_limits_rejects_oversized() {
        let huge = "word ".repeat(160_000);
        let req = TokenCountRequest {
            model: "claude-2.0".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text(huge),
            }],
            system: None,
            tools: None,
        };
        let err = validate_limits(TokenInput::from(&req)).unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }
}
