use crate::error::{ErrorKind, GatewayError, Result};
use crate::logging::{LogLevel, RequestLogger};
use crate::models::ResolvedModel;
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::ChatCompletionChunk;
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::openai_to_anthropic;
use crate::translate::sse::{SseLine, SseLineDecoder};
use crate::translate::streaming::ConversionContext;
use crate::upstream::UpstreamClient;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

/// Inbound SSE events for one streaming request.
pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl From<&StreamEvent> for SseEvent {
    fn from(event: &StreamEvent) -> Self {
        Self {
            event: event.event_name().to_string(),
            data: serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

/// Convert, call the upstream, convert back.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    model: &ResolvedModel,
    upstream: &UpstreamClient,
    logger: &RequestLogger,
) -> Result<MessagesResponse> {
    let openai_req = anthropic_to_openai(req, model)?;

    logger.info(
        "proxy",
        format!("POST {} model={}", upstream.url(), openai_req.model),
    );

    let openai_resp = upstream.chat_completion(&openai_req).await?;
    let anthropic_resp = openai_to_anthropic(&openai_resp, &req.model, model);

    logger.with_context(
        LogLevel::Info,
        "proxy",
        "Completed",
        serde_json::json!({
            "input_tokens": anthropic_resp.usage.input_tokens,
            "output_tokens": anthropic_resp.usage.output_tokens,
            "stop_reason": anthropic_resp.stop_reason,
        }),
    );

    Ok(anthropic_resp)
}

/// Convert and open the upstream stream. Errors returned here happen before
/// any event is sent, so the caller can still answer with a status code.
pub async fn proxy_streaming(
    req: &MessagesRequest,
    model: &ResolvedModel,
    upstream: &UpstreamClient,
    idle_timeout: Duration,
    logger: &RequestLogger,
) -> Result<SseStream> {
    let openai_req = anthropic_to_openai(req, model)?;

    logger.info(
        "proxy",
        format!("POST {} model={} (streaming)", upstream.url(), openai_req.model),
    );

    let response = upstream.chat_completion_stream(&openai_req).await?;

    let event_stream = translate_sse_stream(
        response.bytes_stream(),
        req.model.clone(),
        idle_timeout,
        logger.clone(),
    );

    Ok(Box::pin(event_stream))
}

/// Drive a [`ConversionContext`] from an upstream SSE byte stream.
///
/// Each read is bounded by `idle_timeout`. A read error or timeout yields a
/// single `error` event and ends the stream, unless the finish reason has
/// already been seen, in which case the message is completed normally.
/// After the finish reason the loop keeps reading for the usage chunk.
/// `[DONE]` or end of body without a finish reason closes the message as
/// `end_turn`. Dropping the returned stream drops `byte_stream` with it.
pub fn translate_sse_stream<S, E>(
    byte_stream: S,
    model: String,
    idle_timeout: Duration,
    logger: RequestLogger,
) -> impl Stream<Item = SseEvent> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut ctx = ConversionContext::new(&model);
        let mut decoder = SseLineDecoder::new();
        let mut chunks = 0usize;

        for event in ctx.begin() {
            yield SseEvent::from(&event);
        }

        tokio::pin!(byte_stream);

        loop {
            let next = match tokio::time::timeout(idle_timeout, byte_stream.next()).await {
                Ok(next) => next,
                // Blocks are already closed; only the usage report is missing.
                Err(_) if ctx.is_closing() => break,
                Err(_) => {
                    let err = GatewayError::upstream(
                        ErrorKind::Api,
                        format!("Upstream stream idle for more than {}s", idle_timeout.as_secs()),
                    );
                    logger.error("stream", err.to_string());
                    for event in ctx.error(&err) {
                        yield SseEvent::from(&event);
                    }
                    break;
                }
            };

            let (lines, eof) = match next {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(e)) if ctx.is_closing() => {
                    logger.debug("stream", format!("Upstream closed after finish: {}", e));
                    break;
                }
                Some(Err(e)) => {
                    let err = GatewayError::upstream(
                        ErrorKind::Api,
                        format!("Upstream stream error: {}", e),
                    );
                    logger.error("stream", err.to_string());
                    for event in ctx.error(&err) {
                        yield SseEvent::from(&event);
                    }
                    break;
                }
                None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
            };

            let mut done = eof;
            for line in lines {
                match line {
                    SseLine::Done => {
                        done = true;
                        break;
                    }
                    SseLine::Data(data) => match serde_json::from_str::<ChatCompletionChunk>(&data) {
                        Ok(chunk) => {
                            chunks += 1;
                            for event in ctx.on_chunk(&chunk) {
                                yield SseEvent::from(&event);
                            }
                        }
                        Err(e) => {
                            logger.debug("stream", format!("Skipping unparseable chunk: {}", e));
                        }
                    },
                    SseLine::Ignore => {}
                }
            }

            if done || ctx.is_finished() {
                break;
            }
        }

        for event in ctx.finish("stop") {
            yield SseEvent::from(&event);
        }

        logger.info("stream", format!("Stream completed after {} chunks", chunks));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::SharedLogger;
    use futures::stream;

    fn logger() -> RequestLogger {
        SharedLogger::in_memory(LogLevel::Debug).for_request("test")
    }

    async fn run(chunks: Vec<std::result::Result<&'static str, &'static str>>) -> Vec<SseEvent> {
        let byte_stream = stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|s| Bytes::from_static(s.as_bytes()))),
        );
        translate_sse_stream(
            byte_stream,
            "claude-3-haiku".to_string(),
            Duration::from_secs(5),
            logger(),
        )
        .collect()
        .await
    }

    fn names(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event.as_str()).collect()
    }

    #[tokio::test]
    async fn test_text_stream_with_garbage_line() {
        let events = run(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"),
            Ok("data: not json\n\n"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n"),
            Ok("data: [DONE]\n\n"),
        ])
        .await;

        assert_eq!(
            names(&events),
            [
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        let delta: serde_json::Value = serde_json::from_str(&events[4].data).unwrap();
        assert_eq!(delta["delta"]["text"], "lo");
        let stop: serde_json::Value = serde_json::from_str(&events[6].data).unwrap();
        assert_eq!(stop["delta"]["stop_reason"], "end_turn");
    }

    #[tokio::test]
    async fn test_trailing_usage_chunk_sets_output_tokens() {
        let events = run(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n"),
            Ok("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n\n"),
            Ok("data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":77,\"total_tokens\":81}}\n\n"),
            Ok("data: [DONE]\n\n"),
        ])
        .await;

        assert_eq!(
            names(&events)[events.len() - 3..],
            ["content_block_stop", "message_delta", "message_stop"]
        );
        let delta: serde_json::Value = serde_json::from_str(&events[events.len() - 2].data).unwrap();
        assert_eq!(delta["delta"]["stop_reason"], "max_tokens");
        assert_eq!(delta["usage"]["output_tokens"], 77);
    }

    #[tokio::test]
    async fn test_read_error_after_finish_completes_message() {
        let events = run(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":\"stop\"}]}\n"),
            Err("connection reset"),
        ])
        .await;

        let names = names(&events);
        assert!(!names.contains(&"error"));
        assert_eq!(names.last(), Some(&"message_stop"));
    }

    #[tokio::test]
    async fn test_done_without_finish_reason_closes_message() {
        let events = run(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n"),
            Ok("data: [DONE]\n"),
        ])
        .await;

        assert_eq!(
            names(&events)[events.len() - 3..],
            ["content_block_stop", "message_delta", "message_stop"]
        );
    }

    #[tokio::test]
    async fn test_eof_without_done_closes_message() {
        let events = run(vec![Ok("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}")]).await;
        assert_eq!(names(&events).last(), Some(&"message_stop"));
        assert_eq!(
            names(&events).iter().filter(|n| **n == "content_block_stop").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_read_error_emits_single_error_event() {
        let events = run(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n"),
            Err("connection reset"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n"),
        ])
        .await;

        assert_eq!(
            names(&events),
            [
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "error"
            ]
        );
        let err: serde_json::Value = serde_json::from_str(&events[4].data).unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["error"]["type"], "api_error");
        assert!(err["error"]["message"]
            .as_str()
            .unwrap()
            .contains("connection reset"));
    }

    #[tokio::test]
    async fn test_idle_timeout_emits_error() {
        let byte_stream = stream::pending::<std::result::Result<Bytes, std::io::Error>>();
        let events: Vec<SseEvent> = translate_sse_stream(
            byte_stream,
            "claude-3-haiku".to_string(),
            Duration::from_millis(20),
            logger(),
        )
        .collect()
        .await;

        assert_eq!(names(&events), ["message_start", "ping", "error"]);
    }
}
