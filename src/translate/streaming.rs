//! State machine for translating `OpenAI` streaming chunks into Anthropic SSE events.
//!
//! A [`ConversionContext`] is created for exactly one request and owns all of
//! its streaming state: the next content-block index, the text block, and the
//! tool calls keyed by the upstream's own tool-call position. Nothing here is
//! shared between requests.
//!
//! Index 0 is reserved for the text block. Tool calls take indices from 1 in
//! order of first appearance, whether or not their block has started yet.
//!
//! Event order per request:
//! `message_start`, `ping`, block starts and deltas, then one
//! `content_block_stop` per started block when the finish reason arrives.
//! `message_delta` and `message_stop` follow once the trailing usage chunk,
//! `[DONE]`, or end of stream is seen. After that the context is inert.

use std::collections::BTreeMap;

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent,
    Usage,
};
use super::message_id;
use super::openai_types::{ChatCompletionChunk, ChunkChoice, ChunkToolCall};
use super::response::map_finish_reason;
use crate::error::GatewayError;
use crate::tokens::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    NotStarted,
    Started,
    Stopped,
}

const TEXT_INDEX: usize = 0;

/// One upstream tool call being streamed.
#[derive(Debug, Clone)]
struct ToolCallState {
    /// Assigned when the call is first seen.
    index: usize,
    id: Option<String>,
    name: Option<String>,
    /// Every argument fragment received, kept for diagnostics.
    args: String,
    /// Fragments that arrived before the block could start.
    pending: String,
    state: BlockState,
}

impl ToolCallState {
    fn new(index: usize) -> Self {
        Self {
            index,
            id: None,
            name: None,
            args: String::new(),
            pending: String::new(),
            state: BlockState::NotStarted,
        }
    }
}

#[derive(Debug)]
pub struct ConversionContext {
    message_id: String,
    model: String,
    next_index: usize,
    text_state: BlockState,
    tools: BTreeMap<u64, ToolCallState>,
    started: bool,
    /// Set by the finish reason; blocks are closed and `message_delta` is
    /// held back until usage arrives or the stream ends.
    stop_reason: Option<&'static str>,
    finished: bool,
    output_tokens: Option<u64>,
    /// Text and argument output, for estimating tokens when the upstream
    /// never reports usage.
    emitted: String,
}

impl ConversionContext {
    /// `model` is the inbound model name, echoed in `message_start`.
    pub fn new(model: &str) -> Self {
        Self {
            message_id: message_id(None),
            model: model.to_string(),
            next_index: TEXT_INDEX + 1,
            text_state: BlockState::NotStarted,
            tools: BTreeMap::new(),
            started: false,
            stop_reason: None,
            finished: false,
            output_tokens: None,
            emitted: String::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// True once `message_stop` (or an error) has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True once a finish reason has closed the content blocks.
    pub fn is_closing(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Raw argument text accumulated for the tool call at upstream
    /// position `position`.
    pub fn tool_arguments(&self, position: u64) -> Option<&str> {
        self.tools.get(&position).map(|t| t.args.as_str())
    }

    /// `message_start` (zeroed usage) followed by `ping`. Emitted once.
    pub fn begin(&mut self) -> Vec<StreamEvent> {
        if self.started || self.finished {
            return Vec::new();
        }
        self.started = true;

        vec![
            StreamEvent::MessageStart {
                message: MessagesResponse {
                    id: self.message_id.clone(),
                    response_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            },
            StreamEvent::Ping,
        ]
    }

    /// Feed one upstream chunk. Text, tool-call deltas and a finish reason
    /// carried by the same chunk are all handled, in that order. Content
    /// arriving after the finish reason is dropped; a usage report completes
    /// the message.
    pub fn on_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = self.begin();

        if let Some(ref usage) = chunk.usage {
            self.output_tokens = Some(usage.completion_tokens);
        }

        if self.stop_reason.is_none() {
            if let Some(choice) = chunk.choices.first() {
                self.on_choice(choice, &mut events);
            }
        }

        if self.stop_reason.is_some() && chunk.usage.is_some() {
            events.extend(self.complete());
        }

        events
    }

    fn on_choice(&mut self, choice: &ChunkChoice, events: &mut Vec<StreamEvent>) {
        let text = choice
            .delta
            .content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                choice
                    .delta
                    .reasoning_content
                    .as_deref()
                    .filter(|s| !s.is_empty())
            });

        if let Some(text) = text {
            self.on_text(text, events);
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            self.on_tool_call(tc, events);
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            events.extend(self.close_blocks(reason));
        }
    }

    fn on_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        if self.text_state == BlockState::NotStarted {
            self.text_state = BlockState::Started;
            events.push(StreamEvent::ContentBlockStart {
                index: TEXT_INDEX,
                content_block: ResponseContentBlock::text(""),
            });
        }

        self.emitted.push_str(text);
        events.push(StreamEvent::ContentBlockDelta {
            index: TEXT_INDEX,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn on_tool_call(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let mut entry = match self.tools.remove(&tc.index) {
            Some(entry) => entry,
            None => ToolCallState::new(self.allocate_index()),
        };
        let was_started = entry.state == BlockState::Started;

        if let Some(id) = tc.id.as_deref().filter(|s| !s.is_empty()) {
            entry.id = Some(id.to_string());
        }
        let function = tc.function.as_ref();
        if let Some(name) = function.and_then(|f| f.name.as_deref()).filter(|s| !s.is_empty()) {
            entry.name = Some(name.to_string());
        }

        if let Some(fragment) = function
            .and_then(|f| f.arguments.as_deref())
            .filter(|s| !s.is_empty())
        {
            entry.args.push_str(fragment);
            self.emitted.push_str(fragment);
            if was_started {
                events.push(input_delta(entry.index, fragment.to_string()));
            } else {
                entry.pending.push_str(fragment);
            }
        }

        if entry.state == BlockState::NotStarted {
            if let (Some(id), Some(name)) = (entry.id.clone(), entry.name.clone()) {
                let index = entry.index;
                entry.state = BlockState::Started;
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::json!({}),
                        cache_control: None,
                    },
                });
                if !entry.pending.is_empty() {
                    events.push(input_delta(index, std::mem::take(&mut entry.pending)));
                }
            }
        }

        self.tools.insert(tc.index, entry);
    }

    fn allocate_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    /// `content_block_stop` for every started block, in index order, and
    /// remember the stop reason. Only the first finish reason counts.
    fn close_blocks(&mut self, finish_reason: &str) -> Vec<StreamEvent> {
        if self.stop_reason.is_some() {
            return Vec::new();
        }
        self.stop_reason = Some(map_finish_reason(finish_reason));

        let mut started: Vec<usize> = Vec::new();
        if self.text_state == BlockState::Started {
            self.text_state = BlockState::Stopped;
            started.push(TEXT_INDEX);
        }
        for tool in self.tools.values_mut() {
            if tool.state == BlockState::Started {
                tool.state = BlockState::Stopped;
                started.push(tool.index);
            }
        }
        started.sort_unstable();

        started
            .into_iter()
            .map(|index| StreamEvent::ContentBlockStop { index })
            .collect()
    }

    /// `message_delta` with the stop reason and output tokens, then
    /// `message_stop`.
    fn complete(&mut self) -> Vec<StreamEvent> {
        self.finished = true;

        let output_tokens = self
            .output_tokens
            .unwrap_or_else(|| estimate_tokens(&self.emitted));

        vec![
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: self.stop_reason.map(str::to_string),
                    stop_sequence: None,
                },
                usage: DeltaUsage { output_tokens },
            },
            StreamEvent::MessageStop,
        ]
    }

    /// End of the upstream stream. Closes any open blocks (with
    /// `finish_reason` unless one was already received), then emits
    /// `message_delta` and `message_stop`. Idempotent; a never-begun context
    /// emits its `message_start` first so the client still sees a
    /// well-formed message.
    pub fn finish(&mut self, finish_reason: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = self.begin();
        events.extend(self.close_blocks(finish_reason));
        events.extend(self.complete());
        events
    }

    /// A single `error` event that terminates the stream. Nothing is emitted
    /// afterwards, not even for blocks left open.
    pub fn error(&mut self, err: &GatewayError) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![StreamEvent::Error {
            error: err.to_error_response().error,
        }]
    }
}

fn input_delta(index: usize, partial_json: String) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: Delta::InputJsonDelta { partial_json },
    }
}
