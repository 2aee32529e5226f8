use std::collections::BTreeMap;

use bgw_protocol::bedrock::converse::stream::{
    ContentBlockDelta, ContentBlockStart, ConverseStreamEvent,
};
use bgw_protocol::bedrock::converse::types::TokenUsage;
use bgw_protocol::openai::chat_completions::stream::{
    ChatCompletionChunk, ChatCompletionChunkObject, ChunkChoice,
};
use bgw_protocol::openai::chat_completions::types::{
    AssistantRole, ChunkDelta, FinishReason, FunctionCallDelta, ToolCallDelta, ToolCallKind, Usage,
};

use crate::response::map_stop_reason;

/// One item of the translated stream: a chunk to write as `data:`, or
/// the `[DONE]` terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Chunk(ChatCompletionChunk),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse { tool_index: u32 },
    Thinking,
}

/// Reassembles a Converse event stream into OpenAI chunks.
///
/// Chunks are emitted in strict upstream event order; at every point the
/// emitted prefix is a valid prefix of a final response. The stop reason
/// and usage arrive on messageDelta events and are replayed on the
/// terminal chunk at messageStop.
#[derive(Debug, Clone)]
pub struct ConverseStreamState {
    id: String,
    model: String,
    created: i64,
    blocks: BTreeMap<u32, BlockKind>,
    next_tool_index: u32,
    role_sent: bool,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    finished: bool,
}

impl ConverseStreamState {
    pub fn new(id: String, model: String, created: i64) -> Self {
        Self {
            id,
            model,
            created,
            blocks: BTreeMap::new(),
            next_tool_index: 0,
            role_sent: false,
            finish_reason: None,
            usage: None,
            finished: false,
        }
    }

    /// Usage captured from the stream, if any terminal event carried it.
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn transform_event(&mut self, event: ConverseStreamEvent) -> Vec<StreamItem> {
        match event {
            ConverseStreamEvent::MessageStart(_) => {
                if self.role_sent {
                    return Vec::new();
                }
                self.role_sent = true;
                vec![StreamItem::Chunk(self.chunk(
                    ChunkDelta {
                        role: Some(AssistantRole::Assistant),
                        ..ChunkDelta::default()
                    },
                    None,
                    None,
                ))]
            }
            ConverseStreamEvent::ContentBlockStart(start) => {
                match start.start {
                    Some(ContentBlockStart::ToolUse(tool_use)) => {
                        let tool_index = self.next_tool_index;
                        self.next_tool_index += 1;
                        self.blocks
                            .insert(start.content_block_index, BlockKind::ToolUse { tool_index });
                        vec![StreamItem::Chunk(self.tool_call_chunk(
                            tool_index,
                            Some(tool_use.tool_use_id),
                            Some(tool_use.name),
                            Some(String::new()),
                        ))]
                    }
                    // Text and thinking blocks open silently; the kind is
                    // pinned by their first delta.
                    None => Vec::new(),
                }
            }
            ConverseStreamEvent::ContentBlockDelta(event) => {
                let index = event.content_block_index;
                match event.delta {
                    ContentBlockDelta::Text(text) => {
                        self.blocks.entry(index).or_insert(BlockKind::Text);
                        vec![StreamItem::Chunk(self.chunk(
                            ChunkDelta {
                                content: Some(text),
                                ..ChunkDelta::default()
                            },
                            None,
                            None,
                        ))]
                    }
                    ContentBlockDelta::ToolUse(delta) => {
                        let tool_index = match self.blocks.get(&index) {
                            Some(BlockKind::ToolUse { tool_index }) => *tool_index,
                            // A tool delta without a preceding start is
                            // out of protocol; keep the stream coherent
                            // by opening a slot for it.
                            _ => {
                                let tool_index = self.next_tool_index;
                                self.next_tool_index += 1;
                                self.blocks.insert(index, BlockKind::ToolUse { tool_index });
                                tool_index
                            }
                        };
                        vec![StreamItem::Chunk(self.tool_call_chunk(
                            tool_index,
                            None,
                            None,
                            Some(delta.input),
                        ))]
                    }
                    ContentBlockDelta::ReasoningContent(delta) => {
                        self.blocks.entry(index).or_insert(BlockKind::Thinking);
                        match delta.text {
                            Some(text) if !text.is_empty() => {
                                vec![StreamItem::Chunk(self.chunk(
                                    ChunkDelta {
                                        thinking: Some(text),
                                        ..ChunkDelta::default()
                                    },
                                    None,
                                    None,
                                ))]
                            }
                            _ => Vec::new(),
                        }
                    }
                }
            }
            ConverseStreamEvent::ContentBlockStop(_) => Vec::new(),
            ConverseStreamEvent::MessageDelta(delta) => {
                if let Some(stop_reason) = delta.stop_reason {
                    self.finish_reason = Some(map_stop_reason(stop_reason));
                }
                if let Some(usage) = delta.usage {
                    self.usage = Some(map_usage(usage));
                }
                Vec::new()
            }
            ConverseStreamEvent::MessageStop(_) => {
                self.finished = true;
                let finish = self.finish_reason.unwrap_or(FinishReason::Stop);
                let terminal = self.chunk(ChunkDelta::default(), Some(finish), self.usage);
                vec![StreamItem::Chunk(terminal), StreamItem::Done]
            }
        }
    }

    /// Synthetic terminal chunk for an abnormally ended upstream stream.
    pub fn abort_chunk(&mut self) -> ChatCompletionChunk {
        self.finished = true;
        self.chunk(ChunkDelta::default(), Some(FinishReason::Error), None)
    }

    fn tool_call_chunk(
        &self,
        tool_index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> ChatCompletionChunk {
        let kind = id.is_some().then_some(ToolCallKind::Function);
        self.chunk(
            ChunkDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: tool_index,
                    id,
                    kind,
                    function: Some(FunctionCallDelta { name, arguments }),
                }]),
                ..ChunkDelta::default()
            },
            None,
            None,
        )
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChatCompletionChunkObject::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}

fn map_usage(usage: TokenUsage) -> Usage {
    Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgw_protocol::bedrock::converse::stream::{
        ContentBlockDeltaEvent, ContentBlockStartEvent, ContentBlockStopEvent, MessageDeltaEvent,
        MessageStartEvent, MessageStopEvent, ToolUseDelta, ToolUseStart,
    };
    use bgw_protocol::bedrock::converse::types::{ConversationRole, StopReason};

    fn state() -> ConverseStreamState {
        ConverseStreamState::new("chatcmpl-t".to_string(), "claude-sonnet-4-5".to_string(), 1)
    }

    fn text_delta(index: u32, text: &str) -> ConverseStreamEvent {
        ConverseStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
            content_block_index: index,
            delta: ContentBlockDelta::Text(text.to_string()),
        })
    }

    fn drive(state: &mut ConverseStreamState, events: Vec<ConverseStreamEvent>) -> Vec<StreamItem> {
        events
            .into_iter()
            .flat_map(|event| state.transform_event(event))
            .collect()
    }

    #[test]
    fn text_stream_emits_role_deltas_finish_and_done() {
        let mut state = state();
        let items = drive(
            &mut state,
            vec![
                ConverseStreamEvent::MessageStart(MessageStartEvent {
                    role: ConversationRole::Assistant,
                }),
                ConverseStreamEvent::ContentBlockStart(ContentBlockStartEvent {
                    content_block_index: 0,
                    start: None,
                }),
                text_delta(0, "Hel"),
                text_delta(0, "lo"),
                ConverseStreamEvent::ContentBlockStop(ContentBlockStopEvent {
                    content_block_index: 0,
                }),
                ConverseStreamEvent::MessageDelta(MessageDeltaEvent {
                    stop_reason: Some(StopReason::EndTurn),
                    usage: Some(TokenUsage {
                        input_tokens: 3,
                        output_tokens: 2,
                        total_tokens: 5,
                    }),
                }),
                ConverseStreamEvent::MessageStop(MessageStopEvent {}),
            ],
        );

        assert_eq!(items.len(), 5);
        let StreamItem::Chunk(role) = &items[0] else {
            panic!("expected chunk")
        };
        assert_eq!(role.choices[0].delta.role, Some(AssistantRole::Assistant));

        let texts: Vec<&str> = items[1..3]
            .iter()
            .map(|item| match item {
                StreamItem::Chunk(chunk) => chunk.choices[0].delta.content.as_deref().unwrap(),
                StreamItem::Done => panic!("unexpected done"),
            })
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);

        let StreamItem::Chunk(terminal) = &items[3] else {
            panic!("expected chunk")
        };
        assert_eq!(terminal.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(
            terminal.usage,
            Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5
            })
        );
        assert_eq!(items[4], StreamItem::Done);
        assert!(state.is_finished());
    }

    #[test]
    fn tool_call_indices_are_dense_and_arguments_stream_raw() {
        let mut state = state();
        let items = drive(
            &mut state,
            vec![
                ConverseStreamEvent::MessageStart(MessageStartEvent {
                    role: ConversationRole::Assistant,
                }),
                ConverseStreamEvent::ContentBlockStart(ContentBlockStartEvent {
                    content_block_index: 1,
                    start: Some(ContentBlockStart::ToolUse(ToolUseStart {
                        tool_use_id: "tu_1".to_string(),
                        name: "get_weather".to_string(),
                    })),
                }),
                ConverseStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
                    content_block_index: 1,
                    delta: ContentBlockDelta::ToolUse(ToolUseDelta {
                        input: "{\"loca".to_string(),
                    }),
                }),
                ConverseStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
                    content_block_index: 1,
                    delta: ContentBlockDelta::ToolUse(ToolUseDelta {
                        input: "tion\":\"Tokyo\"}".to_string(),
                    }),
                }),
                ConverseStreamEvent::ContentBlockStart(ContentBlockStartEvent {
                    content_block_index: 2,
                    start: Some(ContentBlockStart::ToolUse(ToolUseStart {
                        tool_use_id: "tu_2".to_string(),
                        name: "get_time".to_string(),
                    })),
                }),
                ConverseStreamEvent::MessageDelta(MessageDeltaEvent {
                    stop_reason: Some(StopReason::ToolUse),
                    usage: None,
                }),
                ConverseStreamEvent::MessageStop(MessageStopEvent {}),
            ],
        );

        let chunks: Vec<&ChatCompletionChunk> = items
            .iter()
            .filter_map(|item| match item {
                StreamItem::Chunk(chunk) => Some(chunk),
                StreamItem::Done => None,
            })
            .collect();

        // First tool chunk announces id/name with empty arguments.
        let first = chunks[1].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(first[0].index, 0);
        assert_eq!(first[0].id.as_deref(), Some("tu_1"));
        let function = first[0].function.as_ref().unwrap();
        assert_eq!(function.name.as_deref(), Some("get_weather"));
        assert_eq!(function.arguments.as_deref(), Some(""));

        // Argument fragments concatenate, in order, to the full JSON.
        let mut arguments = String::new();
        for chunk in &chunks[2..4] {
            let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
            assert_eq!(calls[0].index, 0);
            assert!(calls[0].id.is_none());
            arguments.push_str(calls[0].function.as_ref().unwrap().arguments.as_deref().unwrap());
        }
        assert_eq!(arguments, "{\"location\":\"Tokyo\"}");

        // Second tool block gets the next dense index.
        let second = chunks[4].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(second[0].index, 1);
        assert_eq!(second[0].id.as_deref(), Some("tu_2"));

        let terminal = chunks.last().unwrap();
        assert_eq!(
            terminal.choices[0].finish_reason,
            Some(FinishReason::ToolCalls)
        );
    }

    #[test]
    fn interleaved_text_and_tool_deltas_preserve_event_order() {
        let mut state = state();
        let items = drive(
            &mut state,
            vec![
                ConverseStreamEvent::MessageStart(MessageStartEvent {
                    role: ConversationRole::Assistant,
                }),
                text_delta(0, "Checking"),
                ConverseStreamEvent::ContentBlockStart(ContentBlockStartEvent {
                    content_block_index: 1,
                    start: Some(ContentBlockStart::ToolUse(ToolUseStart {
                        tool_use_id: "tu_1".to_string(),
                        name: "f".to_string(),
                    })),
                }),
                text_delta(0, " now"),
            ],
        );

        let kinds: Vec<&str> = items
            .iter()
            .map(|item| match item {
                StreamItem::Chunk(chunk) => {
                    let delta = &chunk.choices[0].delta;
                    if delta.role.is_some() {
                        "role"
                    } else if delta.content.is_some() {
                        "text"
                    } else {
                        "tool"
                    }
                }
                StreamItem::Done => "done",
            })
            .collect();
        assert_eq!(kinds, vec!["role", "text", "tool", "text"]);
    }

    #[test]
    fn thinking_deltas_use_the_extension_field() {
        let mut state = state();
        let items = drive(
            &mut state,
            vec![
                ConverseStreamEvent::MessageStart(MessageStartEvent {
                    role: ConversationRole::Assistant,
                }),
                ConverseStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
                    content_block_index: 0,
                    delta: ContentBlockDelta::ReasoningContent(
                        bgw_protocol::bedrock::converse::stream::ReasoningDelta {
                            text: Some("hmm".to_string()),
                            signature: None,
                        },
                    ),
                }),
            ],
        );
        let StreamItem::Chunk(chunk) = &items[1] else {
            panic!("expected chunk")
        };
        assert_eq!(chunk.choices[0].delta.thinking.as_deref(), Some("hmm"));
        assert!(chunk.choices[0].delta.content.is_none());
    }

    #[test]
    fn abort_chunk_reports_error_finish() {
        let mut state = state();
        state.transform_event(ConverseStreamEvent::MessageStart(MessageStartEvent {
            role: ConversationRole::Assistant,
        }));
        let chunk = state.abort_chunk();
        assert_eq!(chunk.choices[0].finish_reason, Some(FinishReason::Error));
        assert!(state.is_finished());
    }

    #[test]
    fn message_stop_without_stop_reason_defaults_to_stop() {
        let mut state = state();
        let items = state.transform_event(ConverseStreamEvent::MessageStop(MessageStopEvent {}));
        let StreamItem::Chunk(chunk) = &items[0] else {
            panic!("expected chunk")
        };
        assert_eq!(chunk.choices[0].finish_reason, Some(FinishReason::Stop));
        assert!(chunk.usage.is_none());
    }
}
