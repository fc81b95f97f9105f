use std::collections::HashMap;

use bytes::Bytes;
use castream_protocol::anthropic::{MessagesResponse, ResponseUsage};
use castream_protocol::canonical::{
    CanonicalContentPart, CanonicalResponse, ClientStreamEvent, ContentBlockDelta,
    ContentBlockStart,
};
use castream_protocol::openai::{
    ChatChoice, ChatChunkChoice, ChatChunkDelta, ChatChunkToolCall, ChatChunkToolCallFunction,
    ChatCompletionChunk, ChatCompletionResponse, ChatResponseMessage, ChatToolCall,
    ChatToolCallFunction, ChatUsage,
};
use castream_protocol::sse::encode_sse;
use serde_json::Value as JsonValue;

/// Dialect A streams the canonical event vocabulary near-verbatim as SSE.
pub fn encode_anthropic_event(event: &ClientStreamEvent) -> Bytes {
    let name = anthropic_event_name(event);
    let data = serde_json::to_string(event).expect("ClientStreamEvent always serializes");
    encode_sse(Some(name), &data)
}

fn anthropic_event_name(event: &ClientStreamEvent) -> &'static str {
    match event {
        ClientStreamEvent::MessageStart { .. } => "message_start",
        ClientStreamEvent::ContentBlockStart { .. } => "content_block_start",
        ClientStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        ClientStreamEvent::ContentBlockStop { .. } => "content_block_stop",
        ClientStreamEvent::MessageDelta { .. } => "message_delta",
        ClientStreamEvent::MessageStop {} => "message_stop",
    }
}

/// Dialect B repackages the same canonical events into `chat.completion.chunk`
/// shapes (spec §4.10). One canonical event may produce zero or one chunks.
#[derive(Debug, Default)]
pub struct OpenAiStreamState {
    role_sent: bool,
    next_tool_call_index: u32,
    tool_call_index_by_block: HashMap<u32, u32>,
    any_tool_calls: bool,
}

impl OpenAiStreamState {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn encode_openai_chunk(
    event: &ClientStreamEvent,
    id: &str,
    model: &str,
    state: &mut OpenAiStreamState,
) -> Option<Bytes> {
    let chunk = match event {
        ClientStreamEvent::MessageStart { .. } => {
            state.role_sent = true;
            Some(chat_chunk(
                id,
                model,
                ChatChunkDelta {
                    role: Some("assistant"),
                    content: None,
                    tool_calls: None,
                },
                None,
            ))
        }
        ClientStreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockStart::ToolUse { id: tool_id, name },
        } => {
            let tool_call_index = state.next_tool_call_index;
            state.next_tool_call_index += 1;
            state.tool_call_index_by_block.insert(*index, tool_call_index);
            state.any_tool_calls = true;
            Some(chat_chunk(
                id,
                model,
                ChatChunkDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ChatChunkToolCall {
                        index: tool_call_index,
                        id: Some(tool_id.clone()),
                        r#type: Some("function"),
                        function: ChatChunkToolCallFunction {
                            name: Some(name.clone()),
                            arguments: Some(String::new()),
                        },
                    }]),
                },
                None,
            ))
        }
        ClientStreamEvent::ContentBlockStart {
            content_block: ContentBlockStart::Text { .. },
            ..
        } => None,
        ClientStreamEvent::ContentBlockDelta {
            delta: ContentBlockDelta::TextDelta { text },
            ..
        } => Some(chat_chunk(
            id,
            model,
            ChatChunkDelta {
                role: None,
                content: Some(text.clone()),
                tool_calls: None,
            },
            None,
        )),
        ClientStreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::InputJsonDelta { partial_json },
        } => {
            let tool_call_index = *state.tool_call_index_by_block.get(index)?;
            Some(chat_chunk(
                id,
                model,
                ChatChunkDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ChatChunkToolCall {
                        index: tool_call_index,
                        id: None,
                        r#type: None,
                        function: ChatChunkToolCallFunction {
                            name: None,
                            arguments: Some(partial_json.clone()),
                        },
                    }]),
                },
                None,
            ))
        }
        ClientStreamEvent::ContentBlockStop { .. } => None,
        ClientStreamEvent::MessageDelta { .. } => {
            let finish_reason = if state.any_tool_calls {
                "tool_calls"
            } else {
                "stop"
            };
            Some(chat_chunk(
                id,
                model,
                ChatChunkDelta::default(),
                Some(finish_reason),
            ))
        }
        ClientStreamEvent::MessageStop {} => None,
    };
    chunk.map(|chunk| {
        let data = serde_json::to_string(&chunk).expect("ChatCompletionChunk always serializes");
        encode_sse(None, &data)
    })
}

pub fn encode_openai_done() -> Bytes {
    castream_protocol::sse::encode_done_sentinel()
}

fn chat_chunk(
    id: &str,
    model: &str,
    delta: ChatChunkDelta,
    finish_reason: Option<&'static str>,
) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        model: model.to_string(),
        choices: vec![ChatChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    }
}

/// Non-streaming synthesis into Dialect A's response document.
pub fn synthesize_anthropic_response(response: CanonicalResponse) -> MessagesResponse {
    MessagesResponse {
        id: response.id,
        kind: "message",
        role: "assistant",
        model: response.model,
        content: response.content.iter().map(content_part_to_json).collect(),
        stop_reason: response.stop_reason,
        usage: ResponseUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        },
    }
}

fn content_part_to_json(part: &CanonicalContentPart) -> JsonValue {
    match part {
        CanonicalContentPart::Text(text) => serde_json::json!({"type": "text", "text": text}),
        CanonicalContentPart::ToolUse { id, name, input } => {
            serde_json::json!({"type": "tool_use", "id": id, "name": name, "input": input})
        }
        CanonicalContentPart::ToolResult {
            tool_use_id,
            content,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
        }),
    }
}

/// Non-streaming synthesis into Dialect B's response document.
pub fn synthesize_openai_response(response: CanonicalResponse) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in &response.content {
        match part {
            CanonicalContentPart::Text(t) => text.push_str(t),
            CanonicalContentPart::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    kind: "function",
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            CanonicalContentPart::ToolResult { .. } => {}
        }
    }
    let finish_reason = if tool_calls.is_empty() {
        "stop"
    } else {
        "tool_calls"
    };

    ChatCompletionResponse {
        id: response.id,
        object: "chat.completion",
        model: response.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatResponseMessage {
                role: "assistant",
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls,
            },
            finish_reason,
        }],
        usage: ChatUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        },
    }
}
