use std::collections::HashSet;

use castream_common::GatewayError;
use castream_protocol::canonical::{
    ContentBlockDelta, ContentBlockStart, MessageDeltaFields, MessageEnvelope, StreamUsage,
};
use castream_protocol::canonical::ClientStreamEvent;
use castream_protocol::frame::BackendEvent;

/// Toggle for the duplicate-fragment suppression behavior (spec §9: defaults
/// on — the backend sometimes repeats an entire assistant-response fragment
/// verbatim; a fragment whose trimmed text equals the previous trimmed
/// fragment is dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorOptions {
    pub suppress_duplicate_fragments: bool,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            suppress_duplicate_fragments: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Streaming,
    Finalizing,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    ToolUse,
}

/// Stateful backend-event -> client-event translator (spec §4.9). One
/// instance per request; not reusable across requests.
pub struct EventTranslator {
    options: TranslatorOptions,
    state: State,
    next_index: u32,
    open_block: OpenBlock,
    last_text_fragment: String,
    current_tool_use_index: Option<u32>,
    current_tool_use_id: Option<String>,
    argument_buffer: String,
    emitted_tool_use_ids: HashSet<String>,
    message_id: String,
    model: String,
    output_tokens: u32,
}

impl EventTranslator {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_options(message_id, model, TranslatorOptions::default())
    }

    pub fn with_options(
        message_id: impl Into<String>,
        model: impl Into<String>,
        options: TranslatorOptions,
    ) -> Self {
        Self {
            options,
            state: State::Idle,
            next_index: 0,
            open_block: OpenBlock::None,
            last_text_fragment: String::new(),
            current_tool_use_index: None,
            current_tool_use_id: None,
            argument_buffer: String::new(),
            emitted_tool_use_ids: HashSet::new(),
            message_id: message_id.into(),
            model: model.into(),
            output_tokens: 0,
        }
    }

    /// Translates one backend event into zero or more client events, in
    /// emission order.
    pub fn translate(&mut self, event: BackendEvent) -> Result<Vec<ClientStreamEvent>, GatewayError> {
        if self.state == State::Ended {
            return Err(GatewayError::Internal(
                "event received after stream was finalized".to_string(),
            ));
        }

        let mut out = Vec::new();
        if self.state == State::Idle {
            out.push(self.message_start());
            self.state = State::Streaming;
        }

        match event {
            BackendEvent::AssistantResponse { content } => {
                self.handle_text(content, &mut out);
            }
            BackendEvent::ToolUse {
                tool_use_id,
                name,
                input,
            } => {
                self.handle_tool_use(tool_use_id, name, input, &mut out)?;
            }
            BackendEvent::Unknown { .. } => {
                // Surfaced for observability upstream of this module; nothing
                // in the client vocabulary corresponds to it.
            }
        }
        Ok(out)
    }

    /// Finalizes the stream: closes any open block, emits `message_delta`
    /// and `message_stop`. Idempotent-unsafe by design — calling it twice is
    /// a caller bug, not a stream condition.
    pub fn finalize(&mut self) -> Vec<ClientStreamEvent> {
        let mut out = Vec::new();
        if self.state == State::Ended {
            return out;
        }
        if self.state == State::Idle {
            out.push(self.message_start());
        }
        self.state = State::Finalizing;
        self.close_open_block(&mut out);

        out.push(ClientStreamEvent::MessageDelta {
            delta: MessageDeltaFields {
                stop_reason: Some("end_turn".to_string()),
            },
            usage: StreamUsage {
                input_tokens: 0,
                output_tokens: self.output_tokens,
            },
        });
        out.push(ClientStreamEvent::MessageStop {});
        self.state = State::Ended;
        out
    }

    fn message_start(&self) -> ClientStreamEvent {
        ClientStreamEvent::MessageStart {
            message: MessageEnvelope {
                id: self.message_id.clone(),
                model: self.model.clone(),
                role: "assistant",
                kind: "message",
                content: Vec::new(),
                stop_reason: None,
                usage: StreamUsage::default(),
            },
        }
    }

    fn handle_text(&mut self, content: String, out: &mut Vec<ClientStreamEvent>) {
        if self.options.suppress_duplicate_fragments
            && !content.trim().is_empty()
            && content.trim() == self.last_text_fragment.trim()
        {
            return;
        }

        if self.open_block != OpenBlock::Text {
            self.close_open_block(out);
            let index = self.next_index;
            self.next_index += 1;
            out.push(ClientStreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlockStart::Text {
                    text: String::new(),
                },
            });
            self.open_block = OpenBlock::Text;
        }

        self.output_tokens += 1;
        out.push(ClientStreamEvent::ContentBlockDelta {
            index: self.next_index - 1,
            delta: ContentBlockDelta::TextDelta {
                text: content.clone(),
            },
        });
        self.last_text_fragment = content;
    }

    fn handle_tool_use(
        &mut self,
        tool_use_id: String,
        name: Option<String>,
        input: Option<String>,
        out: &mut Vec<ClientStreamEvent>,
    ) -> Result<(), GatewayError> {
        let is_new_block = self.current_tool_use_id.as_deref() != Some(tool_use_id.as_str());

        if is_new_block {
            if self.emitted_tool_use_ids.contains(&tool_use_id) {
                return Err(GatewayError::CorruptFrame(format!(
                    "duplicate tool_use id {tool_use_id}"
                )));
            }
            self.close_open_block(out);
            let name = name.ok_or_else(|| {
                GatewayError::CorruptFrame("tool_use opened without a name".to_string())
            })?;

            let index = self.next_index;
            self.next_index += 1;
            out.push(ClientStreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlockStart::ToolUse {
                    id: tool_use_id.clone(),
                    name,
                },
            });
            self.open_block = OpenBlock::ToolUse;
            self.current_tool_use_index = Some(index);
            self.current_tool_use_id = Some(tool_use_id.clone());
            self.argument_buffer.clear();
            self.emitted_tool_use_ids.insert(tool_use_id);
        }

        if let Some(fragment) = input {
            self.argument_buffer.push_str(&fragment);
            let index = self
                .current_tool_use_index
                .expect("tool_use block index set above");
            out.push(ClientStreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::InputJsonDelta {
                    partial_json: fragment,
                },
            });
        }
        Ok(())
    }

    fn close_open_block(&mut self, out: &mut Vec<ClientStreamEvent>) {
        match self.open_block {
            OpenBlock::None => {}
            OpenBlock::Text => {
                out.push(ClientStreamEvent::ContentBlockStop {
                    index: self.next_index - 1,
                });
            }
            OpenBlock::ToolUse => {
                let index = self
                    .current_tool_use_index
                    .expect("tool_use block index set when opened");
                out.push(ClientStreamEvent::ContentBlockStop { index });
                self.current_tool_use_index = None;
                self.current_tool_use_id = None;
                self.argument_buffer.clear();
            }
        }
        self.open_block = OpenBlock::None;
        self.last_text_fragment.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_event(content: &str) -> BackendEvent {
        BackendEvent::AssistantResponse {
            content: content.to_string(),
        }
    }

    #[test]
    fn plain_text_stream_opens_one_block_and_closes_on_finalize() {
        let mut translator = EventTranslator::new("msg_1", "claude-x");
        let mut events = translator.translate(text_event("hello ")).unwrap();
        events.extend(translator.translate(text_event("world")).unwrap());
        events.extend(translator.finalize());

        assert!(matches!(events[0], ClientStreamEvent::MessageStart { .. }));
        assert!(matches!(
            events[1],
            ClientStreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlockStart::Text { .. }
            }
        ));
        assert!(matches!(
            events.last().unwrap(),
            ClientStreamEvent::MessageStop {}
        ));
    }

    #[test]
    fn exact_duplicate_fragment_is_suppressed_by_default() {
        let mut translator = EventTranslator::new("msg_1", "claude-x");
        translator.translate(text_event("the quick brown")).unwrap();
        let events = translator
            .translate(text_event("  the quick brown  "))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn non_duplicate_overlapping_fragment_is_kept_verbatim() {
        let mut translator = EventTranslator::new("msg_1", "claude-x");
        translator.translate(text_event("the quick brown")).unwrap();
        let events = translator
            .translate(text_event("brown fox jumps"))
            .unwrap();
        let ClientStreamEvent::ContentBlockDelta {
            delta: ContentBlockDelta::TextDelta { text },
            ..
        } = &events[0]
        else {
            panic!("expected a text delta");
        };
        assert_eq!(text, "brown fox jumps");
    }

    #[test]
    fn tool_call_transition_closes_text_block_first() {
        let mut translator = EventTranslator::new("msg_1", "claude-x");
        translator.translate(text_event("before tool")).unwrap();
        let events = translator
            .translate(BackendEvent::ToolUse {
                tool_use_id: "toolu_1".to_string(),
                name: Some("Write".to_string()),
                input: Some("{\"path\":\"a\"}".to_string()),
            })
            .unwrap();

        assert!(matches!(
            events[0],
            ClientStreamEvent::ContentBlockStop { index: 0 }
        ));
        assert!(matches!(
            events[1],
            ClientStreamEvent::ContentBlockStart {
                index: 1,
                content_block: ContentBlockStart::ToolUse { .. }
            }
        ));
    }

    #[test]
    fn duplicate_tool_use_id_after_close_is_rejected() {
        let mut translator = EventTranslator::new("msg_1", "claude-x");
        translator
            .translate(BackendEvent::ToolUse {
                tool_use_id: "toolu_1".to_string(),
                name: Some("Write".to_string()),
                input: Some("{}".to_string()),
            })
            .unwrap();
        translator.finalize();

        let mut translator2 = EventTranslator::new("msg_1", "claude-x");
        translator2
            .translate(BackendEvent::ToolUse {
                tool_use_id: "toolu_1".to_string(),
                name: Some("Write".to_string()),
                input: None,
            })
            .unwrap();
        let err = translator2
            .translate(BackendEvent::ToolUse {
                tool_use_id: "toolu_2".to_string(),
                name: Some("Read".to_string()),
                input: None,
            })
            .unwrap();
        assert!(matches!(
            err[0],
            ClientStreamEvent::ContentBlockStop { .. }
        ));

        let dup = translator2.translate(BackendEvent::ToolUse {
            tool_use_id: "toolu_1".to_string(),
            name: Some("Write".to_string()),
            input: None,
        });
        assert!(dup.is_err());
    }

    #[test]
    fn event_after_finalize_is_rejected() {
        let mut translator = EventTranslator::new("msg_1", "claude-x");
        translator.translate(text_event("hi")).unwrap();
        translator.finalize();
        let result = translator.translate(text_event("late"));
        assert!(result.is_err());
    }

    #[test]
    fn mid_stream_drop_finalizes_cleanly_from_whatever_was_open() {
        let mut translator = EventTranslator::new("msg_1", "claude-x");
        translator.translate(text_event("partial")).unwrap();
        let events = translator.finalize();
        assert!(events.iter().any(|e| matches!(
            e,
            ClientStreamEvent::ContentBlockStop { index: 0 }
        )));
        assert!(matches!(events.last().unwrap(), ClientStreamEvent::MessageStop {}));
    }
}
