use std::sync::Arc;

use bytes::Bytes;
use castream_codec::{EventTranslator, FrameParser, FrameParserPolicy, ParserOutcome, TranslatorOptions};
use castream_common::time_util::unix_now;
use castream_common::GatewayError;
use castream_credential::CredentialManager;
use castream_protocol::canonical::{
    CanonicalContentPart, CanonicalMessage, CanonicalRequest, CanonicalResponse, CanonicalRole,
    CanonicalTool, ClientStreamEvent, ContentBlockDelta, ContentBlockStart, StreamUsage,
};
use castream_protocol::sse::encode_sse;
use castream_transform::{
    encode_anthropic_event, encode_openai_chunk, encode_openai_done, synthesize_anthropic_response,
    synthesize_openai_response, OpenAiStreamState,
};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend_client::{BackendBody, BackendHttpClient, BackendRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Anthropic,
    OpenAi,
}

pub enum PipelineResponse {
    Stream(mpsc::Receiver<Bytes>),
    Once(Bytes),
}

/// Per-request orchestrator (spec §4.11): decode has already happened by the
/// time `handle` is called (the gateway layer owns dialect decoding so this
/// type only needs the canonical shape); this owns acquire -> backend call
/// -> transcode-and-flush -> finalize, plus the 401/403 retry-once rule and
/// cancellation propagation.
pub struct StreamingPipeline {
    credentials: Arc<CredentialManager>,
    backend: Arc<dyn BackendHttpClient>,
    backend_endpoint: String,
    frame_resync_policy: FrameParserPolicy,
    translator_options: TranslatorOptions,
}

impl StreamingPipeline {
    pub fn new(
        credentials: Arc<CredentialManager>,
        backend: Arc<dyn BackendHttpClient>,
        backend_endpoint: String,
        frame_resync_policy: FrameParserPolicy,
        translator_options: TranslatorOptions,
    ) -> Self {
        Self {
            credentials,
            backend,
            backend_endpoint,
            frame_resync_policy,
            translator_options,
        }
    }

    pub async fn handle(
        &self,
        dialect: Dialect,
        request: CanonicalRequest,
        cancel: CancellationToken,
    ) -> Result<PipelineResponse, GatewayError> {
        if request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }

        let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        let model = request.model.clone();
        let wants_stream = request.stream;
        let backend_body = Bytes::from(
            serde_json::to_vec(&canonical_to_backend_json(&request))
                .map_err(|err| GatewayError::Internal(err.to_string()))?,
        );

        let mut retried = false;
        loop {
            let now = unix_now();
            let (slot, credential) = self
                .credentials
                .acquire_with_slot(now, &cancel)
                .await
                .map_err(|_| GatewayError::Unavailable)?;

            let response = self
                .backend
                .post_event_stream(BackendRequest {
                    url: self.backend_endpoint.clone(),
                    access_token: credential.access_secret.clone(),
                    body: backend_body.clone(),
                })
                .await?;

            if response.status == 401 || response.status == 403 {
                self.credentials.invalidate(slot).await;
                if retried {
                    return Err(GatewayError::UpstreamRejected(format!(
                        "backend rejected the credential twice (status {})",
                        response.status
                    )));
                }
                retried = true;
                continue;
            }
            if !(200..300).contains(&response.status) {
                let detail = match response.body {
                    BackendBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    BackendBody::Stream(_) => String::new(),
                };
                return Err(GatewayError::UpstreamRejected(format!(
                    "backend returned status {}: {detail}",
                    response.status
                )));
            }

            let backend_stream = match response.body {
                BackendBody::Stream(rx) => rx,
                BackendBody::Bytes(bytes) => {
                    let (tx, rx) = mpsc::channel(1);
                    let _ = tx.try_send(bytes);
                    rx
                }
            };

            return Ok(self
                .translate(dialect, message_id, model, wants_stream, backend_stream, cancel)
                .await);
        }
    }

    async fn translate(
        &self,
        dialect: Dialect,
        message_id: String,
        model: String,
        wants_stream: bool,
        mut backend_stream: mpsc::Receiver<Bytes>,
        cancel: CancellationToken,
    ) -> PipelineResponse {
        let translator_options = self.translator_options;
        let frame_policy = self.frame_resync_policy;

        if wants_stream {
            let (tx, rx) = mpsc::channel::<Bytes>(32);
            tokio::spawn(async move {
                let mut parser = FrameParser::new(frame_policy);
                let mut translator =
                    EventTranslator::with_options(message_id.as_str(), model.as_str(), translator_options);
                let mut openai_state = OpenAiStreamState::new();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        maybe_chunk = backend_stream.recv() => {
                            let Some(chunk) = maybe_chunk else { break };
                            for outcome in parser.push_bytes(&chunk) {
                                match outcome {
                                    ParserOutcome::Event(event) => {
                                        let Ok(client_events) = translator.translate(event) else { return };
                                        for client_event in &client_events {
                                            if !send_event(dialect, &tx, &message_id, &model, client_event, &mut openai_state).await {
                                                return;
                                            }
                                        }
                                    }
                                    ParserOutcome::CorruptFrame(message) => {
                                        if frame_policy == FrameParserPolicy::Abort {
                                            send_error_event(dialect, &tx, &GatewayError::CorruptFrame(message)).await;
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }

                for client_event in translator.finalize() {
                    if !send_event(dialect, &tx, &message_id, &model, &client_event, &mut openai_state).await {
                        return;
                    }
                }
                if dialect == Dialect::OpenAi {
                    let _ = tx.send(encode_openai_done()).await;
                }
            });
            PipelineResponse::Stream(rx)
        } else {
            let mut parser = FrameParser::new(frame_policy);
            let mut translator =
                EventTranslator::with_options(message_id.as_str(), model.as_str(), translator_options);
            let mut collected = Vec::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_chunk = backend_stream.recv() => {
                        let Some(chunk) = maybe_chunk else { break };
                        for outcome in parser.push_bytes(&chunk) {
                            if let ParserOutcome::Event(event) = outcome
                                && let Ok(events) = translator.translate(event) {
                                collected.extend(events);
                            }
                        }
                    }
                }
            }
            collected.extend(translator.finalize());

            let response = fold_canonical_response(&message_id, &model, &collected);
            let body = match dialect {
                Dialect::Anthropic => {
                    serde_json::to_vec(&synthesize_anthropic_response(response)).unwrap_or_default()
                }
                Dialect::OpenAi => {
                    serde_json::to_vec(&synthesize_openai_response(response)).unwrap_or_default()
                }
            };
            PipelineResponse::Once(Bytes::from(body))
        }
    }
}

async fn send_event(
    dialect: Dialect,
    tx: &mpsc::Sender<Bytes>,
    id: &str,
    model: &str,
    event: &ClientStreamEvent,
    state: &mut OpenAiStreamState,
) -> bool {
    let bytes = match dialect {
        Dialect::Anthropic => Some(encode_anthropic_event(event)),
        Dialect::OpenAi => encode_openai_chunk(event, id, model, state),
    };
    match bytes {
        Some(bytes) => tx.send(bytes).await.is_ok(),
        None => true,
    }
}

async fn send_error_event(dialect: Dialect, tx: &mpsc::Sender<Bytes>, err: &GatewayError) {
    let payload = serde_json::json!({
        "type": "error",
        "error": {
            "type": err.sse_error_type(),
            "message": err.to_string(),
        }
    });
    let bytes = match dialect {
        Dialect::Anthropic => encode_sse(Some("error"), &payload.to_string()),
        Dialect::OpenAi => encode_sse(None, &payload.to_string()),
    };
    let _ = tx.send(bytes).await;
}

fn canonical_to_backend_json(request: &CanonicalRequest) -> JsonValue {
    serde_json::json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "system": request.system,
        "messages": request.messages.iter().map(message_to_json).collect::<Vec<_>>(),
        "tools": request.tools.as_ref().map(|tools| tools.iter().map(tool_to_json).collect::<Vec<_>>()),
    })
}

fn message_to_json(message: &CanonicalMessage) -> JsonValue {
    serde_json::json!({
        "role": match message.role {
            CanonicalRole::User => "user",
            CanonicalRole::Assistant => "assistant",
        },
        "content": message.content.iter().map(content_part_request_json).collect::<Vec<_>>(),
    })
}

fn content_part_request_json(part: &CanonicalContentPart) -> JsonValue {
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

fn tool_to_json(tool: &CanonicalTool) -> JsonValue {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

#[derive(Default)]
struct FoldingBlock {
    is_tool: bool,
    text: String,
    tool_id: String,
    tool_name: String,
    tool_args: String,
}

fn fold_canonical_response(id: &str, model: &str, events: &[ClientStreamEvent]) -> CanonicalResponse {
    let mut blocks: Vec<FoldingBlock> = Vec::new();
    let mut content = Vec::new();
    let mut stop_reason: &'static str = "end_turn";
    let mut usage = StreamUsage::default();

    for event in events {
        match event {
            ClientStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let idx = *index as usize;
                if blocks.len() <= idx {
                    blocks.resize_with(idx + 1, FoldingBlock::default);
                }
                blocks[idx] = match content_block {
                    ContentBlockStart::Text { text } => FoldingBlock {
                        is_tool: false,
                        text: text.clone(),
                        ..Default::default()
                    },
                    ContentBlockStart::ToolUse { id, name } => FoldingBlock {
                        is_tool: true,
                        tool_id: id.clone(),
                        tool_name: name.clone(),
                        ..Default::default()
                    },
                };
            }
            ClientStreamEvent::ContentBlockDelta { index, delta } => {
                if let Some(block) = blocks.get_mut(*index as usize) {
                    match delta {
                        ContentBlockDelta::TextDelta { text } => block.text.push_str(text),
                        ContentBlockDelta::InputJsonDelta { partial_json } => {
                            block.tool_args.push_str(partial_json)
                        }
                    }
                }
            }
            ClientStreamEvent::ContentBlockStop { index } => {
                if let Some(block) = blocks.get(*index as usize) {
                    if block.is_tool {
                        let input: JsonValue =
                            serde_json::from_str(&block.tool_args).unwrap_or(JsonValue::Null);
                        content.push(CanonicalContentPart::ToolUse {
                            id: block.tool_id.clone(),
                            name: block.tool_name.clone(),
                            input,
                        });
                    } else {
                        content.push(CanonicalContentPart::Text(block.text.clone()));
                    }
                }
            }
            ClientStreamEvent::MessageDelta { delta, usage: u } => {
                if let Some(reason) = &delta.stop_reason {
                    stop_reason = normalize_stop_reason(reason);
                }
                usage = *u;
            }
            _ => {}
        }
    }

    if stop_reason == "end_turn"
        && content
            .iter()
            .any(|part| matches!(part, CanonicalContentPart::ToolUse { .. }))
    {
        stop_reason = "tool_use";
    }

    CanonicalResponse {
        id: id.to_string(),
        model: model.to_string(),
        content,
        stop_reason,
        usage,
    }
}

fn normalize_stop_reason(reason: &str) -> &'static str {
    match reason {
        "tool_use" => "tool_use",
        "max_tokens" => "max_tokens",
        _ => "end_turn",
    }
}
