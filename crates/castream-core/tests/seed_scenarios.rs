//! End-to-end replay scenarios from spec.md §8, driven through the full
//! acquire -> backend call -> frame-parse -> translate -> SSE pipeline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use castream_codec::FrameParserPolicy;
use castream_common::GatewayError;
use castream_core::{
    BackendBody, BackendHttpClient, BackendRequest, BackendResponse, Dialect, PipelineResponse,
    StreamingPipeline,
};
use castream_credential::refresh_client::RefreshClientConfig;
use castream_credential::{
    AuthKind, CredentialDescriptor, CredentialManager, HttpTransport, ManagerConfig, RefreshClient,
    TransportError, TransportResponse,
};
use castream_protocol::canonical::{
    CanonicalContentPart, CanonicalMessage, CanonicalRequest, CanonicalRole,
};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct StubTransport;

#[async_trait]
impl HttpTransport for StubTransport {
    async fn post_json(
        &self,
        _url: &str,
        _headers: &[(String, String)],
        _body: JsonValue,
    ) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: 200,
            body: Bytes::from(serde_json::json!({"accessToken": "at", "expiresIn": 3600}).to_string()),
        })
    }

    async fn get(
        &self,
        _url: &str,
        _headers: &[(String, String)],
        _query: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        unimplemented!()
    }
}

fn manager() -> Arc<CredentialManager> {
    let descriptors = vec![CredentialDescriptor {
        slot_index: 0,
        auth_kind: AuthKind::Social,
        refresh_secret: "rt".to_string(),
        client_id: None,
        client_secret: None,
        disabled: false,
    }];
    let refresh_client = Arc::new(RefreshClient::new(Arc::new(StubTransport), RefreshClientConfig::default()));
    Arc::new(CredentialManager::new(descriptors, refresh_client, ManagerConfig::default()))
}

struct StubBackend {
    frames: Mutex<Option<Bytes>>,
    calls: AtomicU32,
}

impl StubBackend {
    fn once(frames: Bytes) -> Self {
        Self {
            frames: Mutex::new(Some(frames)),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl BackendHttpClient for StubBackend {
    async fn post_event_stream(&self, _request: BackendRequest) -> Result<BackendResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let frames = self.frames.lock().unwrap().take().unwrap_or_default();
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(frames);
        Ok(BackendResponse {
            status: 200,
            body: BackendBody::Stream(rx),
        })
    }
}

fn encode_string_header(name: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out.push(7u8);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    out
}

fn encode_frame(headers: &[u8], payload: &[u8]) -> Vec<u8> {
    let headers_length = headers.len() as u32;
    let total_length = (12 + headers.len() + payload.len() + 4) as u32;

    let mut out = Vec::new();
    out.extend_from_slice(&total_length.to_be_bytes());
    out.extend_from_slice(&headers_length.to_be_bytes());
    let mut prelude_hasher = crc32fast::Hasher::new();
    prelude_hasher.update(&out);
    out.extend_from_slice(&prelude_hasher.finalize().to_be_bytes());
    out.extend_from_slice(headers);
    out.extend_from_slice(payload);
    let mut message_hasher = crc32fast::Hasher::new();
    message_hasher.update(&out);
    out.extend_from_slice(&message_hasher.finalize().to_be_bytes());
    out
}

fn assistant_frame(content: &str) -> Vec<u8> {
    let headers = encode_string_header(":event-type", "assistantResponseEvent");
    let payload = serde_json::json!({ "content": content }).to_string();
    encode_frame(&headers, payload.as_bytes())
}

fn tool_use_frame(tool_use_id: &str, name: &str, input: &str) -> Vec<u8> {
    let headers = encode_string_header(":event-type", "toolUseEvent");
    let payload = serde_json::json!({
        "toolUseId": tool_use_id,
        "name": name,
        "input": input,
    })
    .to_string();
    encode_frame(&headers, payload.as_bytes())
}

fn sample_request() -> CanonicalRequest {
    CanonicalRequest {
        model: "claude-x".to_string(),
        max_tokens: 64,
        stream: true,
        system: None,
        messages: vec![CanonicalMessage {
            role: CanonicalRole::User,
            content: vec![CanonicalContentPart::Text("hi".to_string())],
        }],
        tools: None,
    }
}

fn pipeline(backend: Arc<StubBackend>) -> StreamingPipeline {
    StreamingPipeline::new(
        manager(),
        backend,
        "http://backend.invalid".to_string(),
        FrameParserPolicy::Abort,
        castream_codec::TranslatorOptions::default(),
    )
}

async fn drain(response: PipelineResponse) -> Vec<String> {
    let PipelineResponse::Stream(mut rx) = response else {
        panic!("expected a stream");
    };
    let mut frames = Vec::new();
    while let Some(chunk) = rx.recv().await {
        frames.push(String::from_utf8(chunk.to_vec()).unwrap());
    }
    frames
}

/// Scenario 1: plain text, two fragments forming one text block.
#[tokio::test]
async fn plain_text_scenario_emits_one_text_block() {
    let mut bytes = assistant_frame("Immersive Weather Car");
    bytes.extend(assistant_frame("d: Native Web Design & Dynamic Effects"));
    let backend = Arc::new(StubBackend::once(Bytes::from(bytes)));
    let pipeline = pipeline(backend);

    let response = pipeline
        .handle(Dialect::Anthropic, sample_request(), CancellationToken::new())
        .await
        .unwrap();
    let frames = drain(response).await;

    let joined = frames.join("");
    assert!(joined.contains("content_block_start"));
    assert!(joined.contains("Immersive Weather Car"));
    assert!(joined.contains("Native Web Design"));
    assert_eq!(frames.iter().filter(|f| f.starts_with("event: content_block_start")).count(), 1);
}

/// Scenario 2: interleaved fragments reassembling one literal JSON-looking string.
#[tokio::test]
async fn interleaved_fragments_reassemble_the_literal_text() {
    let literal = "{\"isNewTopic\": true,\n    \"title\": \"Weather Card\"\n}";
    let pieces = ["{\"isNewTopic\": ", "true,\n    \"title\"", ": \"Weather", " Card\"", "\n}"];
    assert_eq!(pieces.concat(), literal);

    let mut bytes = Vec::new();
    for piece in pieces {
        bytes.extend(assistant_frame(piece));
    }
    let backend = Arc::new(StubBackend::once(Bytes::from(bytes)));
    let pipeline = pipeline(backend);

    let response = pipeline
        .handle(Dialect::Anthropic, sample_request(), CancellationToken::new())
        .await
        .unwrap();
    let frames = drain(response).await;

    let deltas: String = frames
        .iter()
        .filter(|f| f.starts_with("event: content_block_delta"))
        .map(|f| {
            let data_line = f.lines().find(|l| l.starts_with("data:")).unwrap();
            let json: JsonValue = serde_json::from_str(data_line.trim_start_matches("data:").trim()).unwrap();
            json["delta"]["text"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(deltas, literal);
}

/// Scenario 3: text then a tool call; tool-use block opens at the next index.
#[tokio::test]
async fn tool_call_transition_opens_a_new_block() {
    let mut bytes = assistant_frame("let me check that");
    bytes.extend(tool_use_frame("toolUse_1DCqyICMR-CfTS36UNNiwA", "Write", "{}"));
    let backend = Arc::new(StubBackend::once(Bytes::from(bytes)));
    let pipeline = pipeline(backend);

    let response = pipeline
        .handle(Dialect::Anthropic, sample_request(), CancellationToken::new())
        .await
        .unwrap();
    let frames = drain(response).await;
    let joined = frames.join("");

    assert!(joined.contains("\"index\":0"));
    assert!(joined.contains("\"index\":1"));
    assert!(joined.contains("toolUse_1DCqyICMR-CfTS36UNNiwA"));
    assert!(joined.contains("\"name\":\"Write\""));
}

/// Scenario 6: the backend stream ends after one fragment; the client still
/// sees a clean close, not a bare termination.
#[tokio::test]
async fn mid_stream_drop_still_closes_the_message_cleanly() {
    let bytes = assistant_frame("partial answer");
    let backend = Arc::new(StubBackend::once(Bytes::from(bytes)));
    let pipeline = pipeline(backend);

    let response = pipeline
        .handle(Dialect::Anthropic, sample_request(), CancellationToken::new())
        .await
        .unwrap();
    let frames = drain(response).await;

    let names: Vec<&str> = frames
        .iter()
        .filter_map(|f| f.strip_prefix("event: ").and_then(|rest| rest.split('\n').next()))
        .collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
}
