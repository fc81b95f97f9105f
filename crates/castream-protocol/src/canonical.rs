use serde::Serialize;
use serde_json::Value as JsonValue;

/// The canonical request both client dialects normalize to and from (spec
/// §4.10). A `RequestTranscoder` produces this from Dialect A or B; the
/// `StreamingPipeline` never looks at a dialect-specific shape directly.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest {
    pub model: String,
    pub max_tokens: u32,
    pub stream: bool,
    pub system: Option<String>,
    pub messages: Vec<CanonicalMessage>,
    pub tools: Option<Vec<CanonicalTool>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    pub content: Vec<CanonicalContentPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalContentPart {
    Text(String),
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: JsonValue,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: JsonValue,
}

/// The client-facing SSE event vocabulary (spec §3/§4.9), shared by both
/// client dialects. Dialect A serializes this near-verbatim; Dialect B's
/// encoder repackages it into `choices[0].delta` chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientStreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageEnvelope },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: u32,
        content_block: ContentBlockStart,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u32, delta: ContentBlockDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: u32 },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaFields,
        usage: StreamUsage,
    },
    #[serde(rename = "message_stop")]
    MessageStop {},
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub model: String,
    pub role: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: Vec<JsonValue>,
    pub stop_reason: Option<String>,
    pub usage: StreamUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct StreamUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlockStart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageDeltaFields {
    pub stop_reason: Option<String>,
}

/// A single synthesized (non-streaming) response document, dialect-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<CanonicalContentPart>,
    pub stop_reason: &'static str,
    pub usage: StreamUsage,
}
