use bytes::Bytes;

/// One decoded backend binary frame (spec §3 `Frame`): a length-prefixed,
/// CRC-checksummed header block followed by an opaque payload.
///
/// Header value-type 7 (UTF-8 string) is the only tag the backend actually
/// uses; anything else is kept as raw bytes rather than dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: Vec<FrameHeader>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub name: String,
    pub value: FrameHeaderValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameHeaderValue {
    String(String),
    Bytes(Bytes),
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&FrameHeaderValue> {
        self.headers.iter().find(|h| h.name == name).map(|h| &h.value)
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        match self.header(name) {
            Some(FrameHeaderValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header_str(":event-type")
    }
}

/// A decoded backend event (spec §3 `BackendEvent`), discriminated by the
/// frame's `:event-type` header.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    AssistantResponse { content: String },
    ToolUse {
        tool_use_id: String,
        name: Option<String>,
        input: Option<String>,
    },
    Unknown { event_type: Option<String>, payload: Bytes },
}
