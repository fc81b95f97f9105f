use bytes::{Buf, Bytes, BytesMut};
use castream_protocol::frame::{BackendEvent, Frame, FrameHeader, FrameHeaderValue};

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;

/// Whether a CRC mismatch aborts the whole stream or resyncs by scanning
/// forward a byte at a time (spec §4.8 / §9: either is spec-compliant, as
/// long as the implementation is consistent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameParserPolicy {
    Abort,
    Resync,
}

impl Default for FrameParserPolicy {
    fn default() -> Self {
        FrameParserPolicy::Abort
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParserOutcome {
    Event(BackendEvent),
    CorruptFrame(String),
}

/// Streaming parser over a byte stream that is not necessarily
/// message-aligned (spec §4.8). Owns its buffer; never silently drops bytes
/// except while resyncing.
pub struct FrameParser {
    buf: BytesMut,
    policy: FrameParserPolicy,
    aborted: bool,
}

enum Step {
    NeedMore,
    Frame(Frame),
    Corrupt(String),
}

impl FrameParser {
    pub fn new(policy: FrameParserPolicy) -> Self {
        Self {
            buf: BytesMut::new(),
            policy,
            aborted: false,
        }
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<ParserOutcome> {
        let mut out = Vec::new();
        if self.aborted {
            return out;
        }
        self.buf.extend_from_slice(chunk);

        loop {
            match self.try_parse_one() {
                Step::NeedMore => break,
                Step::Frame(frame) => out.push(ParserOutcome::Event(decode_event(frame))),
                Step::Corrupt(message) => {
                    out.push(ParserOutcome::CorruptFrame(message));
                    match self.policy {
                        FrameParserPolicy::Abort => {
                            self.aborted = true;
                            break;
                        }
                        FrameParserPolicy::Resync => {
                            if self.buf.is_empty() {
                                break;
                            }
                            self.buf.advance(1);
                        }
                    }
                }
            }
        }
        out
    }

    fn try_parse_one(&mut self) -> Step {
        if self.buf.len() < PRELUDE_LEN {
            return Step::NeedMore;
        }
        let total_length = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
        let headers_length = u32::from_be_bytes(self.buf[4..8].try_into().unwrap()) as usize;
        let prelude_crc = u32::from_be_bytes(self.buf[8..12].try_into().unwrap());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.buf[0..8]);
        if hasher.finalize() != prelude_crc {
            return Step::Corrupt("prelude checksum mismatch".to_string());
        }

        if total_length < headers_length + PRELUDE_LEN + TRAILER_LEN {
            return Step::Corrupt("total_length too small for headers/trailer".to_string());
        }
        if self.buf.len() < total_length {
            return Step::NeedMore;
        }

        let message_crc =
            u32::from_be_bytes(self.buf[total_length - 4..total_length].try_into().unwrap());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.buf[0..total_length - TRAILER_LEN]);
        if hasher.finalize() != message_crc {
            return Step::Corrupt("message checksum mismatch".to_string());
        }

        let header_bytes = self.buf[PRELUDE_LEN..PRELUDE_LEN + headers_length].to_vec();
        let headers = match parse_headers(&header_bytes) {
            Ok(headers) => headers,
            Err(message) => return Step::Corrupt(message),
        };

        let payload_start = PRELUDE_LEN + headers_length;
        let payload_end = total_length - TRAILER_LEN;
        let payload = Bytes::copy_from_slice(&self.buf[payload_start..payload_end]);

        self.buf.advance(total_length);
        Step::Frame(Frame { headers, payload })
    }
}

/// Header block: a sequence of `(name_length u8, name, value_type u8,
/// value)`. Value-type layouts mirror the AWS event-stream wire format this
/// backend protocol is built on; type 7 (UTF-8 string, 2-byte length
/// prefix) is what this protocol actually emits.
fn parse_headers(bytes: &[u8]) -> Result<Vec<FrameHeader>, String> {
    let mut headers = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        if cursor + 1 > bytes.len() {
            return Err("truncated header name length".to_string());
        }
        let name_length = bytes[cursor] as usize;
        cursor += 1;
        if cursor + name_length > bytes.len() {
            return Err("truncated header name".to_string());
        }
        let name = String::from_utf8(bytes[cursor..cursor + name_length].to_vec())
            .map_err(|_| "header name is not valid utf-8".to_string())?;
        cursor += name_length;

        if cursor + 1 > bytes.len() {
            return Err("truncated header value type".to_string());
        }
        let value_type = bytes[cursor];
        cursor += 1;

        let (value, consumed) = read_header_value(value_type, &bytes[cursor..])?;
        cursor += consumed;
        headers.push(FrameHeader { name, value });
    }
    Ok(headers)
}

fn read_header_value(value_type: u8, rest: &[u8]) -> Result<(FrameHeaderValue, usize), String> {
    match value_type {
        0 | 1 => Ok((FrameHeaderValue::Bytes(Bytes::new()), 0)),
        2 => take_fixed(rest, 1),
        3 => take_fixed(rest, 2),
        4 => take_fixed(rest, 4),
        5 | 8 => take_fixed(rest, 8),
        9 => take_fixed(rest, 16),
        6 => take_length_prefixed(rest, false),
        7 => take_length_prefixed(rest, true),
        other => Err(format!("unsupported header value-type tag {other}")),
    }
}

fn take_fixed(rest: &[u8], len: usize) -> Result<(FrameHeaderValue, usize), String> {
    if rest.len() < len {
        return Err("truncated fixed-width header value".to_string());
    }
    Ok((
        FrameHeaderValue::Bytes(Bytes::copy_from_slice(&rest[..len])),
        len,
    ))
}

fn take_length_prefixed(
    rest: &[u8],
    as_string: bool,
) -> Result<(FrameHeaderValue, usize), String> {
    if rest.len() < 2 {
        return Err("truncated header value length".to_string());
    }
    let len = u16::from_be_bytes(rest[0..2].try_into().unwrap()) as usize;
    if rest.len() < 2 + len {
        return Err("truncated header value".to_string());
    }
    let raw = &rest[2..2 + len];
    let value = if as_string {
        match std::str::from_utf8(raw) {
            Ok(s) => FrameHeaderValue::String(s.to_string()),
            Err(_) => FrameHeaderValue::Bytes(Bytes::copy_from_slice(raw)),
        }
    } else {
        FrameHeaderValue::Bytes(Bytes::copy_from_slice(raw))
    };
    Ok((value, 2 + len))
}

fn decode_event(frame: Frame) -> BackendEvent {
    let event_type = frame.event_type().map(str::to_string);
    match event_type.as_deref() {
        Some("assistantResponseEvent") => {
            let content = serde_json::from_slice::<serde_json::Value>(&frame.payload)
                .ok()
                .and_then(|v| v.get("content").and_then(|c| c.as_str()).map(str::to_string))
                .unwrap_or_default();
            BackendEvent::AssistantResponse { content }
        }
        Some("toolUseEvent") => {
            let payload: serde_json::Value =
                serde_json::from_slice(&frame.payload).unwrap_or(serde_json::Value::Null);
            let tool_use_id = payload
                .get("toolUseId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let name = payload
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let input = payload
                .get("input")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            BackendEvent::ToolUse {
                tool_use_id,
                name,
                input,
            }
        }
        _ => BackendEvent::Unknown {
            event_type,
            payload: frame.payload,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        let total_length = (PRELUDE_LEN + headers.len() + payload.len() + TRAILER_LEN) as u32;

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

    #[test]
    fn parses_two_fragments_in_one_push() {
        let mut bytes = assistant_frame("Immersive Weather Car");
        bytes.extend(assistant_frame("d: Native Web Design & Dynamic Effects"));

        let mut parser = FrameParser::new(FrameParserPolicy::Abort);
        let events = parser.push_bytes(&bytes);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ParserOutcome::Event(BackendEvent::AssistantResponse {
                content: "Immersive Weather Car".to_string()
            })
        );
    }

    #[test]
    fn handles_frame_split_across_chunks() {
        let bytes = assistant_frame("hello");
        let mut parser = FrameParser::new(FrameParserPolicy::Abort);
        let mid = bytes.len() / 2;
        assert!(parser.push_bytes(&bytes[..mid]).is_empty());
        let events = parser.push_bytes(&bytes[mid..]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn tool_use_event_carries_id_name_and_input_chunk() {
        let headers = encode_string_header(":event-type", "toolUseEvent");
        let payload = serde_json::json!({
            "toolUseId": "toolUse_1",
            "name": "Write",
            "input": "{\"path\":",
        })
        .to_string();
        let bytes = encode_frame(&headers, payload.as_bytes());

        let mut parser = FrameParser::new(FrameParserPolicy::Abort);
        let events = parser.push_bytes(&bytes);
        assert_eq!(
            events[0],
            ParserOutcome::Event(BackendEvent::ToolUse {
                tool_use_id: "toolUse_1".to_string(),
                name: Some("Write".to_string()),
                input: Some("{\"path\":".to_string()),
            })
        );
    }

    #[test]
    fn corrupt_prelude_crc_aborts_by_default() {
        let mut bytes = assistant_frame("hello");
        bytes[0] ^= 0xFF;
        let mut parser = FrameParser::new(FrameParserPolicy::Abort);
        let events = parser.push_bytes(&bytes);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ParserOutcome::CorruptFrame(_)));
        // No fabricated events after the abort.
        assert!(parser.push_bytes(b"more garbage").is_empty());
    }

    #[test]
    fn resync_policy_recovers_suffix_frames() {
        let mut bytes = vec![0xAB, 0xCD, 0xEF];
        bytes.extend(assistant_frame("recovered"));
        let mut parser = FrameParser::new(FrameParserPolicy::Resync);
        let events = parser.push_bytes(&bytes);
        assert!(events.iter().any(|e| matches!(e, ParserOutcome::CorruptFrame(_))));
        assert!(events.iter().any(|e| matches!(
            e,
            ParserOutcome::Event(BackendEvent::AssistantResponse { content }) if content == "recovered"
        )));
    }

    #[test]
    fn unknown_event_type_is_surfaced_not_dropped() {
        let headers = encode_string_header(":event-type", "somethingElse");
        let bytes = encode_frame(&headers, b"{}");
        let mut parser = FrameParser::new(FrameParserPolicy::Abort);
        let events = parser.push_bytes(&bytes);
        assert!(matches!(
            events[0],
            ParserOutcome::Event(BackendEvent::Unknown { .. })
        ));
    }
}
