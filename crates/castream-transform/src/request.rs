use castream_common::GatewayError;
use castream_protocol::anthropic::{ContentPart, MessageContent, MessagesRequest, RequestMessage, SystemField, ToolResultContent};
use castream_protocol::canonical::{CanonicalContentPart, CanonicalMessage, CanonicalRequest, CanonicalRole, CanonicalTool};
use castream_protocol::openai::ChatCompletionsRequest;

/// Dialect A -> canonical (spec §4.10). Cache-control hints are discarded;
/// they have no canonical representation.
pub fn decode_anthropic(request: MessagesRequest) -> Result<CanonicalRequest, GatewayError> {
    let system = request.system.map(flatten_system);
    let messages = request
        .messages
        .into_iter()
        .map(decode_anthropic_message)
        .collect::<Result<Vec<_>, _>>()?;
    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| CanonicalTool {
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
            })
            .collect()
    });

    Ok(CanonicalRequest {
        model: request.model,
        max_tokens: request.max_tokens,
        stream: request.stream,
        system,
        messages,
        tools,
    })
}

fn flatten_system(field: SystemField) -> String {
    match field {
        SystemField::Text(text) => text,
        SystemField::Blocks(blocks) => blocks
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn decode_anthropic_message(message: RequestMessage) -> Result<CanonicalMessage, GatewayError> {
    let role = decode_role(&message.role)?;
    let content = match message.content {
        MessageContent::Text(text) => vec![CanonicalContentPart::Text(text)],
        MessageContent::Parts(parts) => parts
            .into_iter()
            .map(decode_anthropic_part)
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(CanonicalMessage { role, content })
}

fn decode_anthropic_part(part: ContentPart) -> Result<CanonicalContentPart, GatewayError> {
    Ok(match part {
        ContentPart::Text { text, .. } => CanonicalContentPart::Text(text),
        ContentPart::ToolUse { id, name, input } => CanonicalContentPart::ToolUse { id, name, input },
        ContentPart::ToolResult {
            tool_use_id,
            content,
        } => CanonicalContentPart::ToolResult {
            tool_use_id,
            content: flatten_tool_result(content),
        },
    })
}

fn flatten_tool_result(content: Option<ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text,
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    }
}

fn decode_role(role: &str) -> Result<CanonicalRole, GatewayError> {
    match role {
        "user" => Ok(CanonicalRole::User),
        "assistant" => Ok(CanonicalRole::Assistant),
        other => Err(GatewayError::InvalidRequest(format!(
            "unsupported message role '{other}'"
        ))),
    }
}

/// Dialect B -> canonical (spec §4.10). `system`-role messages fold into
/// the canonical `system` field; `tool`-role messages become
/// `ToolResult` content parts on a user turn, matching Dialect A's shape.
pub fn decode_openai(request: ChatCompletionsRequest) -> Result<CanonicalRequest, GatewayError> {
    let max_tokens = request
        .max_completion_tokens
        .or(request.max_tokens)
        .ok_or_else(|| GatewayError::InvalidRequest("max_tokens is required".to_string()))?;

    let mut system_parts = Vec::new();
    let mut messages = Vec::new();
    for message in request.messages {
        match message.role.as_str() {
            "system" => {
                if let Some(content) = message.content {
                    system_parts.push(content);
                }
            }
            "tool" => {
                let tool_use_id = message.tool_call_id.ok_or_else(|| {
                    GatewayError::InvalidRequest("tool message missing tool_call_id".to_string())
                })?;
                messages.push(CanonicalMessage {
                    role: CanonicalRole::User,
                    content: vec![CanonicalContentPart::ToolResult {
                        tool_use_id,
                        content: message.content.unwrap_or_default(),
                    }],
                });
            }
            other => {
                let role = decode_role(other)?;
                let content = match message.content {
                    Some(text) => vec![CanonicalContentPart::Text(text)],
                    None => Vec::new(),
                };
                messages.push(CanonicalMessage { role, content });
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| CanonicalTool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool.function.parameters,
            })
            .collect()
    });

    Ok(CanonicalRequest {
        model: request.model,
        max_tokens,
        stream: request.stream,
        system,
        messages,
        tools,
    })
}
