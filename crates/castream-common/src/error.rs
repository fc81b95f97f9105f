pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error taxonomy shared by the credential, codec, and pipeline layers.
///
/// Mirrors spec §7's surface taxonomy; `class()` decides how a
/// `StreamingPipeline` turns an error into an HTTP status or an SSE error
/// frame.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("no credential slot yielded a working credential")]
    Unavailable,

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("upstream rejected the request: {0}")]
    UpstreamRejected(String),

    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    Unauthorized,
    ServiceUnavailable,
    /// Surfaced as an HTTP 500 pre-flush, or an SSE error frame mid-stream.
    Internal,
    /// Quiet close; never reported to the client.
    Cancelled,
}

impl GatewayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::InvalidRequest(_) => ErrorClass::BadRequest,
            GatewayError::Unauthorized => ErrorClass::Unauthorized,
            GatewayError::Unavailable => ErrorClass::ServiceUnavailable,
            GatewayError::UpstreamTransport(_)
            | GatewayError::UpstreamRejected(_)
            | GatewayError::CorruptFrame(_)
            | GatewayError::Internal(_) => ErrorClass::Internal,
            GatewayError::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::BadRequest => 400,
            ErrorClass::Unauthorized => 401,
            ErrorClass::ServiceUnavailable => 503,
            ErrorClass::Internal => 500,
            ErrorClass::Cancelled => 499,
        }
    }

    /// The `type` field the gateway puts into an SSE `error` event's data
    /// payload when this error is raised after bytes have already reached
    /// the client.
    pub fn sse_error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::Unauthorized => "authentication_error",
            GatewayError::Unavailable => "overloaded_error",
            GatewayError::UpstreamTransport(_) => "api_error",
            GatewayError::UpstreamRejected(_) => "api_error",
            GatewayError::CorruptFrame(_) => "api_error",
            GatewayError::Cancelled => "api_error",
            GatewayError::Internal(_) => "api_error",
        }
    }
}
