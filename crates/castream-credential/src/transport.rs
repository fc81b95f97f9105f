use async_trait::async_trait;
use bytes::Bytes;

/// Minimal HTTP dependency `RefreshClient` and `UsageProbe` need. Kept
/// separate from the streaming backend client (`castream-core`'s
/// `BackendHttpClient`) because refresh/usage calls are small, buffered
/// request/response round trips, never streamed.
///
/// Injected rather than a global client: the teacher repo's global HTTP
/// singleton is exactly the anti-pattern spec §9 calls out to re-architect.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<TransportResponse, TransportError>;

    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
}
