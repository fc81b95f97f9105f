use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use castream_common::GatewayError;
use futures_util::StreamExt;
use tokio::sync::mpsc;

/// Outbound request to the model backend.
pub struct BackendRequest {
    pub url: String,
    pub access_token: String,
    pub body: Bytes,
}

pub enum BackendBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct BackendResponse {
    pub status: u16,
    pub body: BackendBody,
}

/// Seam over the HTTP client so the pipeline never touches `wreq` directly
/// (spec §9 design note: no global client singleton) — grounded on the
/// teacher's `UpstreamClient` trait / `WreqUpstreamClient` pair.
#[async_trait]
pub trait BackendHttpClient: Send + Sync {
    async fn post_event_stream(&self, request: BackendRequest) -> Result<BackendResponse, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct BackendClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for BackendClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct WreqBackendClient {
    client: wreq::Client,
    config: BackendClientConfig,
}

impl WreqBackendClient {
    pub fn new(config: BackendClientConfig) -> Result<Self, GatewayError> {
        let client = wreq::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()
            .map_err(|err| GatewayError::Internal(format!("failed to build http client: {err}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl BackendHttpClient for WreqBackendClient {
    async fn post_event_stream(&self, request: BackendRequest) -> Result<BackendResponse, GatewayError> {
        let resp = self
            .client
            .post(&request.url)
            .bearer_auth(&request.access_token)
            .header("content-type", "application/json")
            .header("accept", "application/vnd.amazon.eventstream")
            .body(request.body)
            .send()
            .await
            .map_err(|err| GatewayError::UpstreamTransport(err.to_string()))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp
                .bytes()
                .await
                .unwrap_or_default();
            let detail = String::from_utf8_lossy(&body).into_owned();
            return Ok(BackendResponse {
                status,
                body: BackendBody::Bytes(Bytes::from(detail.into_bytes())),
            });
        }

        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let idle_timeout = self.config.stream_idle_timeout;
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle_timeout, stream.next()).await;
                let Ok(item) = next else { break };
                let Some(item) = item else { break };
                let Ok(chunk) = item else { break };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        Ok(BackendResponse {
            status,
            body: BackendBody::Stream(rx),
        })
    }
}
