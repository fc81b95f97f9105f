use std::time::Duration;

use async_trait::async_trait;
use castream_credential::{HttpTransport, TransportError, TransportResponse};
use serde_json::Value as JsonValue;

/// Buffered `HttpTransport` for `RefreshClient`/`UsageProbe` (spec §4.2/§4.4):
/// single request/response round trips, no streaming. Kept separate from
/// `castream_core::WreqBackendClient`, which only knows how to stream the
/// event-framed backend body.
#[derive(Clone)]
pub struct WreqHttpTransport {
    client: wreq::Client,
}

impl WreqHttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, wreq::Error> {
        let client = wreq::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for WreqHttpTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: JsonValue,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.post(url).json(&body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|err| to_transport_error(&err))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| to_transport_error(&err))?;
        Ok(TransportResponse { status, body })
    }

    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|err| to_transport_error(&err))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| to_transport_error(&err))?;
        Ok(TransportResponse { status, body })
    }
}

fn to_transport_error(err: &wreq::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}
