use std::sync::Arc;

use crate::transport::{HttpTransport, TransportError};
use crate::types::{AccessCredential, AuthKind, CredentialDescriptor};

#[derive(Debug, Clone)]
pub struct RefreshClientConfig {
    pub social_endpoint: String,
    pub idc_endpoint: String,
    pub idc_user_agent: String,
}

impl Default for RefreshClientConfig {
    fn default() -> Self {
        Self {
            social_endpoint: "https://api.example-backend.internal/refresh".to_string(),
            idc_endpoint: "https://oidc.example-backend.internal/token".to_string(),
            idc_user_agent: "castream-gateway/idc".to_string(),
        }
    }
}

/// Failure taxonomy for a single refresh attempt (spec §4.3).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    /// Retryable across slots.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Slot-fatal for this refresh attempt (backend returned 4xx).
    #[error("auth rejected ({status}): {detail}")]
    AuthRejected { status: u16, detail: String },
    /// Treated like `AuthRejected`.
    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),
}

impl RefreshError {
    pub fn is_retryable_across_slots(&self) -> bool {
        matches!(self, RefreshError::Transport(_))
    }
}

pub struct RefreshClient {
    transport: Arc<dyn HttpTransport>,
    config: RefreshClientConfig,
}

impl RefreshClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: RefreshClientConfig) -> Self {
        Self { transport, config }
    }

    pub async fn refresh(
        &self,
        descriptor: &CredentialDescriptor,
        now: i64,
    ) -> Result<AccessCredential, RefreshError> {
        match descriptor.auth_kind {
            AuthKind::Social => self.refresh_social(descriptor, now).await,
            AuthKind::Idc => self.refresh_idc(descriptor, now).await,
        }
    }

    async fn refresh_social(
        &self,
        descriptor: &CredentialDescriptor,
        now: i64,
    ) -> Result<AccessCredential, RefreshError> {
        let body = serde_json::json!({ "refreshToken": descriptor.refresh_secret });
        let resp = self
            .transport
            .post_json(&self.config.social_endpoint, &[], body)
            .await?;
        self.parse_token_response(resp, descriptor, now)
    }

    async fn refresh_idc(
        &self,
        descriptor: &CredentialDescriptor,
        now: i64,
    ) -> Result<AccessCredential, RefreshError> {
        let client_id = descriptor
            .client_id
            .clone()
            .ok_or_else(|| RefreshError::MalformedResponse("missing client_id".to_string()))?;
        let client_secret = descriptor
            .client_secret
            .clone()
            .ok_or_else(|| RefreshError::MalformedResponse("missing client_secret".to_string()))?;
        let body = serde_json::json!({
            "clientId": client_id,
            "clientSecret": client_secret,
            "grantType": "refresh_token",
            "refreshToken": descriptor.refresh_secret,
        });
        let headers = vec![("x-amz-user-agent".to_string(), self.config.idc_user_agent.clone())];
        let resp = self
            .transport
            .post_json(&self.config.idc_endpoint, &headers, body)
            .await?;
        self.parse_token_response(resp, descriptor, now)
    }

    fn parse_token_response(
        &self,
        resp: crate::transport::TransportResponse,
        descriptor: &CredentialDescriptor,
        now: i64,
    ) -> Result<AccessCredential, RefreshError> {
        if !resp.is_success() {
            let detail = String::from_utf8_lossy(&resp.body).into_owned();
            return Err(RefreshError::AuthRejected {
                status: resp.status,
                detail,
            });
        }
        let payload: TokenResponse = serde_json::from_slice(&resp.body)
            .map_err(|err| RefreshError::MalformedResponse(err.to_string()))?;
        Ok(AccessCredential {
            access_secret: payload.access_token,
            refresh_secret: descriptor.refresh_secret.clone(),
            expires_at: now + payload.expires_in,
            profile_identifier: payload.profile_arn,
            auth_kind: descriptor.auth_kind,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expiresIn")]
    expires_in: i64,
    #[serde(rename = "profileArn")]
    profile_arn: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;

    struct FixedTransport {
        status: u16,
        body: serde_json::Value,
    }

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn post_json(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: serde_json::Value,
        ) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: self.status,
                body: bytes::Bytes::from(serde_json::to_vec(&self.body).unwrap()),
            })
        }

        async fn get(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _query: &[(String, String)],
        ) -> Result<TransportResponse, TransportError> {
            unreachable!("not used by RefreshClient")
        }
    }

    fn social_descriptor() -> CredentialDescriptor {
        CredentialDescriptor {
            slot_index: 0,
            auth_kind: AuthKind::Social,
            refresh_secret: "rt".to_string(),
            client_id: None,
            client_secret: None,
            disabled: false,
        }
    }

    #[tokio::test]
    async fn successful_refresh_sets_expiry_from_now() {
        let transport = Arc::new(FixedTransport {
            status: 200,
            body: serde_json::json!({ "accessToken": "at", "expiresIn": 3600 }),
        });
        let client = RefreshClient::new(transport, RefreshClientConfig::default());
        let cred = client.refresh(&social_descriptor(), 1_000).await.unwrap();
        assert_eq!(cred.access_secret, "at");
        assert_eq!(cred.expires_at, 1_000 + 3600);
    }

    #[tokio::test]
    async fn non_2xx_is_auth_rejected() {
        let transport = Arc::new(FixedTransport {
            status: 403,
            body: serde_json::json!({ "error": "invalid_grant" }),
        });
        let client = RefreshClient::new(transport, RefreshClientConfig::default());
        let err = client.refresh(&social_descriptor(), 0).await.unwrap_err();
        assert!(matches!(err, RefreshError::AuthRejected { status: 403, .. }));
        assert!(!err.is_retryable_across_slots());
    }

    #[tokio::test]
    async fn idc_requires_client_credentials() {
        let transport = Arc::new(FixedTransport {
            status: 200,
            body: serde_json::json!({}),
        });
        let client = RefreshClient::new(transport, RefreshClientConfig::default());
        let mut descriptor = social_descriptor();
        descriptor.auth_kind = AuthKind::Idc;
        let err = client.refresh(&descriptor, 0).await.unwrap_err();
        assert!(matches!(err, RefreshError::MalformedResponse(_)));
    }
}
