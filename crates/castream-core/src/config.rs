use std::env;
use std::time::Duration;

use castream_codec::{FrameParserPolicy, TranslatorOptions};
use castream_common::GatewayError;
use castream_credential::CredentialDescriptor;

/// Everything the gateway needs at startup, independent of where it comes
/// from (spec §9 design note: no global singleton, a trait seam instead —
/// grounded on the teacher's `GlobalConfig`/`ProviderConfig` split, here
/// collapsed into one trait since this gateway has a single backend).
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<GatewayConfig, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: String,
    pub api_key: Option<String>,
    pub backend_endpoint: String,
    pub credentials: Vec<CredentialDescriptor>,
    pub max_retries: u32,
    pub safety_margin: Duration,
    pub refresh_wait_timeout: Duration,
    pub resource_type: String,
    pub frame_resync_policy: FrameParserPolicy,
    pub suppress_duplicate_fragments: bool,
}

/// Reads configuration from the process environment (spec ambient config
/// section), mirroring the teacher's `clap(env)`-driven `GlobalConfig::from_env`.
pub struct EnvConfigProvider;

impl ConfigProvider for EnvConfigProvider {
    fn load(&self) -> Result<GatewayConfig, GatewayError> {
        let bind = env_or("CASTREAM_BIND", "0.0.0.0:8080");
        let api_key = env::var("CASTREAM_API_KEY").ok().filter(|v| !v.is_empty());
        let backend_endpoint = env::var("CASTREAM_BACKEND_ENDPOINT").map_err(|_| {
            GatewayError::Internal("CASTREAM_BACKEND_ENDPOINT is required".to_string())
        })?;

        let credentials = load_credentials()?;

        let max_retries = env_parse("CASTREAM_MAX_RETRIES", 3u32)?;
        let safety_margin_secs = env_parse("CASTREAM_SAFETY_MARGIN_SECS", 30u64)?;
        let refresh_wait_timeout_secs = env_parse("CASTREAM_REFRESH_WAIT_TIMEOUT_SECS", 30u64)?;
        let resource_type = env_or("CASTREAM_RESOURCE_TYPE", "CREDIT");
        let frame_resync_policy = match env_or("CASTREAM_FRAME_RESYNC", "abort").as_str() {
            "abort" => FrameParserPolicy::Abort,
            "resync" => FrameParserPolicy::Resync,
            other => {
                return Err(GatewayError::Internal(format!(
                    "invalid CASTREAM_FRAME_RESYNC value '{other}'"
                )));
            }
        };
        let suppress_duplicate_fragments =
            env_parse("CASTREAM_SUPPRESS_DUPLICATE_FRAGMENTS", true)?;

        Ok(GatewayConfig {
            bind,
            api_key,
            backend_endpoint,
            credentials,
            max_retries,
            safety_margin: Duration::from_secs(safety_margin_secs),
            refresh_wait_timeout: Duration::from_secs(refresh_wait_timeout_secs),
            resource_type,
            frame_resync_policy,
            suppress_duplicate_fragments,
        })
    }
}

impl GatewayConfig {
    pub fn translator_options(&self) -> TranslatorOptions {
        TranslatorOptions {
            suppress_duplicate_fragments: self.suppress_duplicate_fragments,
        }
    }
}

fn load_credentials() -> Result<Vec<CredentialDescriptor>, GatewayError> {
    let raw = if let Ok(path) = env::var("CASTREAM_CREDENTIALS_FILE") {
        std::fs::read_to_string(&path).map_err(|err| {
            GatewayError::Internal(format!("failed to read {path}: {err}"))
        })?
    } else if let Ok(inline) = env::var("CASTREAM_CREDENTIALS_JSON") {
        inline
    } else {
        return Err(GatewayError::Internal(
            "one of CASTREAM_CREDENTIALS_FILE or CASTREAM_CREDENTIALS_JSON is required"
                .to_string(),
        ));
    };

    let descriptors: Vec<CredentialDescriptor> = serde_json::from_str(&raw)
        .map_err(|err| GatewayError::Internal(format!("malformed credentials document: {err}")))?;

    for descriptor in &descriptors {
        descriptor
            .validate()
            .map_err(|message| GatewayError::Internal(message.to_string()))?;
    }
    if descriptors.is_empty() {
        return Err(GatewayError::Internal(
            "credentials document contains no entries".to_string(),
        ));
    }
    Ok(descriptors)
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, GatewayError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Internal(format!("invalid value for {key}"))),
        Err(_) => Ok(default),
    }
}
