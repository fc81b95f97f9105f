mod auth;
mod routes;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use castream_codec::FrameParserPolicy;
use castream_core::{BackendClientConfig, GatewayConfig, StreamingPipeline, WreqBackendClient};
use castream_credential::refresh_client::RefreshClientConfig;
use castream_credential::{CredentialDescriptor, CredentialManager, ManagerConfig, RefreshClient};
use clap::Parser;

use crate::transport::WreqHttpTransport;

/// CLI surface mirroring `CASTREAM_*` env vars (spec ambient config section),
/// grounded on the teacher's `clap(... env)` `CliArgs` pattern.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "castream-gateway",
    version,
    about = "Credential-rotating streaming gateway"
)]
struct CliArgs {
    /// Bind address, e.g. 0.0.0.0:8080.
    #[arg(long, env = "CASTREAM_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Shared secret required on Authorization/x-api-key; unset disables auth.
    #[arg(long, env = "CASTREAM_API_KEY")]
    api_key: Option<String>,

    /// Backend inference endpoint URL.
    #[arg(long, env = "CASTREAM_BACKEND_ENDPOINT")]
    backend_endpoint: String,

    /// Path to a JSON document with the credential descriptor list.
    #[arg(long, env = "CASTREAM_CREDENTIALS_FILE")]
    credentials_file: Option<String>,

    /// Inline JSON credential descriptor list (used when --credentials-file is absent).
    #[arg(long, env = "CASTREAM_CREDENTIALS_JSON")]
    credentials_json: Option<String>,

    #[arg(long, env = "CASTREAM_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    #[arg(long, env = "CASTREAM_SAFETY_MARGIN_SECS", default_value_t = 30)]
    safety_margin_secs: u64,

    /// Usage-probe resource-type key (observed values: CREDIT or VIBE).
    #[arg(long, env = "CASTREAM_RESOURCE_TYPE", default_value = "CREDIT")]
    resource_type: String,

    /// `abort` or `resync`.
    #[arg(long, env = "CASTREAM_FRAME_RESYNC", default_value = "abort")]
    frame_resync: String,

    #[arg(long, env = "CASTREAM_SUPPRESS_DUPLICATE_FRAGMENTS", default_value_t = true)]
    suppress_duplicate_fragments: bool,

    #[arg(long, env = "CASTREAM_LOG", default_value = "info")]
    log: String,
}

pub struct AppState {
    pub api_key: Option<String>,
    pub pipeline: StreamingPipeline,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log))
        .init();

    let config = build_config(&args)?;

    let http_transport: Arc<dyn castream_credential::HttpTransport> = Arc::new(
        WreqHttpTransport::new(Duration::from_secs(30)).context("build refresh http client")?,
    );
    let refresh_client = Arc::new(RefreshClient::new(
        http_transport.clone(),
        RefreshClientConfig::default(),
    ));

    let manager_config = ManagerConfig {
        max_retries: config.max_retries,
        safety_margin: config.safety_margin,
    };
    let credential_manager = Arc::new(CredentialManager::new(
        config.credentials.clone(),
        refresh_client,
        manager_config,
    ));

    spawn_usage_probe_loop(credential_manager.clone(), http_transport, config.resource_type.clone());

    let backend = Arc::new(
        WreqBackendClient::new(BackendClientConfig::default())
            .map_err(|err| anyhow::anyhow!("build backend http client: {err}"))?,
    );

    let pipeline = StreamingPipeline::new(
        credential_manager,
        backend,
        config.backend_endpoint.clone(),
        config.frame_resync_policy,
        config.translator_options(),
    );

    let state = Arc::new(AppState {
        api_key: config.api_key.clone(),
        pipeline,
    });

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    println!("listening on {}", config.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Turns parsed CLI/env args into the provider-agnostic `GatewayConfig`
/// (spec §9 design note: no global singleton, a trait seam instead).
fn build_config(args: &CliArgs) -> Result<GatewayConfig> {
    let frame_resync_policy = match args.frame_resync.as_str() {
        "abort" => FrameParserPolicy::Abort,
        "resync" => FrameParserPolicy::Resync,
        other => anyhow::bail!("invalid --frame-resync value '{other}'"),
    };
    Ok(GatewayConfig {
        bind: args.bind.clone(),
        api_key: args.api_key.clone(),
        backend_endpoint: args.backend_endpoint.clone(),
        credentials: load_credentials(args)?,
        max_retries: args.max_retries,
        safety_margin: Duration::from_secs(args.safety_margin_secs),
        refresh_wait_timeout: Duration::from_secs(30),
        resource_type: args.resource_type.clone(),
        frame_resync_policy,
        suppress_duplicate_fragments: args.suppress_duplicate_fragments,
    })
}

/// Periodically probes remaining backend budget on the credential currently
/// warm in slot 0 and logs it. Advisory only (spec §4.2: a failed or unknown
/// probe must never be treated as zero budget) — it does not feed back into
/// `CredentialPool` rotation, which is driven purely by refresh failures.
fn spawn_usage_probe_loop(
    credentials: Arc<CredentialManager>,
    transport: Arc<dyn castream_credential::HttpTransport>,
    resource_type: String,
) {
    use castream_credential::{UsageProbe, UsageProbeConfig};

    let probe = UsageProbe::new(
        transport,
        UsageProbeConfig {
            resource_type,
            ..UsageProbeConfig::default()
        },
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            let now = castream_common::time_util::unix_now();
            let Ok(credential) = credentials
                .acquire(now, &tokio_util::sync::CancellationToken::new())
                .await
            else {
                tracing::warn!("usage probe skipped: no credential available");
                continue;
            };
            match probe.probe(&credential, now).await {
                Ok(snapshot) => tracing::info!(
                    available_budget = snapshot.available_budget,
                    budget_unknown = snapshot.budget_unknown,
                    "usage snapshot"
                ),
                Err(err) => tracing::warn!(%err, "usage probe failed"),
            }
        }
    });
}

fn load_credentials(args: &CliArgs) -> Result<Vec<CredentialDescriptor>> {
    let raw = if let Some(path) = &args.credentials_file {
        std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?
    } else if let Some(inline) = &args.credentials_json {
        inline.clone()
    } else {
        anyhow::bail!("one of --credentials-file or --credentials-json is required");
    };

    let descriptors: Vec<CredentialDescriptor> =
        serde_json::from_str(&raw).context("parsing credentials document")?;
    for descriptor in &descriptors {
        descriptor
            .validate()
            .map_err(|message| anyhow::anyhow!(message.to_string()))?;
    }
    if descriptors.is_empty() {
        anyhow::bail!("credentials document contains no entries");
    }
    Ok(descriptors)
}
