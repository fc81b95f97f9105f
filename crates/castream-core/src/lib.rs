pub mod backend_client;
pub mod config;
pub mod pipeline;

pub use backend_client::{BackendBody, BackendClientConfig, BackendHttpClient, BackendRequest, BackendResponse, WreqBackendClient};
pub use config::{ConfigProvider, EnvConfigProvider, GatewayConfig};
pub use pipeline::{Dialect, PipelineResponse, StreamingPipeline};
