pub mod cache;
pub mod coordinator;
pub mod manager;
pub mod pool;
pub mod refresh_client;
pub mod store;
pub mod transport;
pub mod types;
pub mod usage_probe;

pub use cache::AccessTokenCache;
pub use coordinator::RefreshCoordinator;
pub use manager::{CredentialManager, ManagerConfig};
pub use pool::CredentialPool;
pub use refresh_client::{RefreshClient, RefreshError};
pub use store::CredentialStore;
pub use transport::{HttpTransport, TransportError, TransportResponse};
pub use types::{
    AccessCredential, AuthKind, CredentialDescriptor, PoolSlot, Slot, UsageSnapshot,
};
pub use usage_probe::{ProbeFail, UsageProbe, UsageProbeConfig};
