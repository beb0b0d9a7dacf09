pub mod api;
pub mod config;
pub mod credits;
pub mod error;
pub mod navigator;
pub mod poller;
pub mod session;
pub mod tier;
pub mod token;
pub mod viewer;

pub use api::{ApiClient, GenerationRequest, UploadFile};
pub use config::{ClientConfig, EntitlementModel};
pub use error::{ClientError, ErrorClass};
pub use navigator::{Navigator, RecordingNavigator};
pub use poller::{JobBoard, JobDashboard, JobPoller, PollerHandle};
pub use session::SessionStore;
pub use tier::{PrimaryAction, PriceDisplay, TierReconciler};
pub use token::{KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use viewer::{ComparisonViewer, RetryPolicy};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
