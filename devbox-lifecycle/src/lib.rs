pub mod config;
pub mod ensure_running;
pub mod probe;
pub mod reply;
pub mod routes;
pub mod schedule;
pub mod start;
pub mod stop;
pub mod workspaces;

pub use config::LifecycleConfig;
pub use reply::{Reply, StartResponse, StartStatus, StopResponse, StopStatus};
pub use start::StartHandler;
pub use stop::{StopEvent, StopHandler};

/// `tracing` to stdout, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
