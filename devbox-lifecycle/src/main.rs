use std::sync::Arc;

use anyhow::Context;
use devbox_common::config::ProcessEnv;
use devbox_lifecycle::probe::HttpServiceProbe;
use devbox_lifecycle::routes::{self, AppState};
use devbox_lifecycle::schedule::run_stop_schedule;
use devbox_lifecycle::{init_tracing, LifecycleConfig, StartHandler, StopHandler};
use devbox_providers::aws_cli::AwsCliProvider;
use devbox_providers::CloudProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config =
        LifecycleConfig::from_env(&ProcessEnv).context("invalid lifecycle configuration")?;

    let provider: Arc<dyn CloudProvider> = Arc::new(AwsCliProvider::new(config.region.clone()));
    let probe = HttpServiceProbe::new(&config.start.api_url, config.start.backend_url.as_deref())?;
    let start = StartHandler::new(config.start.clone(), provider.clone(), Arc::new(probe));
    let stop = Arc::new(StopHandler::new(config.stop.clone(), provider)?);

    if let Some(interval) = config.auto_stop_interval {
        tokio::spawn(run_stop_schedule(
            stop.clone(),
            config.start.instance_id.clone(),
            interval,
        ));
    }

    let app = routes::router(Arc::new(AppState { start, stop }));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("devbox-lifecycle listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
