use std::sync::Arc;

use anyhow::Context;
use devbox_common::config::ProcessEnv;
use devbox_monitor::{logging, IdleMonitor, MonitorConfig, RunExit};
use tokio::sync::watch;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = MonitorConfig::from_env(&ProcessEnv).context("invalid monitor configuration")?;
    let _log_guard = logging::init(config.log_file.as_deref());

    let monitor = Arc::new(IdleMonitor::from_config(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
        // Hold the sender until the process exits.
        std::future::pending::<()>().await;
    });

    match monitor.run(shutdown_rx).await {
        RunExit::InstanceStopped => tracing::info!("monitor finished: instance stop requested"),
        RunExit::Interrupted => tracing::info!("monitor finished: interrupted"),
    }
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
