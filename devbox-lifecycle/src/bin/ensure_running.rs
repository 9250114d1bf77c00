//! Block until the dev machine API answers, booting it through the start endpoint if needed.
//!
//! `DAYTONA_API_URL` is required; `AUTO_START_URL` is optional (unset means always on).

use anyhow::Context;
use devbox_common::config::{optional, required, ProcessEnv};
use devbox_lifecycle::ensure_running::AutostartClient;
use devbox_lifecycle::init_tracing;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let api_url = required(&ProcessEnv, "DAYTONA_API_URL").context("invalid configuration")?;
    let autostart_url = optional(&ProcessEnv, "AUTO_START_URL");

    AutostartClient::new()?
        .ensure_running(&api_url, autostart_url.as_deref())
        .await
}
