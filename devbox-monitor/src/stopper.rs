use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use devbox_providers::aws_cli::AwsCliProvider;
use devbox_providers::metadata::MetadataClient;
use devbox_providers::CloudProvider;

#[async_trait]
pub trait InstanceStopper: Send + Sync {
    /// Request a stop of the machine the monitor runs on. Returns the stopped instance id.
    async fn stop_self(&self) -> Result<String>;
}

/// Resolves its own identity through the metadata service, then stops itself
/// through the cloud CLI bound to the discovered region.
pub struct SelfStopper {
    metadata: MetadataClient,
    cli_binary: String,
}

impl SelfStopper {
    pub fn new(metadata: MetadataClient) -> Self {
        Self {
            metadata,
            cli_binary: "aws".to_string(),
        }
    }

    pub fn with_cli_binary(mut self, binary: impl Into<String>) -> Self {
        self.cli_binary = binary.into();
        self
    }
}

#[async_trait]
impl InstanceStopper for SelfStopper {
    async fn stop_self(&self) -> Result<String> {
        let identity = self
            .metadata
            .instance_identity()
            .await
            .context("could not resolve instance identity")?;
        tracing::info!(
            instance_id = %identity.instance_id,
            region = %identity.region,
            "Stopping instance due to inactivity..."
        );
        let provider = AwsCliProvider::new(Some(identity.region.clone()))
            .with_binary(self.cli_binary.clone())
            .with_timeout(Duration::from_secs(30));
        provider.stop_instance(&identity.instance_id).await?;
        Ok(identity.instance_id)
    }
}
