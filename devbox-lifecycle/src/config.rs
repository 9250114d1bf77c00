use std::net::SocketAddr;
use std::time::Duration;

use devbox_common::config::{optional, parse_optional, parse_or, required};
use devbox_common::{ConfigError, EnvSource};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_COMPOSE_DIR: &str = "/home/ubuntu/daytona";
pub const DEFAULT_NETWORK_THRESHOLD_MB: f64 = 100.0;

/// Settings for the start handler.
#[derive(Clone, Debug, PartialEq)]
pub struct StartConfig {
    pub instance_id: String,
    /// Primary API whose reachability means "ready".
    pub api_url: String,
    /// Optional second service; checked at `{backend_url}/health`.
    pub backend_url: Option<String>,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Suggested client retry delay on `starting` / `transitioning`.
    pub retry_after_seconds: u64,
    /// Pause between dispatching the compose command and querying its status.
    pub command_settle_delay: Duration,
    pub compose_dir: String,
    pub remote_command_timeout_seconds: u64,
}

impl StartConfig {
    pub fn new(instance_id: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            api_url: api_url.into(),
            backend_url: None,
            max_wait: Duration::from_secs(180),
            poll_interval: Duration::from_secs(5),
            retry_after_seconds: 30,
            command_settle_delay: Duration::from_secs(10),
            compose_dir: DEFAULT_COMPOSE_DIR.to_string(),
            remote_command_timeout_seconds: 120,
        }
    }
}

/// Settings for the stop handler.
#[derive(Clone, Debug, PartialEq)]
pub struct StopConfig {
    pub workspace_api_key: Option<String>,
    pub instance_public_ip: Option<String>,
    pub workspace_port: u16,
    pub network_threshold_mb: f64,
    pub metric_window: chrono::Duration,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            workspace_api_key: None,
            instance_public_ip: None,
            workspace_port: 3000,
            network_threshold_mb: DEFAULT_NETWORK_THRESHOLD_MB,
            metric_window: chrono::Duration::minutes(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LifecycleConfig {
    pub listen_addr: SocketAddr,
    pub region: Option<String>,
    pub start: StartConfig,
    pub stop: StopConfig,
    /// When set, the stop handler also runs on this interval for `start.instance_id`.
    pub auto_stop_interval: Option<Duration>,
}

impl LifecycleConfig {
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let listen_raw = optional(env, "LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into());
        let listen_addr = listen_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "LISTEN_ADDR".to_string(),
                value: listen_raw.clone(),
                reason: e.to_string(),
            })?;

        let mut start = StartConfig::new(
            required(env, "INSTANCE_ID")?,
            required(env, "DAYTONA_API_URL")?,
        );
        start.backend_url =
            optional(env, "BACKEND_URL").map(|u| u.trim_end_matches('/').to_string());
        start.max_wait = Duration::from_secs(parse_or(
            env,
            "MAX_WAIT_SECONDS",
            start.max_wait.as_secs(),
        )?);

        let stop = StopConfig {
            workspace_api_key: optional(env, "DAYTONA_API_KEY"),
            instance_public_ip: optional(env, "INSTANCE_PUBLIC_IP"),
            ..StopConfig::default()
        };

        let auto_stop_interval = match parse_optional::<u64>(env, "AUTO_STOP_INTERVAL_SECONDS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    key: "AUTO_STOP_INTERVAL_SECONDS".to_string(),
                    value: "0".to_string(),
                    reason: "interval must be positive".to_string(),
                })
            }
            other => other.map(Duration::from_secs),
        };

        Ok(Self {
            listen_addr,
            region: optional(env, "AWS_REGION"),
            start,
            stop,
            auto_stop_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("INSTANCE_ID", "i-0abc"),
            ("DAYTONA_API_URL", "http://10.0.0.5:3000/api"),
        ])
    }

    #[test]
    fn defaults_apply() {
        let cfg = LifecycleConfig::from_env(&base()).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.start.instance_id, "i-0abc");
        assert_eq!(cfg.start.max_wait, Duration::from_secs(180));
        assert_eq!(cfg.start.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.start.backend_url, None);
        assert_eq!(cfg.stop.network_threshold_mb, 100.0);
        assert_eq!(cfg.stop.metric_window, chrono::Duration::minutes(30));
        assert!(cfg.auto_stop_interval.is_none());
        assert!(cfg.region.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let mut env = base();
        env.insert("BACKEND_URL", "http://10.0.0.5:3001/");
        env.insert("MAX_WAIT_SECONDS", "60");
        env.insert("DAYTONA_API_KEY", "secret");
        env.insert("INSTANCE_PUBLIC_IP", "3.3.3.3");
        env.insert("AWS_REGION", "eu-west-3");
        env.insert("LISTEN_ADDR", "127.0.0.1:9000");
        env.insert("AUTO_STOP_INTERVAL_SECONDS", "900");
        let cfg = LifecycleConfig::from_env(&env).unwrap();
        assert_eq!(cfg.start.backend_url.as_deref(), Some("http://10.0.0.5:3001"));
        assert_eq!(cfg.start.max_wait, Duration::from_secs(60));
        assert_eq!(cfg.stop.workspace_api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.stop.instance_public_ip.as_deref(), Some("3.3.3.3"));
        assert_eq!(cfg.region.as_deref(), Some("eu-west-3"));
        assert_eq!(cfg.listen_addr.port(), 9000);
        assert_eq!(cfg.auto_stop_interval, Some(Duration::from_secs(900)));
    }

    #[test]
    fn missing_and_invalid_values_fail() {
        let mut env = base();
        env.remove("INSTANCE_ID");
        assert_eq!(
            LifecycleConfig::from_env(&env),
            Err(ConfigError::Missing {
                key: "INSTANCE_ID".to_string()
            })
        );

        let mut env = base();
        env.insert("MAX_WAIT_SECONDS", "soon");
        assert!(matches!(
            LifecycleConfig::from_env(&env),
            Err(ConfigError::Invalid { ref key, .. }) if key == "MAX_WAIT_SECONDS"
        ));

        let mut env = base();
        env.insert("AUTO_STOP_INTERVAL_SECONDS", "0");
        assert!(LifecycleConfig::from_env(&env).is_err());
    }
}
