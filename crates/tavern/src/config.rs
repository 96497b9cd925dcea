//! Server configuration: defaults, overridable from `TAVERN_*` environment
//! variables.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tavern_hub::HubConfig;
use tavern_session::SessionConfig;
use tavern_transport::UpgradePolicy;

use crate::TavernError;

/// Everything a [`TavernServer`](crate::TavernServer) needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind: String,
    /// Upgrade path, e.g. `/ws`.
    pub path: String,
    /// Accepted `Origin` values. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
    /// Largest inbound frame, in bytes.
    pub max_frame_size: usize,
    /// Per-session timeouts and queue capacity.
    pub session: SessionConfig,
    /// Hub command queue settings.
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let policy = UpgradePolicy::default();
        Self {
            bind: "127.0.0.1:8080".to_string(),
            path: policy.path,
            allowed_origins: policy.allowed_origins,
            max_frame_size: policy.max_frame_size,
            session: SessionConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

/// The subset of settings that can come from the environment. Every field
/// is optional; missing ones keep their defaults.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    bind: Option<String>,
    path: Option<String>,
    allowed_origins: Option<Vec<String>>,
    max_frame_size: Option<usize>,
    auth_timeout_secs: Option<u64>,
    read_deadline_secs: Option<u64>,
    ping_interval_secs: Option<u64>,
    write_deadline_secs: Option<u64>,
    outbound_capacity: Option<usize>,
    command_capacity: Option<usize>,
}

impl ServerConfig {
    /// Loads the defaults, then applies `TAVERN_*` environment variables:
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `TAVERN_BIND` | `bind` |
    /// | `TAVERN_PATH` | `path` |
    /// | `TAVERN_ALLOWED_ORIGINS` | `allowed_origins` (comma-separated) |
    /// | `TAVERN_MAX_FRAME_SIZE` | `max_frame_size` |
    /// | `TAVERN_AUTH_TIMEOUT_SECS` | `session.auth_timeout` |
    /// | `TAVERN_READ_DEADLINE_SECS` | `session.read_deadline` |
    /// | `TAVERN_PING_INTERVAL_SECS` | `session.ping_interval` |
    /// | `TAVERN_WRITE_DEADLINE_SECS` | `session.write_deadline` |
    /// | `TAVERN_OUTBOUND_CAPACITY` | `session.outbound_capacity` |
    /// | `TAVERN_COMMAND_CAPACITY` | `hub.command_capacity` |
    ///
    /// # Errors
    /// [`TavernError::Config`] when a variable doesn't parse, or a
    /// `*_SECS` variable is zero.
    pub fn from_env() -> Result<Self, TavernError> {
        Self::from_source(None)
    }

    /// Like [`from_env`](Self::from_env), reading from `vars` instead of
    /// the process environment.
    fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self, TavernError> {
        let overrides: EnvOverrides = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("TAVERN")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_origins")
                    .source(vars),
            )
            .build()?
            .try_deserialize()?;
        Self::default().with_overrides(overrides)
    }

    fn with_overrides(mut self, env: EnvOverrides) -> Result<Self, TavernError> {
        if let Some(bind) = env.bind {
            self.bind = bind;
        }
        if let Some(path) = env.path {
            self.path = path;
        }
        if let Some(origins) = env.allowed_origins {
            self.allowed_origins = origins
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(size) = env.max_frame_size {
            self.max_frame_size = size;
        }
        if let Some(secs) = env.auth_timeout_secs {
            self.session.auth_timeout = seconds("TAVERN_AUTH_TIMEOUT_SECS", secs)?;
        }
        if let Some(secs) = env.read_deadline_secs {
            self.session.read_deadline = seconds("TAVERN_READ_DEADLINE_SECS", secs)?;
        }
        if let Some(secs) = env.ping_interval_secs {
            self.session.ping_interval = seconds("TAVERN_PING_INTERVAL_SECS", secs)?;
        }
        if let Some(secs) = env.write_deadline_secs {
            self.session.write_deadline = seconds("TAVERN_WRITE_DEADLINE_SECS", secs)?;
        }
        if let Some(capacity) = env.outbound_capacity {
            self.session.outbound_capacity = capacity;
        }
        if let Some(capacity) = env.command_capacity {
            self.hub = self.hub.with_command_capacity(capacity);
        }
        Ok(self)
    }

    /// The upgrade rules handed to the WebSocket transport.
    pub fn upgrade_policy(&self) -> UpgradePolicy {
        UpgradePolicy {
            path: self.path.clone(),
            allowed_origins: self.allowed_origins.clone(),
            max_frame_size: self.max_frame_size,
            ..UpgradePolicy::default()
        }
    }
}

/// A `*_SECS` setting; zero is refused.
fn seconds(var: &str, secs: u64) -> Result<Duration, TavernError> {
    if secs == 0 {
        return Err(config::ConfigError::Message(format!("{var} must be at least 1")).into());
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_from_source_empty_keeps_defaults() {
        let config = ServerConfig::from_source(vars(&[])).unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.path, "/ws");
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.max_frame_size, 64 * 1024);
        assert_eq!(config.session.outbound_capacity, 256);
    }

    #[test]
    fn test_from_source_applies_overrides() {
        let config = ServerConfig::from_source(vars(&[
            ("TAVERN_BIND", "0.0.0.0:9000"),
            ("TAVERN_READ_DEADLINE_SECS", "20"),
            ("TAVERN_PING_INTERVAL_SECS", "15"),
            ("TAVERN_OUTBOUND_CAPACITY", "16"),
            ("TAVERN_MAX_FRAME_SIZE", "4096"),
        ]))
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.session.read_deadline, Duration::from_secs(20));
        assert_eq!(config.session.ping_interval, Duration::from_secs(15));
        assert_eq!(config.session.outbound_capacity, 16);
        assert_eq!(config.max_frame_size, 4096);
    }

    #[test]
    fn test_from_source_splits_allowed_origins() {
        let config = ServerConfig::from_source(vars(&[(
            "TAVERN_ALLOWED_ORIGINS",
            "https://a.example,https://b.example",
        )]))
        .unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_from_source_bad_number_is_config_error() {
        let result = ServerConfig::from_source(vars(&[("TAVERN_OUTBOUND_CAPACITY", "lots")]));
        assert!(matches!(result, Err(TavernError::Config(_))));
    }

    #[test]
    fn test_from_source_zero_seconds_is_config_error() {
        for var in [
            "TAVERN_AUTH_TIMEOUT_SECS",
            "TAVERN_READ_DEADLINE_SECS",
            "TAVERN_PING_INTERVAL_SECS",
            "TAVERN_WRITE_DEADLINE_SECS",
        ] {
            let result = ServerConfig::from_source(vars(&[(var, "0")]));
            match result {
                Err(TavernError::Config(e)) => assert!(e.to_string().contains(var)),
                other => panic!("{var}=0 should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_from_source_reads_write_deadline() {
        let config =
            ServerConfig::from_source(vars(&[("TAVERN_WRITE_DEADLINE_SECS", "3")])).unwrap();
        assert_eq!(config.session.write_deadline, Duration::from_secs(3));
    }

    #[test]
    fn test_upgrade_policy_carries_origin_and_frame_limits() {
        let config = ServerConfig {
            allowed_origins: vec!["https://a.example".into()],
            max_frame_size: 1024,
            ..ServerConfig::default()
        };
        let policy = config.upgrade_policy();
        assert_eq!(policy.path, "/ws");
        assert_eq!(policy.allowed_origins, config.allowed_origins);
        assert_eq!(policy.max_frame_size, 1024);
    }
}
