//! qscale.toml configuration parser.
//!
//! The configuration is read once at startup: the TOML file is layered
//! under single-setting environment overrides with figment, validated, and
//! then shared immutably with every component. Nothing re-reads it while
//! the control loop runs.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::types::ServiceGroup;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    pub queue: QueueConfig,
    pub orchestrator: OrchestratorConfig,
    pub groups: Vec<GroupConfig>,
}

/// Replica bounds, hysteresis thresholds and loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScalingConfig {
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Queue depth strictly above which a group scales up.
    pub scale_up_queue_threshold: u64,
    /// Queue depth strictly below which a group scales down.
    pub scale_down_queue_threshold: u64,
    pub poll_interval_seconds: u64,
    pub cooldown_period_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Upper bound on any single queue or orchestration call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Upper bound on one scale-to-N request for a role.
    #[serde(default = "default_scale_timeout")]
    pub scale_timeout_seconds: u64,
    /// Upper bound on waiting for new replicas to report ready.
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_seconds: u64,
    #[serde(default = "default_readiness_initial_backoff")]
    pub readiness_initial_backoff_ms: u64,
    #[serde(default = "default_readiness_max_backoff")]
    pub readiness_max_backoff_ms: u64,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Redis URL, e.g. `redis://redis:6379/0`.
    #[serde(default = "default_redis_url", deserialize_with = "lenient_string")]
    pub url: String,
    /// Replaces the host part of `url` (`REDIS_HOST`).
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub host: Option<String>,
    /// Replaces the port part of `url` (`REDIS_PORT`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<String>,
    /// List key holding pending jobs.
    #[serde(deserialize_with = "lenient_string")]
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OrchestratorConfig {
    /// Docker Compose project on the local Docker Engine.
    DockerCompose {
        #[serde(default = "default_docker_socket")]
        socket: PathBuf,
        project: String,
        #[serde(default)]
        compose_files: Vec<PathBuf>,
        #[serde(default = "default_docker_binary")]
        docker_binary: String,
    },
    /// In-process replica table, for dry runs against no real infrastructure.
    Static {
        #[serde(default)]
        replicas: BTreeMap<String, u32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupConfig {
    pub name: String,
    /// Roles (compose services) that move in lock-step.
    pub roles: Vec<String>,
    /// Overrides `[queue].key` for this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_key: Option<String>,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_scale_timeout() -> u64 {
    60
}

fn default_readiness_timeout() -> u64 {
    120
}

fn default_readiness_initial_backoff() -> u64 {
    500
}

fn default_readiness_max_backoff() -> u64 {
    10_000
}

fn default_redis_url() -> String {
    "redis://redis:6379/0".to_string()
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            scale_timeout_seconds: default_scale_timeout(),
            readiness_timeout_seconds: default_readiness_timeout(),
            readiness_initial_backoff_ms: default_readiness_initial_backoff(),
            readiness_max_backoff_ms: default_readiness_max_backoff(),
        }
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("url", &self.url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key", &self.key)
            .finish()
    }
}

impl ScalingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn cooldown_period(&self) -> Duration {
        Duration::from_secs(self.cooldown_period_seconds)
    }

    /// Check bounds and the hysteresis band.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_replicas > self.max_replicas {
            return Err(ConfigError::Invalid(format!(
                "min_replicas ({}) exceeds max_replicas ({})",
                self.min_replicas, self.max_replicas
            )));
        }
        if self.scale_down_queue_threshold >= self.scale_up_queue_threshold {
            return Err(ConfigError::Invalid(format!(
                "scale_down_queue_threshold ({}) must be below scale_up_queue_threshold ({})",
                self.scale_down_queue_threshold, self.scale_up_queue_threshold
            )));
        }
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl TimeoutConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn scale_timeout(&self) -> Duration {
        Duration::from_secs(self.scale_timeout_seconds)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_seconds)
    }

    pub fn readiness_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.readiness_initial_backoff_ms)
    }

    pub fn readiness_max_backoff(&self) -> Duration {
        Duration::from_millis(self.readiness_max_backoff_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let fields = [
            ("request_timeout_seconds", self.request_timeout_seconds),
            ("scale_timeout_seconds", self.scale_timeout_seconds),
            ("readiness_timeout_seconds", self.readiness_timeout_seconds),
            ("readiness_initial_backoff_ms", self.readiness_initial_backoff_ms),
            ("readiness_max_backoff_ms", self.readiness_max_backoff_ms),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.readiness_max_backoff_ms < self.readiness_initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "readiness_max_backoff_ms is below readiness_initial_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl ControllerConfig {
    /// Layer the file at `path` under the environment overrides.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(env_overrides())
    }

    /// Load the file at `path` with environment overrides applied.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        // figment treats a missing file as empty; here it is fatal.
        std::fs::metadata(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_figment(&Self::figment(path))
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Self::from_figment(&Figment::from(Toml::string(content)))
    }

    /// Extract from any provider stack and fold `host`/`port` into `url`.
    pub fn from_figment(figment: &Figment) -> ConfigResult<Self> {
        let mut config: Self = figment.extract()?;
        config.queue.resolve_endpoint()?;
        Ok(config)
    }

    /// Render as TOML with the queue password masked.
    pub fn to_redacted_toml(&self) -> ConfigResult<String> {
        let mut redacted = self.clone();
        if redacted.queue.password.is_some() {
            redacted.queue.password = Some("<redacted>".to_string());
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.scaling.validate()?;
        self.timeouts.validate()?;

        if self.queue.key.trim().is_empty() {
            return Err(ConfigError::Invalid("queue key is empty".to_string()));
        }
        if self.groups.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one service group is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut claimed_roles = HashSet::new();
        for group in &self.groups {
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service group: {}",
                    group.name
                )));
            }
            if group.roles.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "service group {} has no roles",
                    group.name
                )));
            }
            for role in &group.roles {
                if !claimed_roles.insert(role.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "role {role} is claimed by more than one service group"
                    )));
                }
            }
            if matches!(&group.queue_key, Some(k) if k.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "service group {} has an empty queue_key",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// Resolve the group topology, filling in the default queue key.
    pub fn service_groups(&self) -> Vec<ServiceGroup> {
        self.groups
            .iter()
            .map(|g| ServiceGroup {
                name: g.name.clone(),
                roles: g.roles.clone(),
                queue_key: g.queue_key.clone().unwrap_or_else(|| self.queue.key.clone()),
            })
            .collect()
    }
}

impl QueueConfig {
    fn resolve_endpoint(&mut self) -> ConfigResult<()> {
        if self.host.is_none() && self.port.is_none() {
            return Ok(());
        }
        let mut url = Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("queue url {:?}: {e}", self.url)))?;
        if let Some(host) = self.host.take() {
            url.set_host(Some(&host))
                .map_err(|e| ConfigError::Invalid(format!("redis host {host:?}: {e}")))?;
        }
        if let Some(port) = self.port.take() {
            url.set_port(Some(port)).map_err(|()| {
                ConfigError::Invalid(format!("queue url {:?} takes no port", self.url))
            })?;
        }
        self.url = url.to_string();
        Ok(())
    }
}

/// Environment variables that replace a single setting.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("MIN_REPLICAS", "scaling.min_replicas"),
    ("MAX_REPLICAS", "scaling.max_replicas"),
    ("SCALE_UP_QUEUE_THRESHOLD", "scaling.scale_up_queue_threshold"),
    ("SCALE_DOWN_QUEUE_THRESHOLD", "scaling.scale_down_queue_threshold"),
    ("POLL_INTERVAL_SECONDS", "scaling.poll_interval_seconds"),
    ("COOLDOWN_PERIOD_SECONDS", "scaling.cooldown_period_seconds"),
    ("REDIS_URL", "queue.url"),
    ("REDIS_HOST", "queue.host"),
    ("REDIS_PORT", "queue.port"),
    ("REDIS_PASSWORD", "queue.password"),
    ("QUEUE_KEY", "queue.key"),
];

/// Provider for the override variables; everything else in the
/// environment is ignored.
pub fn env_overrides() -> Env {
    Env::raw().filter_map(|key| {
        ENV_OVERRIDES
            .iter()
            .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
            .map(|(_, setting)| (*setting).into())
    })
}

/// Env values such as `REDIS_PASSWORD=1234` arrive as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Str(s) => s,
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Signed(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(String::from)
}

/// Empty means unset, so `REDIS_PASSWORD=` clears a password from the file.
fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = lenient_string(deserializer)?;
    Ok((!value.trim().is_empty()).then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const SAMPLE: &str = r#"
[scaling]
min_replicas = 1
max_replicas = 5
scale_up_queue_threshold = 5
scale_down_queue_threshold = 1
poll_interval_seconds = 30
cooldown_period_seconds = 120

[queue]
url = "redis://redis:6379/0"
password = "hunter2"
key = "bull:jobs:wait"

[orchestrator]
type = "docker-compose"
project = "n8n"
compose_files = ["docker-compose.yml"]

[[groups]]
name = "workers"
roles = ["n8n-worker", "n8n-worker-sidecar"]

[[groups]]
name = "webhooks"
roles = ["n8n-webhook"]
queue_key = "bull:webhooks:wait"
"#;

    fn sample() -> ControllerConfig {
        ControllerConfig::from_toml_str(SAMPLE).unwrap()
    }

    #[test]
    fn parse_sample() {
        let config = sample();
        assert_eq!(config.scaling.max_replicas, 5);
        assert_eq!(config.scaling.cooldown_period(), Duration::from_secs(120));
        assert_eq!(config.groups.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn timeouts_default_when_section_missing() {
        let config = sample();
        assert_eq!(config.timeouts, TimeoutConfig::default());
        assert_eq!(config.timeouts.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn docker_compose_defaults() {
        match sample().orchestrator {
            OrchestratorConfig::DockerCompose {
                socket,
                docker_binary,
                ..
            } => {
                assert_eq!(socket, PathBuf::from("/var/run/docker.sock"));
                assert_eq!(docker_binary, "docker");
            }
            other => panic!("unexpected orchestrator: {other:?}"),
        }
    }

    #[test]
    fn static_orchestrator_parses() {
        let toml_str = SAMPLE.replace(
            "type = \"docker-compose\"\nproject = \"n8n\"\ncompose_files = [\"docker-compose.yml\"]",
            "type = \"static\"\nreplicas = { n8n-worker = 2 }",
        );
        let config = ControllerConfig::from_toml_str(&toml_str).unwrap();
        let OrchestratorConfig::Static { replicas } = config.orchestrator else {
            panic!("expected static orchestrator");
        };
        assert_eq!(replicas.get("n8n-worker"), Some(&2));
    }

    #[test]
    fn service_groups_resolve_queue_key() {
        let groups = sample().service_groups();
        assert_eq!(groups[0].queue_key, "bull:jobs:wait");
        assert_eq!(groups[1].queue_key, "bull:webhooks:wait");
        assert_eq!(groups[0].roles.len(), 2);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut config = sample();
        config.scaling.min_replicas = 6;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_collapsed_hysteresis_band() {
        let mut config = sample();
        config.scaling.scale_down_queue_threshold = 5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.scaling.scale_down_queue_threshold = 9;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut config = sample();
        config.scaling.poll_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut config = sample();
        config.timeouts.readiness_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_backoff_cap_below_initial() {
        let mut config = sample();
        config.timeouts.readiness_initial_backoff_ms = 5_000;
        config.timeouts.readiness_max_backoff_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_topology() {
        let mut config = sample();
        config.groups.clear();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.groups[1].name = "workers".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.groups[1].roles = vec!["n8n-worker".to_string()];
        assert!(config.validate().is_err());

        let mut config = sample();
        config.groups[0].roles.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_equal_max_is_allowed() {
        let mut config = sample();
        config.scaling.min_replicas = 3;
        config.scaling.max_replicas = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_replace_file_values() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("qscale.toml", SAMPLE)?;
            jail.set_env("MAX_REPLICAS", "8");
            jail.set_env("COOLDOWN_PERIOD_SECONDS", "45");
            jail.set_env("QUEUE_KEY", "bull:other:wait");
            jail.set_env("HOME", "/root");

            let config = ControllerConfig::load(Path::new("qscale.toml")).unwrap();
            assert_eq!(config.scaling.max_replicas, 8);
            assert_eq!(config.scaling.min_replicas, 1);
            assert_eq!(config.scaling.cooldown_period_seconds, 45);
            assert_eq!(config.queue.key, "bull:other:wait");
            assert_eq!(config.queue.password.as_deref(), Some("hunter2"));
            Ok(())
        });
    }

    #[test]
    fn numeric_password_override_stays_a_string() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("qscale.toml", SAMPLE)?;
            jail.set_env("REDIS_PASSWORD", "123456");

            let config = ControllerConfig::load(Path::new("qscale.toml")).unwrap();
            assert_eq!(config.queue.password.as_deref(), Some("123456"));
            Ok(())
        });
    }

    #[test]
    fn unparsable_override_is_rejected() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("qscale.toml", SAMPLE)?;
            jail.set_env("MIN_REPLICAS", "-1");

            let err = ControllerConfig::load(Path::new("qscale.toml")).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)));
            Ok(())
        });
    }

    #[test]
    fn redis_host_and_port_rewrite_the_url() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("qscale.toml", SAMPLE)?;
            jail.set_env("REDIS_HOST", "queue.internal");
            jail.set_env("REDIS_PORT", "6380");

            let config = ControllerConfig::load(Path::new("qscale.toml")).unwrap();
            assert_eq!(config.queue.url, "redis://queue.internal:6380/0");
            assert_eq!(config.queue.host, None);
            assert_eq!(config.queue.port, None);
            Ok(())
        });
    }

    #[test]
    fn redis_host_applies_on_top_of_redis_url() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("qscale.toml", SAMPLE)?;
            jail.set_env("REDIS_URL", "redis://old-host:6379/3");
            jail.set_env("REDIS_HOST", "new-host");

            let config = ControllerConfig::load(Path::new("qscale.toml")).unwrap();
            assert_eq!(config.queue.url, "redis://new-host:6379/3");
            Ok(())
        });
    }

    #[test]
    fn url_defaults_when_only_host_is_given() {
        let toml_str = SAMPLE.replace(
            "url = \"redis://redis:6379/0\"",
            "host = \"cache\"\nport = 6390",
        );
        let config = ControllerConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(config.queue.url, "redis://cache:6390/0");
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let toml_str = SAMPLE.replace(
            "key = \"bull:jobs:wait\"",
            "key = \"bull:jobs:wait\"\nport = 70000",
        );
        assert!(matches!(
            ControllerConfig::from_toml_str(&toml_str),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn redacted_render_hides_password() {
        let rendered = sample().to_redacted_toml().unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("n8n-worker"));
    }

    #[test]
    fn debug_hides_password() {
        let debug = format!("{:?}", sample().queue);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn load_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qscale.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ControllerConfig::from_figment(&Figment::from(Toml::file(&path))).unwrap();
        assert_eq!(config.queue.key, "bull:jobs:wait");
    }

    #[test]
    fn load_missing_is_read_error() {
        let err = ControllerConfig::load(Path::new("/nonexistent/qscale.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = ControllerConfig::from_toml_str(include_str!("../../../qscale.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.service_groups().len(), 2);
    }
}
