use anyhow::{Context, Result};
use podpool_core::Paths;
use podpool_core::paths::DEFAULT_ROOT;
use podpool_pod::{AttachSettings, WorkerSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "/etc/podpool.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Config {
    /// Path of the container runtime binary.
    pub rkt: String,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub attach: AttachConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct WorkerConfig {
    #[serde(default = "default_poll_ms")]
    pub ready_poll_interval_ms: u64,
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,
    #[serde(default)]
    pub general_options: Vec<String>,
    #[serde(default)]
    pub run_options: Vec<String>,
    #[serde(default)]
    pub exec: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ready_poll_interval_ms: default_poll_ms(),
            ready_attempts: default_ready_attempts(),
            general_options: Vec::new(),
            run_options: Vec::new(),
            exec: Vec::new(),
            environment: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct AttachConfig {
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub settle_ms: u64,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_ms(),
            settle_ms: default_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct GcConfig {
    #[serde(default = "default_grace_period")]
    pub grace_period: String,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}

fn default_root() -> String {
    DEFAULT_ROOT.to_owned()
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_ready_attempts() -> u32 {
    60
}

fn default_grace_period() -> String {
    "10m".to_owned()
}

impl Config {
    /// Load and validate config from a TOML file.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        debug!(path = %path.display(), rkt = %config.rkt, root = %config.root, "config loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.rkt.trim().is_empty(), "rkt must be set");
        anyhow::ensure!(!self.root.trim().is_empty(), "root must not be empty");
        anyhow::ensure!(
            self.worker.ready_attempts > 0,
            "worker.ready-attempts must be at least 1"
        );
        for key in self.worker.environment.keys() {
            anyhow::ensure!(
                !key.is_empty() && !key.contains('='),
                "invalid worker.environment variable name {key:?}"
            );
        }
        self.grace_period()?;
        Ok(())
    }

    /// Find the config file: the explicit path if given, else the system default.
    pub(crate) fn find_config_path(explicit: Option<&str>) -> PathBuf {
        explicit.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    pub(crate) fn paths(&self) -> Paths {
        Paths::new(&self.root)
    }

    pub(crate) fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            ready_poll_interval: Duration::from_millis(self.worker.ready_poll_interval_ms),
            ready_attempts: self.worker.ready_attempts,
        }
    }

    pub(crate) fn attach_settings(&self, ready_path: Option<PathBuf>) -> AttachSettings {
        AttachSettings {
            poll_interval: Duration::from_millis(self.attach.poll_interval_ms),
            settle: Duration::from_millis(self.attach.settle_ms),
            ready_path,
        }
    }

    pub(crate) fn grace_period(&self) -> Result<Duration> {
        parse_duration(&self.gc.grace_period).context("invalid gc.grace-period")
    }

    /// Contents of the environment file handed to a new worker pod.
    pub(crate) fn env_file_contents(&self) -> String {
        self.worker
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect()
    }
}

/// Parse a duration such as `90s`, `10m` or `1h30m`. A bare `0` is accepted.
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(s).with_context(|| format!("invalid duration '{s}'"))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(r#"rkt = "/usr/bin/rkt""#).unwrap();
        config.validate().unwrap();
        assert_eq!(config.root, "/var/lib/podpool");
        assert_eq!(config.worker.ready_attempts, 60);
        assert_eq!(
            config.worker_settings().ready_poll_interval,
            Duration::from_secs(1)
        );
        assert_eq!(config.attach_settings(None).settle, Duration::from_secs(1));
        assert_eq!(config.grace_period().unwrap(), Duration::from_secs(600));
        assert!(config.env_file_contents().is_empty());
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
rkt = "/usr/local/bin/rkt"
root = "/srv/podpool"

[worker]
ready-poll-interval-ms = 250
ready-attempts = 8
general-options = ["--insecure-options=image"]
run-options = ["--net=host"]
exec = ["/bin/sleep", "infinity"]
environment = { TERM = "xterm", LANG = "C.UTF-8" }

[attach]
poll-interval-ms = 500
settle-ms = 2000

[gc]
grace-period = "1h30m"
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.paths().root(), Path::new("/srv/podpool"));
        assert_eq!(config.worker.run_options, ["--net=host"]);
        assert_eq!(config.worker_settings().ready_attempts, 8);
        let attach = config.attach_settings(Some(PathBuf::from("/tmp/done")));
        assert_eq!(attach.poll_interval, Duration::from_millis(500));
        assert_eq!(attach.ready_path.as_deref(), Some(Path::new("/tmp/done")));
        assert_eq!(config.grace_period().unwrap(), Duration::from_secs(5400));
        assert_eq!(config.env_file_contents(), "LANG=C.UTF-8\nTERM=xterm\n");
    }

    #[test]
    fn rkt_is_required() {
        assert!(toml::from_str::<Config>("root = \"/srv\"").is_err());
        let config: Config = toml::from_str(r#"rkt = " ""#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_grace_period_is_rejected() {
        let config: Config = toml::from_str(
            r#"
rkt = "/usr/bin/rkt"
[gc]
grace-period = "ten minutes"
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("gc.grace-period"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podpool.toml");
        std::fs::write(&path, "rkt = \"/usr/bin/rkt\"\n[worker]\nready-attempts = 0\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("ready-attempts"));

        std::fs::write(&path, "rkt = \"/usr/bin/rkt\"\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().rkt, "/usr/bin/rkt");
        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn config_path_resolution() {
        assert_eq!(
            Config::find_config_path(None),
            PathBuf::from("/etc/podpool.toml")
        );
        assert_eq!(
            Config::find_config_path(Some("./podpool.toml")),
            PathBuf::from("./podpool.toml")
        );
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2days").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("1.5h").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("-5m").is_err());
    }
}
