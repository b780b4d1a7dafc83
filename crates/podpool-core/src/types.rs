use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// App-name prefix shared by every worker pod. GC only considers pods whose
/// app name starts with this.
pub const WORKER_APP_PREFIX: &str = "podpool-";

/// Pod lifecycle state as reported by the runtime.
///
/// Only `running` and `exited` carry meaning here; anything else is kept
/// verbatim for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodState {
    Running,
    Exited,
    Other(String),
}

impl PodState {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "running" => PodState::Running,
            "exited" => PodState::Exited,
            other => PodState::Other(other.to_owned()),
        }
    }

    /// A freshly created pod is ready to be claimed once it has either come
    /// up or already died.
    pub fn is_settled(&self) -> bool {
        matches!(self, PodState::Running | PodState::Exited)
    }
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodState::Running => f.write_str("running"),
            PodState::Exited => f.write_str("exited"),
            PodState::Other(s) => f.write_str(s),
        }
    }
}

/// One row of the runtime's pod listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub uuid: String,
    pub app_name: String,
    pub image: String,
    pub state: PodState,
    pub created: Option<String>,
    pub started: Option<String>,
}

impl Pod {
    pub fn is_running(&self) -> bool {
        self.state == PodState::Running
    }

    pub fn is_worker(&self) -> bool {
        self.app_name.starts_with(WORKER_APP_PREFIX)
    }

    /// Parse the `started` column, if the runtime reported one.
    pub fn started_at(&self) -> Result<Option<DateTime<FixedOffset>>> {
        self.started
            .as_deref()
            .map(|s| {
                parse_runtime_time(s)
                    .with_context(|| format!("failed to parse start time for pod {}", self.uuid))
            })
            .transpose()
    }
}

impl fmt::Display for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} pod {} for {}",
            self.app_name, self.state, self.uuid, self.image
        )
    }
}

/// Parse a timestamp as printed by the runtime, e.g.
/// `2017-05-11 09:35:09.412 +1200 NZST`. The trailing zone abbreviation is
/// informational only; the numeric offset is authoritative.
pub fn parse_runtime_time(s: &str) -> Result<DateTime<FixedOffset>> {
    let fields: Vec<&str> = s.split_whitespace().collect();
    anyhow::ensure!(
        fields.len() == 3 || fields.len() == 4,
        "unexpected timestamp layout: {s:?}"
    );
    let numeric = fields[..3].join(" ");
    DateTime::parse_from_str(&numeric, "%Y-%m-%d %H:%M:%S%.f %z")
        .with_context(|| format!("invalid timestamp: {s:?}"))
}

/// The user on whose behalf a worker pod is found or created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub name: String,
}

impl Owner {
    pub fn new(uid: u32, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
        }
    }

    /// The user who invoked us: the real uid (not the effective one, which
    /// is root under a setuid or sudo launcher) and its passwd name.
    pub fn current() -> Result<Self> {
        Self::from_uid(nix::unistd::getuid().as_raw())
    }

    /// Look `uid` up in the user database.
    pub fn from_uid(uid: u32) -> Result<Self> {
        let user = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
            .with_context(|| format!("failed to look up uid {uid}"))?
            .with_context(|| format!("no user with uid {uid}"))?;
        Ok(Self {
            uid,
            name: user.name,
        })
    }

    /// App name given to this owner's worker pods.
    pub fn worker_app_name(&self) -> String {
        format!("{WORKER_APP_PREFIX}{}", self.name)
    }
}

/// The parts of a pod manifest needed for ownership checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodManifest {
    #[serde(default)]
    pub apps: Vec<ManifestApp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestApp {
    #[serde(default)]
    pub name: String,
    pub app: AppSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSpec {
    #[serde(default)]
    pub user: String,
}

impl PodManifest {
    /// Check the pod runs exactly one app, as `uid`.
    pub fn verify_user(&self, uid: u32) -> Result<()> {
        anyhow::ensure!(
            self.apps.len() == 1,
            "unexpected pod manifest with {} apps",
            self.apps.len()
        );
        let user = &self.apps[0].app.user;
        anyhow::ensure!(
            *user == uid.to_string(),
            "unexpected pod manifest user {user}, expected {uid}"
        );
        Ok(())
    }
}

/// Outcome of one runtime status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Whether the status command itself exited successfully. It fails
    /// routinely when called too early after `run`.
    pub success: bool,
    pub state: Option<PodState>,
}

impl StatusReport {
    /// Parse `key=value` lines, picking out the first `state`.
    pub fn parse(output: &str, success: bool) -> Self {
        let state = output.lines().find_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == "state").then(|| PodState::parse(value))
        });
        Self { success, state }
    }

    pub fn is_settled(&self) -> bool {
        self.success && self.state.as_ref().is_some_and(PodState::is_settled)
    }
}

/// A runtime command ran and exited non-zero.
///
/// The runtime has already reported the problem on the user's terminal, so
/// callers should exit non-zero without printing this again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeExit {
    pub command: String,
    pub code: Option<i32>,
}

impl fmt::Display for RuntimeExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with status {code}", self.command),
            None => write!(f, "{} was killed by a signal", self.command),
        }
    }
}

impl std::error::Error for RuntimeExit {}
