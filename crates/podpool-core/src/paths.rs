use std::path::{Path, PathBuf};

/// Default root for lock objects and handoff directories.
pub const DEFAULT_ROOT: &str = "/var/lib/podpool";

/// Filesystem layout shared by every podpool process on a host.
///
/// All paths derive from one root so tests can point it at a temp dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lock object for a worker pod. Users of the pod hold a shared lock on
    /// it; GC needs an exclusive one before stopping the pod.
    pub fn pod_lock(&self, uuid: &str) -> PathBuf {
        self.root.join(format!("pod-{uuid}"))
    }

    /// Per-invocation handoff directory.
    pub fn run_dir(&self, pid: u32) -> PathBuf {
        self.root.join(format!("runner-{pid}"))
    }

    /// File the runtime writes the new pod's UUID into.
    pub fn uuid_file(&self, pid: u32) -> PathBuf {
        self.run_dir(pid).join("uuid")
    }

    pub fn env_file(&self, pid: u32) -> PathBuf {
        self.run_dir(pid).join("env")
    }
}
