//! Advisory per-pod locks shared between unrelated podpool processes.
//!
//! Every worker pod has a lock object (a directory named after its UUID).
//! Processes using the pod hold a shared lock on it for as long as they use
//! it; the garbage collector must take an exclusive lock before stopping the
//! pod. The OS drops the lock when the holding process exits.

use anyhow::{Context, Result};
use podpool_core::Paths;
use std::fs::{File, TryLockError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A held lock on one pod's lock object.
///
/// Released by `release()` or on drop, whichever comes first.
#[derive(Debug)]
pub struct PodLock {
    uuid: String,
    mode: LockMode,
    file: Option<File>,
}

impl PodLock {
    fn new(uuid: &str, mode: LockMode, file: File) -> Self {
        debug!(uuid, ?mode, "pod lock acquired");
        Self {
            uuid: uuid.to_owned(),
            mode,
            file: Some(file),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Unlock and close. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                warn!(uuid = %self.uuid, error = %e, "failed to unlock pod");
            }
            debug!(uuid = %self.uuid, mode = ?self.mode, "pod lock released");
        }
    }
}

impl Drop for PodLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Result of a non-blocking lock attempt.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(PodLock),
    /// Someone else holds a conflicting lock.
    Busy,
}

impl LockAttempt {
    pub fn into_lock(self) -> Option<PodLock> {
        match self {
            LockAttempt::Acquired(lock) => Some(lock),
            LockAttempt::Busy => None,
        }
    }
}

/// Lock objects under a podpool root.
#[derive(Debug, Clone)]
pub struct PodLocks {
    paths: Paths,
}

impl PodLocks {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Take a shared lock, waiting for any exclusive holder to let go.
    pub async fn acquire_shared(&self, uuid: &str) -> Result<PodLock> {
        let file = self.open(uuid)?;
        let file = tokio::task::spawn_blocking(move || file.lock_shared().map(|()| file))
            .await
            .context("pod lock task failed")?
            .with_context(|| format!("failed to lock pod {uuid}"))?;
        Ok(PodLock::new(uuid, LockMode::Shared, file))
    }

    /// Take a shared lock unless an exclusive holder exists.
    pub fn try_acquire_shared(&self, uuid: &str) -> Result<LockAttempt> {
        self.try_acquire(uuid, LockMode::Shared)
    }

    /// Take an exclusive lock unless any other holder exists.
    pub fn try_acquire_exclusive(&self, uuid: &str) -> Result<LockAttempt> {
        self.try_acquire(uuid, LockMode::Exclusive)
    }

    fn try_acquire(&self, uuid: &str, mode: LockMode) -> Result<LockAttempt> {
        let file = self.open(uuid)?;
        let res = match mode {
            LockMode::Shared => file.try_lock_shared(),
            LockMode::Exclusive => file.try_lock(),
        };
        match res {
            Ok(()) => Ok(LockAttempt::Acquired(PodLock::new(uuid, mode, file))),
            Err(TryLockError::WouldBlock) => {
                debug!(uuid, ?mode, "pod lock busy");
                Ok(LockAttempt::Busy)
            }
            Err(TryLockError::Error(e)) => {
                Err(e).with_context(|| format!("failed to lock pod {uuid}"))
            }
        }
    }

    fn open(&self, uuid: &str) -> Result<File> {
        let path = self.paths.pod_lock(uuid);
        File::open(&path)
            .with_context(|| format!("failed to open pod lock {}", path.display()))
    }

    /// Create the lock object for a newly started pod.
    pub fn create_object(&self, uuid: &str) -> Result<()> {
        let path = self.paths.pod_lock(uuid);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create pod lock {}", path.display()))
    }

    /// Remove the lock object of a stopped pod.
    pub fn remove_object(&self, uuid: &str) -> Result<()> {
        let path = self.paths.pod_lock(uuid);
        std::fs::remove_dir(&path)
            .with_context(|| format!("failed to remove pod lock {}", path.display()))
    }

    pub fn object_exists(&self, uuid: &str) -> bool {
        self.paths.pod_lock(uuid).is_dir()
    }
}
