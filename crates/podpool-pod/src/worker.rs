//! Finding, claiming, and initializing a user's worker pod.
//!
//! A worker goes through `searching -> found | not found`. When nothing
//! reusable is found the caller starts a pod itself and hands the runtime's
//! UUID file to `initialize_pod`, which waits for the pod to settle and
//! claims it. Either way the worker ends up holding a shared lock on the pod
//! for as long as it is in use.

use crate::lock::{LockAttempt, PodLock, PodLocks};
use crate::path_watch::await_path;
use crate::registry::PodRegistry;
use anyhow::{Context, Result};
use podpool_core::{Owner, PodRuntime, canonical_image_name};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Pause between status queries while a new pod comes up.
    pub ready_poll_interval: Duration,
    /// Status queries before giving up on a new pod.
    pub ready_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            ready_poll_interval: Duration::from_secs(1),
            ready_attempts: 60,
        }
    }
}

pub struct Worker {
    runtime: Arc<dyn PodRuntime>,
    locks: PodLocks,
    owner: Owner,
    image: String,
    app_name: String,
    settings: WorkerSettings,
    pod: Option<PodLock>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("owner", &self.owner)
            .field("image", &self.image)
            .field("app_name", &self.app_name)
            .field("pod", &self.pod)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Set up a worker for `owner` running `image`, and look for a pod to
    /// reuse.
    pub async fn new(
        runtime: Arc<dyn PodRuntime>,
        locks: PodLocks,
        owner: Owner,
        image: &str,
        settings: WorkerSettings,
    ) -> Self {
        let app_name = owner.worker_app_name();
        let mut worker = Self {
            runtime,
            locks,
            owner,
            image: canonical_image_name(image),
            app_name,
            settings,
            pod: None,
        };
        worker.find_pod().await;
        worker
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Whether we found (and locked) a suitable pod.
    pub fn found_pod(&self) -> bool {
        self.pod.is_some()
    }

    pub fn uuid(&self) -> Option<&str> {
        self.pod.as_ref().map(PodLock::uuid)
    }

    pub fn lock(&self) -> Option<&PodLock> {
        self.pod.as_ref()
    }

    /// Look for a running pod with our app name and image, owned by us, and
    /// lock the first one that passes. Pods failing the ownership check or
    /// locked exclusively are skipped.
    pub async fn find_pod(&mut self) {
        let registry = PodRegistry::new(Arc::clone(&self.runtime));
        let candidates = match registry
            .running(|p| p.app_name == self.app_name && p.image == self.image)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "failed to list pods, not reusing a worker");
                return;
            }
        };

        for pod in candidates {
            if let Err(e) = self.verify_pod_user(&pod.uuid).await {
                warn!(pod = %pod, error = %e, "skipping pod");
                continue;
            }
            match self.lock_pod(&pod.uuid) {
                Ok(true) => {
                    info!(pod = %pod, "reusing worker pod");
                    return;
                }
                Ok(false) => debug!(pod = %pod, "worker pod busy, skipping"),
                Err(e) => warn!(pod = %pod, error = %e, "failed to lock worker pod"),
            }
        }
        debug!(app = %self.app_name, image = %self.image, "no reusable worker pod");
    }

    async fn verify_pod_user(&self, uuid: &str) -> Result<()> {
        self.runtime
            .cat_manifest(uuid)
            .await?
            .verify_user(self.owner.uid)
    }

    /// Try to take a shared lock on the pod without blocking. Returns false
    /// if the pod is exclusively locked, or if its lock object was removed
    /// while we were locking it.
    pub fn lock_pod(&mut self, uuid: &str) -> Result<bool> {
        let LockAttempt::Acquired(mut lock) = self.locks.try_acquire_shared(uuid)? else {
            return Ok(false);
        };
        if !self.locks.object_exists(uuid) {
            debug!(uuid, "pod lock object removed, pod is being collected");
            lock.release();
            return Ok(false);
        }
        self.release();
        self.pod = Some(lock);
        Ok(true)
    }

    /// Claim a pod we just asked the runtime to start.
    ///
    /// Waits for either the runtime to write the UUID file or the launching
    /// command to finish, whichever happens first. A launch failure is
    /// returned as is. Then waits for the pod to come up (or die), creates
    /// its lock object, and takes a shared lock.
    pub async fn initialize_pod<F>(&mut self, uuid_path: &Path, launched: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        tokio::pin!(launched);
        tokio::select! {
            res = await_path(uuid_path) => {
                res.context("failed waiting for the pod UUID")?;
            }
            res = &mut launched => {
                res?;
                debug!("launch command finished before the UUID file appeared");
            }
        }

        let uuid = read_uuid(uuid_path).await?;
        info!(uuid = %uuid, app = %self.app_name, "new worker pod");

        self.await_ready(&uuid)
            .await
            .with_context(|| format!("worker pod {uuid} did not become ready"))?;

        self.locks.create_object(&uuid)?;
        let lock = self.locks.acquire_shared(&uuid).await?;
        self.release();
        self.pod = Some(lock);
        Ok(())
    }

    /// Poll the runtime until the pod is running or exited. Failed queries
    /// are expected right after launch and only warned about.
    async fn await_ready(&self, uuid: &str) -> Result<()> {
        for attempt in 1..=self.settings.ready_attempts {
            let report = self.runtime.status(uuid).await?;
            if report.is_settled() {
                debug!(uuid, attempt, state = ?report.state, "worker pod ready");
                return Ok(());
            }
            if !report.success {
                warn!(uuid, attempt, "status query failed, retrying");
            } else if report.state.is_none() {
                warn!(uuid, attempt, "status query reported no state");
            } else {
                debug!(uuid, attempt, state = ?report.state, "waiting for worker pod");
            }
            tokio::time::sleep(self.settings.ready_poll_interval).await;
        }
        anyhow::bail!(
            "gave up after {} status queries",
            self.settings.ready_attempts
        )
    }

    /// Drop our lock on the pod, if we hold one.
    pub fn release(&mut self) {
        if let Some(mut lock) = self.pod.take() {
            lock.release();
        }
    }
}

async fn read_uuid(path: &Path) -> Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read pod UUID from {}", path.display()))?;
    let uuid = raw.trim();
    anyhow::ensure!(!uuid.is_empty(), "empty pod UUID in {}", path.display());
    Ok(uuid.to_owned())
}
