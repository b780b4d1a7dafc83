//! One garbage-collection pass over idle worker pods.
//!
//! A pod is idle when nobody holds a shared lock on it, which the sweep tests
//! by trying to take an exclusive lock without blocking. Pods younger than
//! the grace period are never touched, so a pod that has just been started is
//! not collected before its owner has had a chance to lock it.

use crate::lock::{LockAttempt, PodLocks};
use crate::registry::PodRegistry;
use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use podpool_core::{Pod, PodRuntime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct GcSettings {
    /// Minimum age before a worker pod may be collected.
    pub grace_period: Duration,
    /// Lock idle pods but don't stop them.
    pub dry_run: bool,
}

/// What the sweep did with one worker pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodOutcome {
    TooYoung,
    Busy,
    Stopped,
    WouldStop,
    StopFailed(String),
    LockFailed(String),
    BadTimestamp(String),
}

#[derive(Debug, Default)]
pub struct GcReport {
    pub pods: Vec<(Pod, PodOutcome)>,
}

impl GcReport {
    /// UUIDs of pods with the given outcome.
    pub fn with_outcome(&self, outcome: &PodOutcome) -> Vec<&str> {
        self.pods
            .iter()
            .filter(|(_, o)| o == outcome)
            .map(|(p, _)| p.uuid.as_str())
            .collect()
    }

    pub fn outcome_of(&self, uuid: &str) -> Option<&PodOutcome> {
        self.pods
            .iter()
            .find(|(p, _)| p.uuid == uuid)
            .map(|(_, o)| o)
    }
}

pub struct GcSweep {
    runtime: Arc<dyn PodRuntime>,
    locks: PodLocks,
    settings: GcSettings,
}

impl std::fmt::Debug for GcSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcSweep")
            .field("locks", &self.locks)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GcSweep {
    pub fn new(runtime: Arc<dyn PodRuntime>, locks: PodLocks, settings: GcSettings) -> Self {
        Self {
            runtime,
            locks,
            settings,
        }
    }

    pub async fn sweep(&self) -> Result<GcReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as if the current time were `now`. Only a failure to list pods
    /// is an error; per-pod problems are logged and recorded in the report.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<GcReport> {
        let registry = PodRegistry::new(Arc::clone(&self.runtime));
        let pods = registry.running(Pod::is_worker).await?;

        let mut report = GcReport::default();
        for pod in pods {
            let outcome = self.collect(&pod, now).await;
            match &outcome {
                PodOutcome::TooYoung => info!(pod = %pod, "skip young"),
                PodOutcome::Busy => info!(pod = %pod, "skip busy"),
                PodOutcome::Stopped => info!(pod = %pod, "stopped idle"),
                PodOutcome::WouldStop => info!(pod = %pod, "would stop idle (dry run)"),
                PodOutcome::StopFailed(e) => warn!(pod = %pod, error = %e, "failed to stop"),
                PodOutcome::LockFailed(e) => warn!(pod = %pod, error = %e, "failed to lock"),
                PodOutcome::BadTimestamp(e) => warn!(pod = %pod, error = %e, "skipping"),
            }
            report.pods.push((pod, outcome));
        }
        Ok(report)
    }

    async fn collect(&self, pod: &Pod, now: DateTime<Utc>) -> PodOutcome {
        let started = match pod.started_at() {
            Ok(started) => started,
            Err(e) => return PodOutcome::BadTimestamp(format!("{e:#}")),
        };
        let grace = TimeDelta::from_std(self.settings.grace_period).unwrap_or(TimeDelta::MAX);
        let expired = started.is_some_and(|t| now.signed_duration_since(t) > grace);
        if !expired {
            return PodOutcome::TooYoung;
        }

        let mut lock = match self.locks.try_acquire_exclusive(&pod.uuid) {
            Ok(LockAttempt::Acquired(lock)) => lock,
            Ok(LockAttempt::Busy) => return PodOutcome::Busy,
            Err(e) => return PodOutcome::LockFailed(format!("{e:#}")),
        };

        if self.settings.dry_run {
            lock.release();
            return PodOutcome::WouldStop;
        }

        let outcome = match self.runtime.stop(&pod.uuid).await {
            Ok(()) => {
                if let Err(e) = self.locks.remove_object(&pod.uuid) {
                    warn!(pod = %pod, error = %e, "stopped, but failed to remove lock object");
                }
                PodOutcome::Stopped
            }
            Err(e) => PodOutcome::StopFailed(format!("{e:#}")),
        };
        lock.release();
        outcome
    }
}
