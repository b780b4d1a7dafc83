//! The seam between podpool and the external container runtime.
//!
//! The production implementation shells out to the runtime CLI
//! (`podpool_pod::rkt::RktCli`); tests use `fakes::FakeRuntime`.

use crate::types::{Pod, PodManifest, StatusReport};
use anyhow::Result;
use async_trait::async_trait;

/// Queries and commands podpool issues against the container runtime.
///
/// podpool never creates pods through this trait. It observes them, stops
/// idle ones, and attaches to running ones.
#[async_trait]
pub trait PodRuntime: Send + Sync {
    /// Every pod the runtime knows about, in listing order.
    async fn list(&self) -> Result<Vec<Pod>>;

    /// One status query. `Err` only when the query could not be run or its
    /// output could not be read; an unsuccessful query is reported in the
    /// `StatusReport`.
    async fn status(&self, uuid: &str) -> Result<StatusReport>;

    /// The pod's manifest.
    async fn cat_manifest(&self, uuid: &str) -> Result<PodManifest>;

    /// Attach the host's stdin/stdout/stderr to the pod and wait for the
    /// attach process to exit. A non-zero exit is a `RuntimeExit` error.
    async fn attach(&self, uuid: &str) -> Result<()>;

    /// Stop the pod.
    async fn stop(&self, uuid: &str) -> Result<()>;
}
