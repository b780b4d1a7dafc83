use crate::registry::PodRegistry;
use anyhow::Result;
use podpool_core::{Pod, PodRuntime};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, Clone)]
pub struct AttachSettings {
    /// Pause between pod listings while waiting for the pod to start.
    pub poll_interval: Duration,
    /// How long the attach process runs before `ready_path` is created. The
    /// file is created even if the attach fails or the session is aborted.
    pub settle: Duration,
    /// File to create once attachment is under way, for a helper inside the
    /// pod that waits for its stdio to be connected.
    pub ready_path: Option<PathBuf>,
}

impl Default for AttachSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            settle: Duration::from_secs(1),
            ready_path: None,
        }
    }
}

/// The session was aborted before a matching pod showed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachAborted;

impl fmt::Display for AttachAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("attach aborted before the pod was found")
    }
}

impl std::error::Error for AttachAborted {}

/// Attaches the host's stdio to a pod identified by app name, once it runs.
///
/// `by_name` starts the session in the background, `abort` cancels discovery,
/// and `wait` collects the outcome. Exactly one attach process is spawned per
/// session.
pub struct Attacher {
    runtime: Arc<dyn PodRuntime>,
    settings: AttachSettings,
    abort: CancellationToken,
    done: Option<oneshot::Receiver<Result<()>>>,
}

impl fmt::Debug for Attacher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attacher")
            .field("settings", &self.settings)
            .field("aborted", &self.abort.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Attacher {
    pub fn new(runtime: Arc<dyn PodRuntime>, settings: AttachSettings) -> Self {
        Self {
            runtime,
            settings,
            abort: CancellationToken::new(),
            done: None,
        }
    }

    /// Start looking for a running pod named `app_name` and attach to it.
    pub fn by_name(&mut self, app_name: &str) {
        if self.done.is_some() {
            warn!(app = app_name, "attach session already started");
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.done = Some(rx);

        let session = Session {
            registry: PodRegistry::new(Arc::clone(&self.runtime)),
            runtime: Arc::clone(&self.runtime),
            settings: self.settings.clone(),
            abort: self.abort.clone(),
            app_name: app_name.to_owned(),
        };
        let span = info_span!("attach", app = %app_name);
        tokio::spawn(
            async move {
                let _ = tx.send(session.run().await);
            }
            .instrument(span),
        );
    }

    /// Stop looking for the pod. Has no effect once attached, and is safe to
    /// call any number of times.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// A handle that aborts this session when cancelled.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Wait for the session to finish and return its outcome. Later calls
    /// return `Ok(())` straight away.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(done) = self.done.take() else {
            return Ok(());
        };
        match done.await {
            Ok(res) => res,
            Err(_) => Err(anyhow::anyhow!("attach session ended without a result")),
        }
    }
}

struct Session {
    registry: PodRegistry,
    runtime: Arc<dyn PodRuntime>,
    settings: AttachSettings,
    abort: CancellationToken,
    app_name: String,
}

impl Session {
    async fn run(self) -> Result<()> {
        let found = self.find_pod().await;
        let attach = async {
            match &found {
                Ok(pod) => self.runtime.attach(&pod.uuid).await,
                Err(_) => Ok(()),
            }
        };
        // The helper waiting on the ready file is released whatever happens
        // to the attach itself.
        let (res, ()) = tokio::join!(attach, self.signal_ready());
        found.and(res)
    }

    async fn find_pod(&self) -> Result<Pod> {
        let mut attempts: u32 = 0;
        loop {
            if self.abort.is_cancelled() {
                warn!(attempts, "attach aborted");
                return Err(AttachAborted.into());
            }
            attempts += 1;
            match self.registry.find_running(&self.app_name).await {
                Ok(Some(pod)) => {
                    info!(pod = %pod, attempts, "attaching");
                    return Ok(pod);
                }
                Ok(None) => debug!(attempts, "pod not running yet"),
                Err(e) => warn!(error = %e, "attach failure"),
            }
            tokio::select! {
                biased;
                () = self.abort.cancelled() => {
                    warn!(attempts, "attach aborted");
                    return Err(AttachAborted.into());
                }
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    async fn signal_ready(&self) {
        let Some(path) = &self.settings.ready_path else {
            return;
        };
        tokio::time::sleep(self.settings.settle).await;
        match tokio::fs::File::create(path).await {
            Ok(_) => debug!(path = %path.display(), "attach ready"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to signal attach ready"),
        }
    }
}
