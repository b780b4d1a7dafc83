use anyhow::{Context, Result};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Wait until `path` exists.
///
/// The parent directory is watched for completed writes (and renames into
/// place) before existence is first checked, so a file created at any point
/// after the call starts is never missed. Fails straight away if the watch
/// cannot be set up, e.g. because the directory is missing. There is no
/// timeout; race the returned future against a timer if one is needed.
pub async fn await_path(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    })
    .context("failed to create filesystem watcher")?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    if path.exists() {
        debug!(path = %path.display(), "path already present");
        return Ok(());
    }

    while let Some(res) = rx.recv().await {
        match res {
            Ok(event) if is_write_complete(event.kind) => {
                if path.exists() {
                    debug!(path = %path.display(), "path appeared");
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, dir = %dir.display(), "filesystem watch error"),
        }
    }

    anyhow::bail!(
        "watch on {} ended before {} appeared",
        dir.display(),
        path.display()
    )
}

fn is_write_complete(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
    )
}
