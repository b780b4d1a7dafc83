#![allow(clippy::print_stdout, clippy::print_stderr)] // CLI binary: stdout/stderr is the UI

mod cli;
mod config;
mod privilege;
mod tracing_setup;

use anyhow::{Context, Result};
use clap::Parser;
use podpool_core::{Owner, PodRuntime, RuntimeExit};
use podpool_pod::rkt::worker_run_args;
use podpool_pod::{
    Attacher, GcSettings, GcSweep, PodLocks, PodOutcome, RktCli, Worker, WorkerLaunch, check_exit,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::{Config, parse_duration};
use crate::privilege::Privilege;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _tracing_guard = tracing_setup::init(cli.verbose);

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "podpool starting"
    );

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The runtime has already said what went wrong.
            if let Some(exit) = e.downcast_ref::<RuntimeExit>() {
                debug!(%exit, "runtime command failed");
            } else {
                eprintln!("podpool: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let caller_is_root = nix::unistd::getuid().is_root();
    if privilege::check_invocation(&cli, caller_is_root)? == Privilege::Drop {
        debug!("running with the caller's privileges");
        privilege::drop_privileges()?;
    }

    let config_path = Config::find_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    let rkt = Arc::new(RktCli::new(&config.rkt));

    match cli.command {
        Commands::Run {
            image,
            uid,
            user,
            dry_run,
            command,
        } => {
            let owner = resolve_owner(uid, user)?;
            cmd_run(&config, &rkt, owner, &image, dry_run, &command).await
        }
        Commands::GetWorker { image, uid, user } => {
            let owner = resolve_owner(Some(uid), user)?;
            cmd_get_worker(&config, &rkt, owner, &image).await
        }
        Commands::Attach {
            app_name,
            done_path,
        } => cmd_attach(&config, &rkt, &app_name, done_path.map(PathBuf::from)).await,
        Commands::Gc {
            grace_period,
            dry_run,
        } => cmd_gc(&config, &rkt, grace_period.as_deref(), dry_run).await,
        Commands::List => cmd_list(&rkt).await,
    }
}

/// The caller's identity, or the user named by `uid`, optionally under
/// another worker name. `check_invocation` has already vetted the overrides.
fn resolve_owner(uid: Option<u32>, user: Option<String>) -> Result<Owner> {
    let owner = match uid {
        Some(uid) => Owner::from_uid(uid)?,
        None => Owner::current()?,
    };
    Ok(match user {
        Some(name) => Owner::new(owner.uid, name),
        None => owner,
    })
}

fn as_runtime(rkt: &Arc<RktCli>) -> Arc<dyn PodRuntime> {
    Arc::clone(rkt) as Arc<dyn PodRuntime>
}

// ---------------------------------------------------------------------------
// cmd_run: reuse or start a worker pod, then enter it
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &Config,
    rkt: &Arc<RktCli>,
    owner: Owner,
    image: &str,
    dry_run: bool,
    command: &[String],
) -> Result<()> {
    let locks = PodLocks::new(config.paths());
    let mut worker = Worker::new(
        as_runtime(rkt),
        locks,
        owner,
        image,
        config.worker_settings(),
    )
    .await;

    if !worker.found_pod() {
        start_worker_pod(config, rkt, &mut worker, dry_run).await?;
    }

    let Some(uuid) = worker.uuid().map(str::to_owned) else {
        if dry_run {
            println!(
                "{} enter <uuid> {}",
                rkt.program().display(),
                command.join(" ")
            );
        }
        return Ok(());
    };

    if dry_run {
        println!(
            "{} enter {uuid} {}",
            rkt.program().display(),
            command.join(" ")
        );
        worker.release();
        return Ok(());
    }

    debug!(uuid = %uuid, ?command, "entering worker pod");
    let status = rkt
        .enter_command(&uuid, command)
        .status()
        .await
        .with_context(|| format!("failed to run {} enter", rkt.program().display()));
    worker.release();
    check_exit("rkt enter", status?)
}

/// Start a new worker pod in the background and claim it for `worker`.
async fn start_worker_pod(
    config: &Config,
    rkt: &RktCli,
    worker: &mut Worker,
    dry_run: bool,
) -> Result<()> {
    let paths = config.paths();
    let pid = std::process::id();
    let uuid_file = paths.uuid_file(pid);
    let env_file = paths.env_file(pid);
    let with_env = !config.worker.environment.is_empty();

    let mut cmd = {
        let launch = WorkerLaunch {
            general_options: &config.worker.general_options,
            run_options: &config.worker.run_options,
            uuid_file: &uuid_file,
            env_file: with_env.then_some(env_file.as_path()),
            image: worker.image(),
            app_name: worker.app_name(),
            uid: worker.owner().uid,
            exec: &config.worker.exec,
        };
        if dry_run {
            println!(
                "{} {}",
                rkt.program().display(),
                worker_run_args(&launch).join(" ")
            );
            return Ok(());
        }
        rkt.worker_run_command(&launch)
    };

    let run_dir = paths.run_dir(pid);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create {}", run_dir.display()))?;

    let res = async {
        if with_env {
            write_env_file(&env_file, &config.env_file_contents())?;
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to run {}", rkt.program().display()))?;
        info!(app = worker.app_name(), image = worker.image(), "starting worker pod");
        worker
            .initialize_pod(&uuid_file, async move {
                let status = child.wait().await.context("failed waiting for rkt run")?;
                check_exit("rkt run", status)
            })
            .await
    }
    .await;

    remove_handoff_files(&run_dir, &uuid_file, &env_file);
    res
}

fn write_env_file(path: &Path, contents: &str) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}

fn remove_handoff_files(run_dir: &Path, uuid_file: &Path, env_file: &Path) {
    // The runtime may not have written the UUID file if it failed early.
    for file in [uuid_file, env_file] {
        if let Err(e) = remove_if_present(file) {
            warn!(path = %file.display(), error = %e, "failed to remove hand-off file");
        }
    }
    if let Err(e) = std::fs::remove_dir(run_dir) {
        warn!(path = %run_dir.display(), error = %e, "failed to remove run directory");
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        res => res,
    }
}

// ---------------------------------------------------------------------------
// cmd_get_worker: print the UUID of a reusable worker pod
// ---------------------------------------------------------------------------

async fn cmd_get_worker(config: &Config, rkt: &Arc<RktCli>, owner: Owner, image: &str) -> Result<()> {
    let mut worker = Worker::new(
        as_runtime(rkt),
        PodLocks::new(config.paths()),
        owner,
        image,
        config.worker_settings(),
    )
    .await;

    let Some(uuid) = worker.uuid().map(str::to_owned) else {
        anyhow::bail!(
            "no reusable worker pod {} for {}",
            worker.app_name(),
            worker.image()
        );
    };
    println!("{uuid}");
    worker.release();
    Ok(())
}

// ---------------------------------------------------------------------------
// cmd_attach: wait for a named pod and attach to it
// ---------------------------------------------------------------------------

async fn cmd_attach(
    config: &Config,
    rkt: &Arc<RktCli>,
    app_name: &str,
    done_path: Option<PathBuf>,
) -> Result<()> {
    let mut attacher = Attacher::new(as_runtime(rkt), config.attach_settings(done_path));
    attacher.by_name(app_name);

    let abort = attacher.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            abort.cancel();
        }
    });

    attacher.wait().await
}

// ---------------------------------------------------------------------------
// cmd_gc: stop idle worker pods
// ---------------------------------------------------------------------------

async fn cmd_gc(
    config: &Config,
    rkt: &Arc<RktCli>,
    grace_period: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let grace_period = match grace_period {
        Some(s) => parse_duration(s).context("invalid --grace-period")?,
        None => config.grace_period()?,
    };
    let sweep = GcSweep::new(
        as_runtime(rkt),
        PodLocks::new(config.paths()),
        GcSettings {
            grace_period,
            dry_run,
        },
    );

    let report = sweep.sweep().await?;
    info!(
        examined = report.pods.len(),
        stopped = report.with_outcome(&PodOutcome::Stopped).len(),
        would_stop = report.with_outcome(&PodOutcome::WouldStop).len(),
        busy = report.with_outcome(&PodOutcome::Busy).len(),
        "gc finished"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// cmd_list
// ---------------------------------------------------------------------------

async fn cmd_list(rkt: &RktCli) -> Result<()> {
    for pod in rkt.list().await? {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            pod.uuid,
            pod.app_name,
            pod.image,
            pod.state,
            pod.started.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_files_are_removed_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("runner-42");
        std::fs::create_dir(&run_dir).unwrap();
        let uuid_file = run_dir.join("uuid");
        let env_file = run_dir.join("env");
        std::fs::write(&uuid_file, "4f2bd4bb").unwrap();

        remove_handoff_files(&run_dir, &uuid_file, &env_file);
        assert!(!run_dir.exists());
    }

    #[test]
    fn only_missing_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        remove_if_present(&dir.path().join("uuid")).unwrap();

        // A directory in place of the file is a real failure.
        let err = remove_if_present(dir.path()).unwrap_err();
        assert_ne!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
