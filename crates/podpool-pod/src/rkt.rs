//! `PodRuntime` backed by the rkt command line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use podpool_core::{Pod, PodManifest, PodRuntime, PodState, RuntimeExit, StatusReport};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Everything needed to start a worker pod in the background.
#[derive(Debug, Clone, Copy)]
pub struct WorkerLaunch<'a> {
    /// Options placed before the `run` subcommand.
    pub general_options: &'a [String],
    /// Options placed after the `run` subcommand.
    pub run_options: &'a [String],
    pub uuid_file: &'a Path,
    pub env_file: Option<&'a Path>,
    pub image: &'a str,
    pub app_name: &'a str,
    pub uid: u32,
    /// Program and arguments that keep the worker alive. Empty means the
    /// image's own entrypoint.
    pub exec: &'a [String],
}

#[derive(Debug, Clone)]
pub struct RktCli {
    rkt: PathBuf,
}

impl RktCli {
    pub fn new(rkt: impl Into<PathBuf>) -> Self {
        Self { rkt: rkt.into() }
    }

    pub fn program(&self) -> &Path {
        &self.rkt
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.rkt);
        cmd.kill_on_drop(false);
        cmd
    }

    /// `rkt run` for a new worker pod. The runtime writes the pod's UUID to
    /// `launch.uuid_file` once it is known.
    pub fn worker_run_command(&self, launch: &WorkerLaunch<'_>) -> Command {
        let mut cmd = self.command();
        cmd.args(worker_run_args(launch));
        cmd.stdin(Stdio::null());
        cmd
    }

    /// `rkt enter` running `argv` inside the pod, bound to the host's stdio.
    pub fn enter_command(&self, uuid: &str, argv: &[String]) -> Command {
        let mut cmd = self.command();
        cmd.arg("enter").arg(uuid).args(argv);
        cmd
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(rkt = %self.rkt.display(), ?args, "running rkt");
        self.command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {} {}", self.rkt.display(), args.join(" ")))
    }
}

/// Argument vector for a worker `rkt run`, without the program name.
pub fn worker_run_args(launch: &WorkerLaunch<'_>) -> Vec<String> {
    let mut args: Vec<String> = launch.general_options.to_vec();
    args.push("run".to_owned());
    args.push("--uuid-file-save".to_owned());
    args.push(launch.uuid_file.display().to_string());
    if let Some(env_file) = launch.env_file {
        args.push("--set-env-file".to_owned());
        args.push(env_file.display().to_string());
    }
    args.extend_from_slice(launch.run_options);
    args.push(launch.image.to_owned());
    args.push("--name".to_owned());
    args.push(launch.app_name.to_owned());
    args.push("--user".to_owned());
    args.push(launch.uid.to_string());
    if let Some((program, rest)) = launch.exec.split_first() {
        args.push("--exec".to_owned());
        args.push(program.clone());
        if !rest.is_empty() {
            args.push("--".to_owned());
            args.extend_from_slice(rest);
        }
    }
    args
}

/// Map a runtime exit status to `Ok` or a `RuntimeExit` marker.
pub fn check_exit(command: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(RuntimeExit {
            command: command.to_owned(),
            code: status.code(),
        }
        .into())
    }
}

/// Parse `rkt list --full --no-legend` output.
///
/// Columns are tab separated (and tab padded): UUID, app name, image,
/// network, state, and optionally created and started times. Runs of tabs
/// count as one separator, and rows with fewer than five columns are skipped.
pub fn parse_list(output: &str) -> Vec<Pod> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line
                .split('\t')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .collect();
            if fields.len() < 5 {
                return None;
            }
            Some(Pod {
                uuid: fields[0].to_owned(),
                app_name: fields[1].to_owned(),
                image: fields[2].to_owned(),
                state: PodState::parse(fields[4]),
                created: fields.get(5).map(|s| (*s).to_owned()),
                started: fields.get(6).map(|s| (*s).to_owned()),
            })
        })
        .collect()
}

#[async_trait]
impl PodRuntime for RktCli {
    async fn list(&self) -> Result<Vec<Pod>> {
        let output = self.output(&["list", "--full", "--no-legend"]).await?;
        anyhow::ensure!(
            output.status.success(),
            "rkt list failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        let stdout = String::from_utf8(output.stdout).context("rkt list output is not UTF-8")?;
        Ok(parse_list(&stdout))
    }

    async fn status(&self, uuid: &str) -> Result<StatusReport> {
        let output = self.output(&["status", uuid]).await?;
        let stdout =
            String::from_utf8(output.stdout).context("rkt status output is not UTF-8")?;
        Ok(StatusReport::parse(&stdout, output.status.success()))
    }

    async fn cat_manifest(&self, uuid: &str) -> Result<PodManifest> {
        let output = self.output(&["cat-manifest", uuid]).await?;
        anyhow::ensure!(
            output.status.success(),
            "rkt cat-manifest {uuid} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("failed to parse manifest of pod {uuid}"))
    }

    async fn attach(&self, uuid: &str) -> Result<()> {
        let status = self
            .command()
            .args(["attach", "--mode", "stdin,stdout,stderr", uuid])
            .env("RKT_EXPERIMENT_ATTACH", "true")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("failed to run {} attach", self.rkt.display()))?;
        check_exit("rkt attach", status)
    }

    async fn stop(&self, uuid: &str) -> Result<()> {
        let status = self
            .command()
            .args(["stop", uuid])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await
            .with_context(|| format!("failed to run {} stop", self.rkt.display()))?;
        check_exit("rkt stop", status)
    }
}
