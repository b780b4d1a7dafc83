//! Which command-line overrides an unprivileged caller may use.
//!
//! podpool runs with root privileges on behalf of ordinary users. Choosing
//! another config file (and with it the runtime binary), another uid or
//! another worker name is reserved for root. Anyone may do so in a dry run,
//! which then proceeds with the caller's own privileges.

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Privilege {
    Keep,
    Drop,
}

pub(crate) fn check_invocation(cli: &Cli, caller_is_root: bool) -> Result<Privilege> {
    if caller_is_root {
        return Ok(Privilege::Keep);
    }

    let (dry_run, identity_override) = match &cli.command {
        Commands::Run {
            uid, user, dry_run, ..
        } => (*dry_run, uid.is_some() || user.is_some()),
        Commands::GetWorker { .. } => anyhow::bail!("get-worker requires root"),
        Commands::Gc { dry_run, .. } => (*dry_run, false),
        Commands::Attach { .. } | Commands::List => (false, false),
    };

    if identity_override && !dry_run {
        anyhow::bail!("--uid and --user require root or --dry-run");
    }
    if cli.config.is_some() && !dry_run {
        anyhow::bail!("alternate config file requires root or --dry-run");
    }

    if identity_override || cli.config.is_some() {
        Ok(Privilege::Drop)
    } else {
        Ok(Privilege::Keep)
    }
}

/// Give up the effective uid and gid for the rest of the process.
pub(crate) fn drop_privileges() -> Result<()> {
    use nix::unistd::{getgid, getuid, setegid, seteuid};

    setegid(getgid()).context("failed to drop group privileges")?;
    seteuid(getuid()).context("failed to drop user privileges")?;
    Ok(())
}
