//! Mounts command implementation

use anyhow::{Context, Result};
use nix::errno::Errno;
use portal_core::ProcessId;
use portal_namespace::{NamespaceKind, NamespaceSet, Session};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::cli::SessionArgs;

pub fn execute(args: &SessionArgs, json: bool) -> Result<i32> {
    let wide = NamespaceSet::MNT | NamespaceSet::PID | NamespaceSet::USER;

    let (status, retry) = attempt(args, wide, json)?;
    if !retry {
        return Ok(status);
    }

    info!(pid = %args.pid, "Retrying without the mount namespace");
    let (status, _) = attempt(args, wide - NamespaceSet::MNT, json)?;
    Ok(status)
}

fn attempt(args: &SessionArgs, kinds: NamespaceSet, json: bool) -> Result<(i32, bool)> {
    let mut session = Session::new(args.pid, kinds, args.config())
        .with_context(|| format!("Failed to open the namespaces of pid {}", args.pid))?;

    let outcome = session
        .enter(|s| {
            let proc_root = s.config().proc_root.clone();
            list_mounts(s.target_pid(), s.namespaces(), &proc_root, json)
        })
        .context("Namespace session failed")?;

    super::report_errors(&session.report(), json);
    Ok((super::finish(outcome), session.retry()))
}

/// Runs inside the target namespaces
fn list_mounts(pid: ProcessId, namespaces: NamespaceSet, proc_root: &Path, json: bool) -> i32 {
    if !json {
        println!("{pid} {namespaces}");
    }

    if !proc_root.exists() {
        warn!(path = %proc_root.display(), "procfs is not found, retry");
        return if namespaces.has(NamespaceKind::Mnt) {
            Errno::EAGAIN as i32
        } else {
            Errno::ENOENT as i32
        };
    }

    let mut path = proc_root.join(pid.to_string()).join("mounts");
    if !path.exists() {
        path = proc_root.join("self").join("mounts");
    }

    let mounts = match fs::read_to_string(&path) {
        Ok(mounts) => mounts,
        Err(e) => {
            warn!(%pid, path = %path.display(), error = %e, "Cannot read mount table");
            return Errno::ENOENT as i32;
        }
    };

    let points: Vec<&str> = mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .collect();

    if json {
        println!("{}", serde_json::json!({ "pid": pid, "mounts": points }));
    } else {
        for point in points {
            println!("  {point}");
        }
    }

    super::flush_stdout();
    0
}
