//! Exec command implementation

use anyhow::{Context, Result};
use portal_namespace::{NamespaceSet, Session};
use std::os::unix::process::ExitStatusExt;
use std::process::Command;
use tracing::{debug, error};

use crate::cli::SessionArgs;

pub fn execute(
    args: &SessionArgs,
    namespaces: NamespaceSet,
    command: &[String],
    json: bool,
) -> Result<i32> {
    let (program, rest) = command.split_first().context("No command given")?;

    let mut session = Session::new(args.pid, namespaces, args.config())
        .with_context(|| format!("Failed to open the namespaces of pid {}", args.pid))?;

    let outcome = session
        .enter(|s| {
            debug!(namespaces = %s.namespaces(), program = %program, "Running command");
            run_command(program, rest)
        })
        .context("Namespace session failed")?;

    super::report_errors(&session.report(), json);
    Ok(super::finish(outcome))
}

fn run_command(program: &str, args: &[String]) -> i32 {
    let status = match Command::new(program).args(args).status() {
        Ok(status) => status,
        Err(e) => {
            error!(program, error = %e, "Failed to run command");
            return e.raw_os_error().unwrap_or(libc::EIO);
        }
    };

    super::flush_stdout();
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
