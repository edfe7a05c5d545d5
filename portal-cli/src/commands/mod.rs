use crate::cli::Commands;
use anyhow::Result;
use portal_namespace::{Outcome, SessionReport};
use std::io::{self, Write};
use std::process;
use tracing::warn;

pub mod describe;
pub mod exec;
pub mod mounts;
pub mod namespaces;

/// Dispatch command to appropriate handler, returning the exit status
pub fn dispatch(command: Commands, json: bool) -> Result<i32> {
    match command {
        Commands::Mounts { session } => mounts::execute(&session, json),

        Commands::Exec {
            session,
            namespaces,
            command,
        } => exec::execute(&session, namespaces, &command, json),

        Commands::Namespaces { pid, proc_root } => {
            namespaces::execute(pid, &proc_root, json).map(|()| 0)
        }

        Commands::Describe { mask } => describe::execute(&mask, json).map(|()| 0),
    }
}

/// Exit status for a failed command: the errno behind it, if any
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<portal_core::Error>())
        .map_or(1, portal_core::Error::code)
}

/// Print the per-namespace failures of a session
fn report_errors(report: &SessionReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to serialize session report"),
        }
        return;
    }

    for (kind, message) in &report.errors {
        eprintln!("ERROR: <{}> {message}", kind.name().to_ascii_uppercase());
    }
}

/// Exit status when the user namespace could not be left
const RETAINED_STATUS: i32 = libc::ENOTRECOVERABLE;

/// Exit status for a finished session
fn status_of(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Restored { status } => *status,
        Outcome::UserNamespaceRetained(_) => RETAINED_STATUS,
    }
}

/// Exit status for a finished session.
///
/// A retained user namespace leaves this process unusable, so it exits here.
fn finish(outcome: Outcome) -> i32 {
    let status = status_of(&outcome);
    if let Outcome::UserNamespaceRetained(warning) = outcome {
        eprintln!("⚠️  {warning}");
        process::exit(status);
    }
    status
}

/// Flush output before a forked worker leaves through _exit
fn flush_output(out: &mut impl Write) -> bool {
    match out.flush() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Failed to flush output");
            false
        }
    }
}

fn flush_stdout() {
    flush_output(&mut io::stdout());
}
