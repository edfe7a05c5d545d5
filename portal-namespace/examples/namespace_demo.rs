//! List the mount points of a process from inside its namespaces
//!
//! Run with: cargo run --example namespace_demo -- <pid>
//! Run as root: sudo cargo run --example namespace_demo -- 1

use nix::errno::Errno;
use portal_core::ProcessId;
use portal_namespace::{NamespaceSet, Session, SessionConfig, namespace_links};
use std::fs;
use std::path::Path;

fn list_mounts<B: portal_namespace::NamespaceBackend>(session: &mut Session<B>) -> i32 {
    let pid = session.target_pid();
    println!("{pid} {}", session.namespaces());

    if !Path::new("/proc").exists() {
        eprintln!("\"/proc\" is not found, retry");
        return if session.namespaces().has(portal_namespace::NamespaceKind::Mnt) {
            Errno::EAGAIN as i32
        } else {
            Errno::ENOENT as i32
        };
    }

    let mut path = format!("/proc/{pid}/mounts");
    if !Path::new(&path).exists() {
        path = "/proc/self/mounts".to_string();
    }

    match fs::read_to_string(&path) {
        Ok(mounts) => {
            for line in mounts.lines() {
                if let Some(mount_point) = line.split_whitespace().nth(1) {
                    println!("  {mount_point}");
                }
            }
            0
        }
        Err(e) => {
            eprintln!("Cannot read {path}: {e}");
            Errno::ENOENT as i32
        }
    }
}

fn run(pid: ProcessId, kinds: NamespaceSet) -> bool {
    let mut session = match Session::new(pid, kinds, SessionConfig::new().with_keep_caps(true)) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("❌ {e}");
            return false;
        }
    };

    if let Err(e) = session.enter(list_mounts) {
        eprintln!("❌ {e}");
    }
    for (kind, errno) in session.errors() {
        eprintln!("ERROR: <{}> {errno}", kind.name().to_ascii_uppercase());
    }
    session.retry()
}

fn main() {
    tracing_subscriber::fmt::init();

    let pid = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or_else(ProcessId::current);

    print!("{}", namespace_links(&portal_namespace::ProcFs::default(), pid.into()));

    let kinds = NamespaceSet::MNT | NamespaceSet::PID | NamespaceSet::USER;
    if run(pid, kinds) {
        println!("\n🔁 Retrying without the mount namespace\n");
        run(pid, kinds - NamespaceSet::MNT);
    }
}
