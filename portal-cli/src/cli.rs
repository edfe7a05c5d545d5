//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use portal_core::ProcessId;
use portal_namespace::{NamespaceSet, SessionConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Run work inside the namespaces of another process", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that opens a session
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Target process ID
    #[arg(short, long)]
    pub pid: ProcessId,

    /// UID to assume in the user namespace (default: owner of the target)
    #[arg(long)]
    pub uid: Option<u32>,

    /// GID to assume in the user namespace (default: group of the target)
    #[arg(long)]
    pub gid: Option<u32>,

    /// Always run in a forked worker
    #[arg(long)]
    pub fork: bool,

    /// Enter the user namespace for real. The process terminates afterwards
    #[arg(long)]
    pub true_user: bool,

    /// Keep capabilities when switching uid/gid
    #[arg(long)]
    pub keep_caps: bool,

    /// Where procfs is mounted
    #[arg(long, default_value = "/proc")]
    pub proc_root: PathBuf,
}

impl SessionArgs {
    pub fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::new()
            .with_fork(self.fork)
            .with_true_user(self.true_user)
            .with_keep_caps(self.keep_caps)
            .with_proc_root(&self.proc_root);

        if let Some(uid) = self.uid {
            config = config.with_uid(uid);
        }
        if let Some(gid) = self.gid {
            config = config.with_gid(gid);
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the mount points seen from inside a process's namespaces
    Mounts {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Run a command inside a process's namespaces
    Exec {
        #[command(flatten)]
        session: SessionArgs,

        /// Namespaces to enter, e.g. `mnt,net` or `all`
        #[arg(short = 'n', long = "ns", default_value = "all")]
        namespaces: NamespaceSet,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show namespace information
    Namespaces {
        /// Process ID (default: current process)
        #[arg(short, long)]
        pid: Option<ProcessId>,

        /// Where procfs is mounted
        #[arg(long, default_value = "/proc")]
        proc_root: PathBuf,
    },

    /// Print the namespace names in a bitmask
    Describe {
        /// Bitmask (`0x60000000`, `1610612736`) or names (`net|pid`)
        mask: String,
    },
}
