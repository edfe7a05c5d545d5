//! Namespaces command implementation

use anyhow::{Context, Result};
use portal_core::{Error, ProcEntry, ProcessId};
use portal_namespace::{NamespaceKind, NamespaceSet, ProcFs, namespace_links};
use std::collections::BTreeMap;
use std::path::Path;

pub fn execute(pid: Option<ProcessId>, proc_root: &Path, json: bool) -> Result<()> {
    let procfs = ProcFs::new(proc_root);
    let entry = pid.map_or(ProcEntry::Current, ProcEntry::Pid);

    if !procfs.exists(entry) {
        let pid = pid.unwrap_or_else(ProcessId::current);
        return Err(Error::ProcessNotFound { pid: pid.as_raw() })
            .context("Failed to get namespace information");
    }

    let links = namespace_links(&procfs, entry);

    if json {
        let map: BTreeMap<NamespaceKind, Option<&str>> = links.iter().collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    println!("\n🔒 Namespace Information for PID {entry}");
    println!("{:-<60}", "");
    print!("{links}");

    if pid.is_some() {
        let ours = namespace_links(&procfs, ProcEntry::Current);
        let differing: NamespaceSet = links.differing(&ours).into_iter().collect();

        if differing.is_empty() {
            println!("\n✅ Shares every namespace with this process");
        } else {
            println!("\n⚠️  Differs from this process in: {differing}");
        }
    }

    Ok(())
}
