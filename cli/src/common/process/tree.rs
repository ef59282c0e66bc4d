//! # cloudcmd Process Trees (`common::process::tree`)
//!
//! File: cli/src/common/process/tree.rs
//!
//! ## Overview
//!
//! The wrapped CLI frequently forks helpers (plugins are separate binaries),
//! so stopping a command means stopping the whole tree rooted at the child we
//! spawned. `ProcessTree` enumerates descendants of a pid and delivers a
//! forceful kill to one pid at a time; the caller decides what to do when a
//! single kill fails.
//!
//! `PsProcessTree` reads the `pid`/`ppid` table from `ps` and sends `SIGKILL`
//! through `nix`.
//!
use crate::core::error::Result;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::process::Command;
use tracing::{debug, trace};

/// Process-tree enumeration and termination collaborator.
#[async_trait]
pub trait ProcessTree: Send + Sync {
    /// All descendants of `root` (children, grandchildren, ...), excluding `root`.
    async fn descendants(&self, root: u32) -> Result<Vec<u32>>;

    /// Forcefully terminates a single process.
    async fn kill(&self, pid: u32) -> Result<()>;
}

/// `ps`-based tree enumeration with `SIGKILL` termination.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsProcessTree;

#[async_trait]
impl ProcessTree for PsProcessTree {
    async fn descendants(&self, root: u32) -> Result<Vec<u32>> {
        let output = Command::new("ps")
            .args(["-A", "-o", "pid=,ppid="])
            .output()
            .await
            .context("Failed to run 'ps' to enumerate the process tree")?;
        if !output.status.success() {
            return Err(anyhow!(
                "'ps' exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let table = parse_ps_table(&String::from_utf8_lossy(&output.stdout));
        let found = collect_descendants(&table, root);
        debug!("Process {} has {} descendant(s)", root, found.len());
        Ok(found)
    }

    #[cfg(unix)]
    async fn kill(&self, pid: u32) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).with_context(|| format!("pid {} out of range", pid))?;
        kill(Pid::from_raw(raw), Signal::SIGKILL)
            .with_context(|| format!("Failed to send SIGKILL to {}", pid))?;
        trace!("Sent SIGKILL to {}", pid);
        Ok(())
    }

    #[cfg(not(unix))]
    async fn kill(&self, pid: u32) -> Result<()> {
        let status = Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .status()
            .await
            .context("Failed to run 'taskkill'")?;
        if !status.success() {
            return Err(anyhow!("taskkill for {} exited with {}", pid, status));
        }
        trace!("Terminated {}", pid);
        Ok(())
    }
}

/// Parses `pid ppid` rows; malformed rows are skipped.
fn parse_ps_table(text: &str) -> Vec<(u32, u32)> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

/// Breadth-first walk from `root` over a `(pid, ppid)` table.
fn collect_descendants(table: &[(u32, u32)], root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, ppid) in table {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(parent) = queue.pop_front() {
        if let Some(kids) = children.get(&parent) {
            for &kid in kids {
                if kid != root && !found.contains(&kid) {
                    found.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }
    found
}
