use crate::gpu::process::WatchedSet;
use log::warn;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use procfs::process::Process;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

/// How long the root gets to exit after SIGTERM before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Read access to the host's process table.
pub trait ProcessTable {
    /// Direct children of `pid`, or `None` if they cannot be read.
    fn children(&self, pid: u32) -> Option<Vec<u32>>;

    /// Whether children of `pid` can be listed at all on this host.
    fn supports_children(&self, pid: u32) -> bool;
}

/// `/proc` backed table. Children are read from every thread of a process,
/// since a child belongs to the thread that forked it.
pub struct ProcfsTable;

impl ProcessTable for ProcfsTable {
    fn children(&self, pid: u32) -> Option<Vec<u32>> {
        let process = Process::new(pid as i32).ok()?;
        let mut children = Vec::new();
        for task in process.tasks().ok()?.flatten() {
            if let Ok(pids) = task.children() {
                children.extend(pids);
            }
        }
        Some(children)
    }

    fn supports_children(&self, pid: u32) -> bool {
        Process::new(pid as i32)
            .and_then(|p| p.task_main_thread())
            .and_then(|t| t.children())
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Tree,
    /// Child listing is unavailable; only the root is ever watched.
    RootOnly,
}

/// Decides once how the watched set is found, then recomputes it on demand.
#[derive(Debug, Clone, Copy)]
pub struct Discovery {
    pub mode: DiscoveryMode,
}

impl Discovery {
    pub fn probe<T: ProcessTable + ?Sized>(table: &T, root: u32) -> Self {
        let mode = if table.supports_children(root) {
            DiscoveryMode::Tree
        } else {
            DiscoveryMode::RootOnly
        };
        Self { mode }
    }

    pub fn is_degraded(&self) -> bool {
        self.mode == DiscoveryMode::RootOnly
    }

    pub fn discover<T: ProcessTable + ?Sized>(&self, table: &T, root: u32) -> WatchedSet {
        match self.mode {
            DiscoveryMode::Tree => discover_tree(table, root),
            DiscoveryMode::RootOnly => WatchedSet::from([root]),
        }
    }
}

/// Root plus all live descendants, walked with an explicit worklist.
///
/// The root is always part of the result, even if it has already exited.
/// A pid is expanded at most once, so reparenting loops or duplicate entries
/// in the table cannot make the walk revisit a subtree.
pub fn discover_tree<T: ProcessTable + ?Sized>(table: &T, root: u32) -> WatchedSet {
    let mut seen = WatchedSet::from([root]);
    let mut worklist = vec![root];

    while let Some(pid) = worklist.pop() {
        for child in table.children(pid).unwrap_or_default() {
            if child > 0 && seen.insert(child) {
                worklist.push(child);
            }
        }
    }
    seen
}

/// A process that is already gone is not an error.
fn signal_root(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(_) | Err(nix::Error::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Stops and reaps the root process: SIGTERM first, SIGKILL once `grace` has
/// passed without it exiting. The status is polled every `poll`.
pub fn stop_root(child: &mut Child, grace: Duration, poll: Duration) -> io::Result<ExitStatus> {
    let pid = child.id();
    if let Err(e) = signal_root(pid, Signal::SIGTERM) {
        warn!("Failed to send SIGTERM to PID {}: {}", pid, e);
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        thread::sleep(poll);
    }
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    warn!(
        "PID {} still running {:.1} s after SIGTERM, sending SIGKILL",
        pid,
        grace.as_secs_f64()
    );
    if let Err(e) = signal_root(pid, Signal::SIGKILL) {
        warn!("Failed to send SIGKILL to PID {}: {}", pid, e);
    }
    child.wait()
}

/// Shell-style exit code: the process's own code, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
