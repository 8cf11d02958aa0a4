use std::collections::BTreeSet;

/// Pids that belong to the monitored tree in the current cycle.
pub type WatchedSet = BTreeSet<u32>;

/// Memory context a process holds on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Compute,
    Graphics,
}

impl ContextKind {
    pub const ALL: [ContextKind; 2] = [ContextKind::Compute, ContextKind::Graphics];

    pub fn as_str(self) -> &'static str {
        match self {
            ContextKind::Compute => "compute",
            ContextKind::Graphics => "graphics",
        }
    }
}

/// One entry of a device's running-process snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessMemory {
    pub pid: u32,
    pub used_bytes: u64,
}

/// One entry of a device's incremental utilization stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtilizationSample {
    pub pid: u32,
    /// Driver timestamp in microseconds.
    pub timestamp: u64,
    pub sm_util: u32,
    pub mem_util: u32,
}

/// Accelerator usage attributed to one watched process for the current cycle.
///
/// Memory is summed over devices and contexts. Utilization is whatever the
/// last device processed reported, it is not combined across devices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub fb_mem_used: u64,
    pub sm_util: u32,
    pub mem_util: u32,
}
