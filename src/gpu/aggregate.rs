use crate::gpu::collector::DeviceSample;
use crate::gpu::process::ProcessStats;
use std::collections::BTreeMap;

/// Everything attributed during one cycle. Rebuilt from scratch every cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub processes: BTreeMap<u32, ProcessStats>,
    /// Device index -> device-wide used memory in bytes.
    pub device_used_memory: BTreeMap<u32, u64>,
}

impl CycleStats {
    pub fn total_process_memory(&self) -> u64 {
        self.processes
            .values()
            .fold(0u64, |acc, s| acc.saturating_add(s.fb_mem_used))
    }

    pub fn total_device_memory(&self) -> u64 {
        self.device_used_memory
            .values()
            .fold(0u64, |acc, used| acc.saturating_add(*used))
    }
}

/// Merges per-device contributions into one record per process.
///
/// Devices are visited in index order. Memory is summed; a process's
/// utilization is overwritten by every device that reports it, so a process
/// spread over several devices keeps only the highest-indexed device's reading.
pub fn aggregate(samples: &[DeviceSample]) -> CycleStats {
    let mut ordered: Vec<&DeviceSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.index);

    let mut stats = CycleStats::default();
    for sample in ordered {
        if let Some(used) = sample.used_memory {
            stats.device_used_memory.insert(sample.index, used);
        }

        for (pid, bytes) in &sample.memory {
            let entry = stats.processes.entry(*pid).or_default();
            entry.fb_mem_used = entry.fb_mem_used.saturating_add(*bytes);
        }

        for (pid, util) in &sample.utilization {
            let entry = stats.processes.entry(*pid).or_default();
            entry.sm_util = util.sm_util;
            entry.mem_util = util.mem_util;
        }
    }
    stats
}
