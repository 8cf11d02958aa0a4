//! Read-only projections of a cycle's stats.

use crate::gpu::aggregate::CycleStats;
use crate::gpu::info::DeviceInfo;
use crate::utils::formatting::{bytes_to_mib, bytes_to_mib_f64};
use serde::Serialize;
use std::collections::BTreeMap;

/// Row fields, in output order.
pub const FLAT_FIELDS: [&str; 3] = ["gpufbmem", "gpumempct", "gpusmpct"];

/// Per-cycle row values: memory in whole MiB, utilization percentages summed
/// over all watched processes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlatView {
    pub gpufbmem: u64,
    pub gpumempct: u64,
    pub gpusmpct: u64,
}

impl FlatView {
    pub fn from_stats(stats: &CycleStats) -> Self {
        let (mem_util, sm_util) = stats.processes.values().fold((0u64, 0u64), |(m, s), p| {
            (m + u64::from(p.mem_util), s + u64::from(p.sm_util))
        });
        Self {
            gpufbmem: bytes_to_mib(stats.total_process_memory()),
            gpumempct: mem_util,
            gpusmpct: sm_util,
        }
    }

    pub fn fields(&self) -> [(&'static str, u64); 3] {
        [
            (FLAT_FIELDS[0], self.gpufbmem),
            (FLAT_FIELDS[1], self.gpumempct),
            (FLAT_FIELDS[2], self.gpusmpct),
        ]
    }
}

/// Summary totals: utilization is averaged over processes with a stats entry.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TotalsView {
    pub gpufbmem: f64,
    pub gpumempct: f64,
    pub gpusmpct: f64,
    #[serde(rename = "gpu_total_fbmem_MB")]
    pub gpu_total_fbmem_mb: f64,
}

impl TotalsView {
    pub fn from_stats(stats: &CycleStats) -> Self {
        let count = stats.processes.len();
        let (mem_util, sm_util) = stats.processes.values().fold((0.0, 0.0), |(m, s), p| {
            (m + f64::from(p.mem_util), s + f64::from(p.sm_util))
        });
        let (gpumempct, gpusmpct) = if count > 0 {
            (mem_util / count as f64, sm_util / count as f64)
        } else {
            (0.0, 0.0)
        };

        Self {
            gpufbmem: bytes_to_mib_f64(stats.total_process_memory()),
            gpumempct,
            gpusmpct,
            gpu_total_fbmem_mb: bytes_to_mib_f64(stats.total_device_memory()),
        }
    }
}

pub fn units() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("gpufbmem", "MB"),
        ("gpumempct", "%"),
        ("gpusmpct", "%"),
        ("gpu_total_fbmem_MB", "MB"),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuEntry {
    pub index: u32,
    pub name: String,
    pub clock_mhz: u32,
    #[serde(rename = "total_mem_MB")]
    pub total_mem_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareInfo {
    pub ngpus: usize,
    pub gpus: Vec<GpuEntry>,
}

impl HardwareInfo {
    pub fn from_devices<'a>(devices: impl Iterator<Item = &'a DeviceInfo>) -> Self {
        let gpus: Vec<GpuEntry> = devices
            .map(|d| GpuEntry {
                index: d.index,
                name: d.name.clone(),
                clock_mhz: d.clock_mhz,
                total_mem_mb: bytes_to_mib_f64(d.total_memory),
            })
            .collect();
        Self {
            ngpus: gpus.len(),
            gpus,
        }
    }
}

/// Per-process breakdown keyed `pid_<pid>_<field>`.
pub fn process_view(stats: &CycleStats) -> BTreeMap<String, f64> {
    let mut view = BTreeMap::new();
    for (pid, s) in &stats.processes {
        view.insert(
            format!("pid_{}_gpufbmem_MB", pid),
            bytes_to_mib_f64(s.fb_mem_used),
        );
        view.insert(format!("pid_{}_gpumempct", pid), f64::from(s.mem_util));
        view.insert(format!("pid_{}_gpusmpct", pid), f64::from(s.sm_util));
    }
    view
}

/// Document written at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub cycles: u64,
    pub totals: TotalsView,
    pub units: BTreeMap<&'static str, &'static str>,
    pub hardware: HardwareInfo,
    pub processes: BTreeMap<String, f64>,
}

impl Summary {
    pub fn new<'a>(
        stats: &CycleStats,
        devices: impl Iterator<Item = &'a DeviceInfo>,
        cycles: u64,
    ) -> Self {
        Self {
            cycles,
            totals: TotalsView::from_stats(stats),
            units: units(),
            hardware: HardwareInfo::from_devices(devices),
            processes: process_view(stats),
        }
    }
}
