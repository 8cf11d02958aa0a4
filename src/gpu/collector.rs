use crate::gpu::backend::{fetch_variable_length, GpuBackend};
use crate::gpu::info::{DeviceInventory, SampleCursor};
use crate::gpu::process::{ContextKind, UtilizationSample, WatchedSet};
use crate::observer::CollectObserver;
use std::collections::BTreeMap;

/// What one device contributed to the current cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeviceSample {
    pub index: u32,
    /// Watched pid -> bytes, summed over compute and graphics contexts.
    pub memory: BTreeMap<u32, u64>,
    /// Device-wide used memory, `None` if the query failed.
    pub used_memory: Option<u64>,
    /// Watched pid -> newest utilization sample in this device's batch.
    pub utilization: BTreeMap<u32, UtilizationSample>,
}

/// Polls one device. Failures of individual queries leave the matching part
/// of the sample empty; they never abort the device.
pub fn collect_device<B: GpuBackend + ?Sized>(
    backend: &B,
    index: u32,
    mut cursor: SampleCursor,
    watched: &WatchedSet,
    observer: &mut dyn CollectObserver,
) -> (DeviceSample, SampleCursor) {
    observer.device_start(index);
    let mut sample = DeviceSample {
        index,
        ..Default::default()
    };

    for kind in ContextKind::ALL {
        match fetch_variable_length(|| backend.running_processes(index, kind)) {
            Ok(processes) => {
                observer.context_result(index, kind, Ok(processes.len()));
                for process in processes {
                    if watched.contains(&process.pid) {
                        let used = sample.memory.entry(process.pid).or_insert(0);
                        *used = used.saturating_add(process.used_bytes);
                    }
                }
            }
            Err(e) => observer.context_result(index, kind, Err(&e)),
        }
    }

    match backend.used_memory(index) {
        Ok(used) => sample.used_memory = Some(used),
        Err(e) => observer.used_memory_failed(index, &e),
    }

    let since = cursor.last_timestamp();
    match fetch_variable_length(|| backend.utilization_samples(index, since)) {
        Ok(batch) => {
            observer.utilization_result(index, Ok(batch.len()));
            for s in batch {
                // Unwatched samples move the cursor too, otherwise they are
                // delivered again next cycle.
                cursor.advance(s.timestamp);
                let is_watched = watched.contains(&s.pid);
                observer.sample(index, &s, is_watched);
                if !is_watched {
                    continue;
                }
                match sample.utilization.get(&s.pid) {
                    Some(kept) if kept.timestamp > s.timestamp => {}
                    _ => {
                        sample.utilization.insert(s.pid, s);
                    }
                }
            }
        }
        Err(e) => observer.utilization_result(index, Err(&e)),
    }

    (sample, cursor)
}

/// Polls every device in index order, updating each device's cursor.
pub fn collect<B: GpuBackend + ?Sized>(
    backend: &B,
    inventory: &mut DeviceInventory,
    watched: &WatchedSet,
    observer: &mut dyn CollectObserver,
) -> Vec<DeviceSample> {
    let mut samples = Vec::with_capacity(inventory.devices.len());
    for device in inventory.devices.iter_mut() {
        let cursor = std::mem::take(&mut device.cursor);
        let (sample, cursor) = collect_device(backend, device.info.index, cursor, watched, observer);
        device.cursor = cursor;
        samples.push(sample);
    }
    samples
}
