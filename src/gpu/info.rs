use crate::error::MonitorError;
use crate::gpu::backend::GpuBackend;
use crate::utils::formatting::format_memory_size;
use log::info;

/// Static identity of a device, read once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub total_memory: u64,
    pub clock_mhz: u32,
}

/// Watermark of the last utilization sample seen on a device.
///
/// Only ever moves forward. Collection takes it by value and hands back the
/// advanced cursor, so there is exactly one owner at any time.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SampleCursor {
    last_timestamp: u64,
}

impl SampleCursor {
    #[cfg(test)]
    pub fn new(last_timestamp: u64) -> Self {
        Self { last_timestamp }
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn advance(&mut self, timestamp: u64) {
        self.last_timestamp = self.last_timestamp.max(timestamp);
    }
}

pub struct Device {
    pub info: DeviceInfo,
    pub cursor: SampleCursor,
}

pub struct DeviceInventory {
    pub devices: Vec<Device>,
}

impl DeviceInventory {
    pub fn infos(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.iter().map(|d| &d.info)
    }
}

/// Reads the visible devices once. Missing names or capacities fall back to
/// empty/zero; only a failing library or an empty device list is an error.
pub fn enumerate_devices<B: GpuBackend + ?Sized>(
    backend: &B,
) -> Result<DeviceInventory, MonitorError> {
    let device_count = backend
        .device_count()
        .map_err(|e| MonitorError::HardwareUnavailable(e.to_string()))?;
    if device_count == 0 {
        return Err(MonitorError::HardwareUnavailable(
            "no NVIDIA GPU detected".to_string(),
        ));
    }

    let mut devices = Vec::with_capacity(device_count as usize);
    for index in 0..device_count {
        let identity = backend.identity(index);
        let info = DeviceInfo {
            index,
            name: identity.name.unwrap_or_default(),
            total_memory: identity.total_memory.unwrap_or(0),
            clock_mhz: identity.clock_mhz.unwrap_or(0),
        };
        info!(
            "GPU {}: {} ({}, {} MHz)",
            info.index,
            if info.name.is_empty() { "unknown" } else { info.name.as_str() },
            format_memory_size(info.total_memory),
            info.clock_mhz
        );
        devices.push(Device {
            info,
            cursor: SampleCursor::default(),
        });
    }

    Ok(DeviceInventory { devices })
}
