use crate::error::{MonitorError, QueryError};
use crate::gpu::process::{ContextKind, ProcessMemory, UtilizationSample};
use log::debug;
use nvml_wrapper::enum_wrappers::device::Clock;
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;

/// Static facts about a device. Every field is best effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: Option<String>,
    pub total_memory: Option<u64>,
    pub clock_mhz: Option<u32>,
}

/// Counter sources the sampling engine reads from.
pub trait GpuBackend {
    fn device_count(&self) -> Result<u32, QueryError>;

    fn identity(&self, index: u32) -> DeviceIdentity;

    /// Running processes and the memory they hold in the given context.
    fn running_processes(
        &self,
        index: u32,
        kind: ContextKind,
    ) -> Result<Vec<ProcessMemory>, QueryError>;

    /// Device-wide used memory in bytes, independent of process attribution.
    fn used_memory(&self, index: u32) -> Result<u64, QueryError>;

    /// Utilization samples newer than `since`.
    fn utilization_samples(
        &self,
        index: u32,
        since: u64,
    ) -> Result<Vec<UtilizationSample>, QueryError>;
}

/// Runs a size-probe-then-fill query, retrying once if the result grew in between.
///
/// A second size mismatch or a "not found" answer yields an empty sequence.
/// Any other error is returned to the caller.
pub fn fetch_variable_length<T, F>(mut fetch: F) -> Result<Vec<T>, QueryError>
where
    F: FnMut() -> Result<Vec<T>, QueryError>,
{
    match fetch() {
        Err(QueryError::InsufficientSize(_)) => match fetch() {
            Err(QueryError::InsufficientSize(_)) | Err(QueryError::NotFound) => Ok(Vec::new()),
            other => other,
        },
        Err(QueryError::NotFound) => Ok(Vec::new()),
        other => other,
    }
}

pub struct NvmlBackend {
    nvml: Nvml,
}

impl NvmlBackend {
    pub fn init() -> Result<Self, MonitorError> {
        init_nvml()
            .map(|nvml| Self { nvml })
            .map_err(|e| MonitorError::HardwareUnavailable(e.to_string()))
    }
}

/// On Linux a failed `Nvml::init` is retried with the versioned library name,
/// which is all some driver installs ship.
fn init_nvml() -> Result<Nvml, NvmlError> {
    #[cfg(not(target_os = "linux"))]
    let res = Nvml::init();

    #[cfg(target_os = "linux")]
    let res = match Nvml::init() {
        Ok(nvml) => Ok(nvml),
        Err(_) => Nvml::builder()
            .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
            .init(),
    };

    if let Err(e) = &res {
        debug!("Failed to initialize NVML: {}", e);
    }

    res
}

impl GpuBackend for NvmlBackend {
    fn device_count(&self) -> Result<u32, QueryError> {
        Ok(self.nvml.device_count()?)
    }

    fn identity(&self, index: u32) -> DeviceIdentity {
        match self.nvml.device_by_index(index) {
            Ok(device) => DeviceIdentity {
                name: device.name().ok(),
                total_memory: device.memory_info().ok().map(|m| m.total),
                clock_mhz: device.max_clock_info(Clock::Graphics).ok(),
            },
            Err(_) => DeviceIdentity::default(),
        }
    }

    fn running_processes(
        &self,
        index: u32,
        kind: ContextKind,
    ) -> Result<Vec<ProcessMemory>, QueryError> {
        let device = self.nvml.device_by_index(index)?;
        let infos = match kind {
            ContextKind::Compute => device.running_compute_processes()?,
            ContextKind::Graphics => device.running_graphics_processes()?,
        };

        Ok(infos
            .into_iter()
            .map(|p| ProcessMemory {
                pid: p.pid,
                used_bytes: match p.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => bytes,
                    UsedGpuMemory::Unavailable => 0,
                },
            })
            .collect())
    }

    fn used_memory(&self, index: u32) -> Result<u64, QueryError> {
        Ok(self.nvml.device_by_index(index)?.memory_info()?.used)
    }

    fn utilization_samples(
        &self,
        index: u32,
        since: u64,
    ) -> Result<Vec<UtilizationSample>, QueryError> {
        let device = self.nvml.device_by_index(index)?;

        Ok(device
            .process_utilization_stats(since)?
            .into_iter()
            .map(|s| UtilizationSample {
                pid: s.pid,
                timestamp: s.timestamp,
                sm_util: s.sm_util,
                mem_util: s.mem_util,
            })
            .collect())
    }
}
