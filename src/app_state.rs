use crate::gpu::aggregate::CycleStats;
use crate::gpu::info::DeviceInventory;
use crate::utils::system::Discovery;

/// State the monitor owns for the lifetime of a run.
pub struct AppState {
    pub inventory: DeviceInventory,
    /// Set by the capability probe once the root process exists.
    pub discovery: Option<Discovery>,
    pub last_cycle: CycleStats,
    pub cycles: u64,
}

impl AppState {
    pub fn new(inventory: DeviceInventory) -> Self {
        Self {
            inventory,
            discovery: None,
            last_cycle: CycleStats::default(),
            cycles: 0,
        }
    }
}
