//! Extension points the collector reports through.
//!
//! The collector never logs directly; it tells an observer what happened and
//! the observer decides what to do with it.

use crate::error::QueryError;
use crate::gpu::process::{ContextKind, UtilizationSample};
use log::{debug, trace};

pub trait CollectObserver {
    fn device_start(&mut self, _device: u32) {}

    /// Entry count of a process-memory snapshot, or why it produced nothing.
    fn context_result(
        &mut self,
        _device: u32,
        _kind: ContextKind,
        _result: Result<usize, &QueryError>,
    ) {
    }

    fn used_memory_failed(&mut self, _device: u32, _err: &QueryError) {}

    /// Size of the utilization batch fetched since the device cursor.
    fn utilization_result(&mut self, _device: u32, _result: Result<usize, &QueryError>) {}

    fn sample(&mut self, _device: u32, _sample: &UtilizationSample, _watched: bool) {}
}

#[cfg(test)]
pub struct NoopObserver;

#[cfg(test)]
impl CollectObserver for NoopObserver {}

/// Forwards collection events to the `log` facade at diagnostic levels.
pub struct LogObserver;

impl CollectObserver for LogObserver {
    fn device_start(&mut self, device: u32) {
        trace!("GPU {}: collecting", device);
    }

    fn context_result(
        &mut self,
        device: u32,
        kind: ContextKind,
        result: Result<usize, &QueryError>,
    ) {
        let kind = kind.as_str();
        match result {
            Ok(0) => trace!("GPU {}: no {} processes", device, kind),
            Ok(n) => trace!("GPU {}: {} {} processes", device, n, kind),
            Err(e) => debug!("GPU {}: {} process query failed: {}", device, kind, e),
        }
    }

    fn used_memory_failed(&mut self, device: u32, err: &QueryError) {
        debug!("GPU {}: memory info query failed: {}", device, err);
    }

    fn utilization_result(&mut self, device: u32, result: Result<usize, &QueryError>) {
        match result {
            Ok(0) => trace!("GPU {}: no new utilization samples", device),
            Ok(n) => trace!("GPU {}: {} utilization samples", device, n),
            Err(e) => debug!("GPU {}: utilization query failed: {}", device, e),
        }
    }

    fn sample(&mut self, device: u32, sample: &UtilizationSample, watched: bool) {
        trace!(
            "GPU {}: pid {} ts {} sm {}% mem {}%{}",
            device,
            sample.pid,
            sample.timestamp,
            sample.sm_util,
            sample.mem_util,
            if watched { "" } else { " (not watched)" }
        );
    }
}
