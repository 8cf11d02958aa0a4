use crate::app_state::AppState;
use crate::error::MonitorError;
use crate::gpu::aggregate::{aggregate, CycleStats};
use crate::gpu::backend::GpuBackend;
use crate::gpu::collector::collect;
use crate::gpu::info::enumerate_devices;
use crate::observer::{CollectObserver, LogObserver};
use crate::output::{Row, RowWriter};
use crate::stats::{FlatView, Summary};
use crate::utils::system::{Discovery, ProcessTable};
use log::{debug, error, info, warn};
use std::io::Write;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Pause between liveness checks, independent of the sampling interval.
pub const TICK: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub enum RunOutcome {
    /// The root process ended on its own.
    Exited(ExitStatus),
    /// A termination request arrived while the root was still running.
    Interrupted,
}

pub struct Monitor<B, T> {
    backend: B,
    table: T,
    state: AppState,
    interval: Duration,
    tick: Duration,
    observer: Box<dyn CollectObserver>,
}

impl<B: GpuBackend, T: ProcessTable> Monitor<B, T> {
    /// Reads the device inventory. Fails if there is nothing to monitor.
    pub fn new(backend: B, table: T, interval: Duration) -> Result<Self, MonitorError> {
        let inventory = enumerate_devices(&backend)?;
        Ok(Self {
            backend,
            table,
            state: AppState::new(inventory),
            interval,
            tick: TICK,
            observer: Box::new(LogObserver),
        })
    }

    #[cfg(test)]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    #[cfg(test)]
    pub fn with_observer(mut self, observer: Box<dyn CollectObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Checks once whether the root's children can be listed.
    pub fn probe(&mut self, root: u32) -> Discovery {
        let discovery = Discovery::probe(&self.table, root);
        if discovery.is_degraded() {
            warn!(
                "/proc/{0}/task/{0}/children not readable; monitoring only PID {0}",
                root
            );
        }
        self.state.discovery = Some(discovery);
        discovery
    }

    /// Discovery, collection and aggregation for one cycle.
    pub fn run_cycle(&mut self, root: u32) -> &CycleStats {
        let discovery = match self.state.discovery {
            Some(discovery) => discovery,
            None => self.probe(root),
        };
        let watched = discovery.discover(&self.table, root);
        let samples = collect(
            &self.backend,
            &mut self.state.inventory,
            &watched,
            self.observer.as_mut(),
        );

        self.state.last_cycle = aggregate(&samples);
        self.state.cycles += 1;
        debug!(
            "cycle {}: {} watched, {} with GPU stats",
            self.state.cycles,
            watched.len(),
            self.state.last_cycle.processes.len()
        );
        &self.state.last_cycle
    }

    /// Samples the tree rooted at `child` until it exits or `terminate` is set.
    ///
    /// A failed row write is logged once and ends row output; sampling goes on
    /// so the root is still observed to completion.
    pub fn run<W: Write>(
        &mut self,
        child: &mut Child,
        sink: &mut RowWriter<W>,
        terminate: &AtomicBool,
    ) -> Result<RunOutcome, MonitorError> {
        let root = child.id();
        self.probe(root);
        info!(
            "Monitoring PID tree rooted at {} every {:.3} s",
            root,
            self.interval.as_secs_f64()
        );

        let start = Instant::now();
        let mut last_sample: Option<Instant> = None;
        let mut rows_enabled = true;

        loop {
            if terminate.load(Ordering::SeqCst) {
                return Ok(RunOutcome::Interrupted);
            }
            if let Some(status) = child.try_wait().map_err(MonitorError::Wait)? {
                info!("Process exited: {}", status);
                return Ok(RunOutcome::Exited(status));
            }

            if last_sample.map_or(true, |t| t.elapsed() >= self.interval) {
                last_sample = Some(Instant::now());
                let fields = FlatView::from_stats(self.run_cycle(root)).fields();
                if rows_enabled {
                    let row = Row {
                        timestamp: unix_now(),
                        elapsed: start.elapsed(),
                        fields: &fields,
                    };
                    if let Err(e) = sink.write_row(&row) {
                        error!("Failed to write output, no further rows will be written: {}", e);
                        rows_enabled = false;
                    }
                }
            }

            thread::sleep(self.tick);
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::new(
            &self.state.last_cycle,
            self.state.inventory.infos(),
            self.state.cycles,
        )
    }

    #[cfg(test)]
    fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backend::fake::{FakeBackend, FakeDevice};
    use crate::gpu::process::{ProcessMemory, ProcessStats, UtilizationSample};
    use crate::observer::NoopObserver;
    use crate::output::OutputFormat;
    use crate::stats::TotalsView;
    use crate::utils::formatting::MIB;
    use crate::utils::system::{exit_code, stop_root, STOP_GRACE};
    use crate::utils::system::tests::StaticTable;
    use std::io;
    use std::process::Command;

    fn monitor(backend: FakeBackend, table: StaticTable) -> Monitor<FakeBackend, StaticTable> {
        Monitor::new(backend, table, Duration::ZERO)
            .unwrap()
            .with_tick(Duration::from_millis(10))
            .with_observer(Box::new(NoopObserver))
    }

    fn util(pid: u32, timestamp: u64, sm_util: u32, mem_util: u32) -> UtilizationSample {
        UtilizationSample {
            pid,
            timestamp,
            sm_util,
            mem_util,
        }
    }

    #[test]
    fn stats_only_contain_watched_pids() {
        let mut device = FakeDevice::named("A100", 40 << 30);
        device.compute = vec![
            ProcessMemory { pid: 1, used_bytes: MIB },
            ProcessMemory { pid: 2, used_bytes: MIB },
            ProcessMemory { pid: 99, used_bytes: MIB },
        ];
        device.samples = vec![util(99, 10, 50, 50), util(2, 11, 20, 5)];
        let table = StaticTable::with(&[(1, vec![2])]);
        let mut monitor = monitor(FakeBackend::new(vec![device]), table);

        let stats = monitor.run_cycle(1);

        assert_eq!(stats.processes.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(stats.processes[&2].sm_util, 20);
        assert_eq!(monitor.state().inventory.devices[0].cursor.last_timestamp(), 11);
    }

    #[test]
    fn utilization_from_last_device_with_independent_cursors() {
        let mut d0 = FakeDevice::named("A100", 40 << 30);
        d0.samples = vec![util(1, 100, 40, 10)];
        let mut d1 = FakeDevice::named("A100", 40 << 30);
        d1.samples = vec![util(1, 200, 80, 30)];
        let mut monitor = monitor(FakeBackend::new(vec![d0, d1]), StaticTable::default());

        let stats = monitor.run_cycle(1).clone();

        assert_eq!(stats.processes[&1].sm_util, 80);
        assert_eq!(stats.processes[&1].mem_util, 30);
        let cursors: Vec<u64> = monitor
            .state()
            .inventory
            .devices
            .iter()
            .map(|d| d.cursor.last_timestamp())
            .collect();
        assert_eq!(cursors, vec![100, 200]);
    }

    #[test]
    fn degraded_discovery_watches_root_only() {
        let mut device = FakeDevice::named("A100", 40 << 30);
        device.compute = vec![
            ProcessMemory { pid: 1, used_bytes: 2 * MIB },
            ProcessMemory { pid: 2, used_bytes: 64 * MIB },
        ];
        let mut table = StaticTable::with(&[(1, vec![2])]);
        table.unsupported = true;
        let mut monitor = monitor(FakeBackend::new(vec![device]), table);

        assert!(monitor.probe(1).is_degraded());
        for _ in 0..3 {
            let stats = monitor.run_cycle(1);
            assert_eq!(stats.processes.keys().copied().collect::<Vec<_>>(), vec![1]);
        }
    }

    #[test]
    fn failing_device_leaves_others_intact() {
        let broken = FakeDevice::named("A100", 40 << 30).fail_all();
        let mut healthy = FakeDevice::named("A100", 40 << 30);
        healthy.compute = vec![ProcessMemory { pid: 1, used_bytes: 10 * MIB }];
        healthy.used_memory = 300 * MIB;
        healthy.samples = vec![util(1, 5, 33, 4)];
        let mut monitor = monitor(FakeBackend::new(vec![broken, healthy]), StaticTable::default());

        let stats = monitor.run_cycle(1);

        assert_eq!(stats.processes[&1].fb_mem_used, 10 * MIB);
        assert_eq!(stats.processes[&1].sm_util, 33);
        assert_eq!(stats.total_device_memory(), 300 * MIB);
    }

    #[test]
    fn failed_context_does_not_reuse_previous_cycle() {
        let mut device = FakeDevice::named("A100", 40 << 30);
        device.compute = vec![ProcessMemory { pid: 1, used_bytes: 10 * MIB }];
        let mut monitor = monitor(FakeBackend::new(vec![device]), StaticTable::default());

        assert_eq!(monitor.run_cycle(1).total_process_memory(), 10 * MIB);

        monitor.backend_mut().devices[0].fail_compute = true;
        let stats = monitor.run_cycle(1);
        assert!(stats.processes.is_empty());
        assert_eq!(FlatView::from_stats(stats), FlatView::default());
        assert_eq!(monitor.state().cycles, 2);
    }

    #[test]
    fn emits_rows_until_root_exits() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 0.3; exit 3"])
            .spawn()
            .unwrap();
        let root = child.id();
        let helper = root + 1_000_000;

        let mut device = FakeDevice::named("A100", 40 << 30);
        device.compute = vec![ProcessMemory {
            pid: helper,
            used_bytes: 104_857_600,
        }];
        let table = StaticTable::with(&[(root, vec![helper])]);
        let mut monitor = monitor(FakeBackend::new(vec![device]), table);
        let mut writer = RowWriter::new(Vec::new(), OutputFormat::Tsv);

        let outcome = monitor
            .run(&mut child, &mut writer, &AtomicBool::new(false))
            .unwrap();

        match outcome {
            RunOutcome::Exited(status) => assert_eq!(exit_code(status), 3),
            RunOutcome::Interrupted => panic!("root was not interrupted"),
        }

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Time\twtime\tgpufbmem\tgpumempct\tgpusmpct")
        );
        let rows: Vec<&str> = lines.collect();
        assert!(!rows.is_empty());
        for row in rows {
            let columns: Vec<&str> = row.split('\t').collect();
            assert_eq!(columns.len(), 5);
            assert_eq!(&columns[2..], &["100", "0", "0"]);
        }
        assert!(monitor.state().cycles >= 1);
    }

    #[test]
    fn termination_request_stops_the_loop() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let mut monitor = monitor(
            FakeBackend::new(vec![FakeDevice::named("A100", 40 << 30)]),
            StaticTable::default(),
        );
        let mut writer = RowWriter::new(Vec::new(), OutputFormat::KeyValue);

        let outcome = monitor
            .run(&mut child, &mut writer, &AtomicBool::new(true))
            .unwrap();

        let status = stop_root(&mut child, STOP_GRACE, Duration::from_millis(10)).unwrap();

        assert!(matches!(outcome, RunOutcome::Interrupted));
        assert!(writer.into_inner().is_empty());
        assert_eq!(exit_code(status), 128 + 15);
    }

    /// Sink whose every write fails, as stdout does once its reader is gone.
    #[derive(Default)]
    struct ClosedPipe {
        attempts: usize,
    }

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.attempts += 1;
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_keeps_monitoring_until_root_exits() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 0.3; exit 4"])
            .spawn()
            .unwrap();
        let mut monitor = monitor(
            FakeBackend::new(vec![FakeDevice::named("A100", 40 << 30)]),
            StaticTable::default(),
        );
        let mut writer = RowWriter::new(ClosedPipe::default(), OutputFormat::Tsv);

        let outcome = monitor
            .run(&mut child, &mut writer, &AtomicBool::new(false))
            .unwrap();

        match outcome {
            RunOutcome::Exited(status) => assert_eq!(exit_code(status), 4),
            RunOutcome::Interrupted => panic!("root was not interrupted"),
        }
        assert_eq!(writer.into_inner().attempts, 1);
        assert!(monitor.state().cycles >= 2);
        assert_eq!(monitor.summary().cycles, monitor.state().cycles);
    }

    #[test]
    fn zero_byte_process_still_counts_in_totals() {
        let mut device = FakeDevice::named("A100", 40 << 30);
        device.compute = vec![
            ProcessMemory { pid: 1, used_bytes: 10 * MIB },
            ProcessMemory { pid: 2, used_bytes: 0 },
        ];
        device.samples = vec![util(1, 5, 60, 20)];
        let table = StaticTable::with(&[(1, vec![2])]);
        let mut monitor = monitor(FakeBackend::new(vec![device]), table);

        let stats = monitor.run_cycle(1);

        assert_eq!(stats.processes.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(stats.processes[&2], ProcessStats::default());
        let totals = TotalsView::from_stats(stats);
        assert_eq!(totals.gpusmpct, 30.0);
        assert_eq!(totals.gpumempct, 10.0);
        assert_eq!(totals.gpufbmem, 10.0);
    }

    #[test]
    fn summary_reflects_last_cycle() {
        let mut device = FakeDevice::named("NVIDIA A100", 40 << 30);
        device.compute = vec![ProcessMemory { pid: 1, used_bytes: 10 * MIB }];
        device.used_memory = 20 * MIB;
        let mut monitor = monitor(FakeBackend::new(vec![device]), StaticTable::default());
        monitor.run_cycle(1);

        let summary = monitor.summary();

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.totals.gpufbmem, 10.0);
        assert_eq!(summary.totals.gpu_total_fbmem_mb, 20.0);
        assert_eq!(summary.hardware.ngpus, 1);
        assert_eq!(summary.hardware.gpus[0].name, "NVIDIA A100");
    }
}
