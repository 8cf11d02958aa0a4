mod app_state;
mod config;
mod error;
mod gpu;
mod monitor;
mod observer;
mod output;
mod stats;
mod utils;

use config::{build_cli, Config};
use error::MonitorError;
use flexi_logger::{FileSpec, FlexiLoggerError, Logger, LoggerHandle, WriteMode};
use gpu::backend::NvmlBackend;
use log::{info, warn};
use monitor::{Monitor, RunOutcome, TICK};
use output::{open_sink, write_summary, RowWriter};
use std::error::Error;
use std::io::Write;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use utils::system::{exit_code, stop_root, ProcfsTable, STOP_GRACE};

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("nvtreemon: {}", e);
            std::process::exit(1);
        }
    }
}

fn start_logger(config: &Config) -> Result<LoggerHandle, FlexiLoggerError> {
    let level = if config.verbose { "debug" } else { "info" };
    let logger = Logger::try_with_env_or_str(level)?;
    let logger = match &config.log_dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir.clone()))
            .write_mode(WriteMode::BufferAndFlush),
        None => logger.log_to_stderr(),
    };
    logger.start()
}

/// Runs the monitored command and returns the exit code to leave with.
fn run() -> Result<i32, Box<dyn Error>> {
    let matches = build_cli().get_matches();
    let config = Config::from_matches(&matches);
    let _logger = start_logger(&config)?;

    let terminate = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&terminate);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).map_err(MonitorError::from)?;

    // Everything that can fail fatally happens before the command starts.
    let backend = NvmlBackend::init()?;
    info!("Initialized NVML");
    let mut monitor = Monitor::new(backend, ProcfsTable, config.interval)?;
    let mut writer = RowWriter::new(open_sink(config.output.as_deref())?, config.format);

    let mut child = Command::new(&config.command[0])
        .args(&config.command[1..])
        .spawn()
        .map_err(|source| MonitorError::Spawn {
            command: config.command.join(" "),
            source,
        })?;

    let status = match monitor.run(&mut child, &mut writer, &terminate)? {
        RunOutcome::Exited(status) => status,
        RunOutcome::Interrupted => {
            info!("Termination requested, stopping PID {}", child.id());
            stop_root(&mut child, STOP_GRACE, TICK).map_err(MonitorError::Wait)?
        }
    };
    if let Err(e) = writer.into_inner().flush() {
        warn!("Failed to flush output: {}", e);
    }

    if let Some(path) = &config.json_summary {
        write_summary(path, &monitor.summary())?;
        info!("Wrote summary to {}", path.display());
    }

    Ok(exit_code(status))
}
