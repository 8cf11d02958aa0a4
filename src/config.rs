use crate::output::OutputFormat;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interval: Duration,
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
    pub json_summary: Option<PathBuf>,
    pub verbose: bool,
    pub log_dir: Option<PathBuf>,
    pub command: Vec<String>,
}

pub fn build_cli() -> Command {
    Command::new("nvtreemon")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Attributes NVIDIA GPU memory and utilization to a command's process tree")
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("SECONDS")
                .help("Sampling interval in seconds, fractions allowed")
                .value_parser(parse_interval)
                .allow_negative_numbers(true)
                .default_value("1.0"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write rows to FILE instead of standard output")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Row format: tab-separated with header, or key=value lines")
                .value_parser(["tsv", "kv"])
                .default_value("tsv"),
        )
        .arg(
            Arg::new("json-summary")
                .short('j')
                .long("json-summary")
                .value_name("FILE")
                .help("Write totals, units and hardware info as JSON when the run ends")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log per-device query diagnostics")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .help("Write logs to a file in DIR instead of standard error")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("command")
                .value_name("COMMAND")
                .help("Command to run and monitor, given after --")
                .num_args(1..)
                .last(true)
                .required(true),
        )
}

/// Negative intervals clamp to zero, which samples on every tick.
fn parse_interval(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if !seconds.is_finite() {
        return Err(format!("'{}' is not a finite number", value));
    }
    Ok(Duration::from_secs_f64(seconds.max(0.0)))
}

impl Config {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let format = matches
            .get_one::<String>("format")
            .and_then(|name| OutputFormat::from_name(name))
            .unwrap_or(OutputFormat::Tsv);

        Self {
            interval: matches
                .get_one::<Duration>("interval")
                .copied()
                .unwrap_or(Duration::from_secs(1)),
            output: matches.get_one::<PathBuf>("output").cloned(),
            format,
            json_summary: matches.get_one::<PathBuf>("json-summary").cloned(),
            verbose: matches.get_flag("verbose"),
            log_dir: matches.get_one::<PathBuf>("log-dir").cloned(),
            command: matches
                .get_many::<String>("command")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
        }
    }
}
