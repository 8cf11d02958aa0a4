use crate::error::MonitorError;
use crate::stats::{Summary, FLAT_FIELDS};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Header line, then `Time\twtime\t<fields...>` rows.
    Tsv,
    /// `timestamp=<ms> field=value ...` rows, no header.
    KeyValue,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tsv" => Some(OutputFormat::Tsv),
            "kv" => Some(OutputFormat::KeyValue),
            _ => None,
        }
    }
}

/// One emitted record.
pub struct Row<'a> {
    /// Wall clock time since the unix epoch.
    pub timestamp: Duration,
    /// Time since monitoring started.
    pub elapsed: Duration,
    pub fields: &'a [(&'static str, u64)],
}

/// Writes rows to the data sink. Every row is written whole and flushed.
pub struct RowWriter<W: Write> {
    out: W,
    format: OutputFormat,
    header_written: bool,
}

impl<W: Write> RowWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            header_written: false,
        }
    }

    pub fn write_row(&mut self, row: &Row) -> io::Result<()> {
        let mut line = String::new();

        match self.format {
            OutputFormat::Tsv => {
                if !self.header_written {
                    let mut header = vec!["Time", "wtime"];
                    header.extend(FLAT_FIELDS);
                    line.push_str(&header.join("\t"));
                    line.push('\n');
                }
                let mut columns = vec![
                    row.timestamp.as_secs().to_string(),
                    row.elapsed.as_secs().to_string(),
                ];
                columns.extend(row.fields.iter().map(|(_, value)| value.to_string()));
                line.push_str(&columns.join("\t"));
            }
            OutputFormat::KeyValue => {
                let mut pairs = vec![format!("timestamp={}", row.timestamp.as_millis())];
                pairs.extend(
                    row.fields
                        .iter()
                        .map(|(name, value)| format!("{}={}", name, value)),
                );
                line.push_str(&pairs.join(" "));
            }
        }
        line.push('\n');

        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        self.header_written = true;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Opens the configured destination, standard output when none is given.
pub fn open_sink(path: Option<&Path>) -> Result<Box<dyn Write>, MonitorError> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|source| MonitorError::OutputSinkUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

pub fn write_summary(path: &Path, summary: &Summary) -> Result<(), MonitorError> {
    let file = File::create(path).map_err(|source| MonitorError::OutputSinkUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
