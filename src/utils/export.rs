//! export.rs
//! Persistence handoff: writes a finished session's sample log to CSV.
//!
//! File layout:
//! - line 1: metadata (`Date and time`, timestamp, `Number of measures : `, count, `Acquisition frequency : `, Hz)
//! - line 2: column headers `Index, Time, T1..TN, P1..PM`
//! - one line per sample row; faulted readings are written as their marker (`Open`, `OverRange`, `Common Mode`)
//! - numbers are written at full precision (shortest text that parses back to the same `f64`)
//!
//! `persist` takes the log by value. On failure the log comes back inside `PersistFailure`
//! so the caller can retry or recover to another path.

use std::{
    fs::{File, create_dir_all},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use csv::WriterBuilder;
use log::{error, info, warn};
use thiserror::Error;

use crate::acquisition::{
    capture::{SampleLog, SampleRow},
    sensor::{ChannelId, ChannelKind, Reading},
};
use crate::error::{AcqError, AcqResult};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionHeader {
    pub timestamp: DateTime<Local>,
    pub sample_count: u64,
    pub frequency_hz: f64,
    pub temperature_channels: Vec<ChannelId>,
    pub pressure_channels: Vec<ChannelId>,
}

impl SessionHeader {
    pub fn new(
        sample_count: u64,
        frequency_hz: f64,
        temperature_channels: &[ChannelId],
        pressure_channels: &[ChannelId],
    ) -> Self {
        Self {
            timestamp: Local::now(),
            sample_count,
            frequency_hz,
            temperature_channels: temperature_channels.to_vec(),
            pressure_channels: pressure_channels.to_vec(),
        }
    }

    fn metadata_record(&self) -> Vec<String> {
        vec![
            "Date and time".into(),
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            "Number of measures : ".into(),
            self.sample_count.to_string(),
            "Acquisition frequency : ".into(),
            self.frequency_hz.to_string(),
            "Hz".into(),
        ]
    }

    fn column_record(&self) -> Vec<String> {
        let label = |kind: ChannelKind, ch: &ChannelId| format!("{}{}", kind.prefix(), ch + 1);
        let mut cols = vec!["Index".to_string(), "Time".to_string()];
        cols.extend(self.temperature_channels.iter().map(|c| label(ChannelKind::Temperature, c)));
        cols.extend(self.pressure_channels.iter().map(|c| label(ChannelKind::Pressure, c)));
        cols
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistReport {
    pub path: PathBuf,
    pub rows: usize,
}

/// Failed write. Carries the log back so no captured row is lost.
#[derive(Error, Debug)]
#[error("persisting {} row(s) to {} failed: {}", .log.len(), .path.display(), .error)]
pub struct PersistFailure {
    pub log: SampleLog,
    pub header: SessionHeader,
    pub path: PathBuf,
    #[source]
    pub error: AcqError,
}

impl PersistFailure {
    /// Manual recovery path: write the preserved log somewhere else.
    pub fn recover_to(self, fallback: &Path) -> Result<PersistReport, PersistFailure> {
        warn!(
            "[Export] recovering {} row(s) to fallback {}",
            self.log.len(),
            fallback.display()
        );
        persist(self.log, self.header, fallback)
    }
}

fn cell(reading: &Reading) -> String {
    match (reading.value(), reading.quality.marker()) {
        (Some(v), _) => v.to_string(),
        (None, Some(marker)) => marker.to_string(),
        (None, None) => String::new(),
    }
}

fn row_record(row: &SampleRow) -> Vec<String> {
    let mut record = Vec::with_capacity(2 + row.temperatures.len() + row.pressures.len());
    record.push(row.index.to_string());
    record.push(row.elapsed_time.as_secs_f64().to_string());
    record.extend(row.temperatures.iter().chain(&row.pressures).map(cell));
    record
}

/// Writes metadata, column headers and every row to `out`.
pub fn write_log<W: Write>(out: W, log: &SampleLog, header: &SessionHeader) -> AcqResult<()> {
    let mut wtr = WriterBuilder::new().flexible(true).from_writer(out);
    wtr.write_record(header.metadata_record())?;
    wtr.write_record(header.column_record())?;
    for row in log {
        wtr.write_record(row_record(row))?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_file(log: &SampleLog, header: &SessionHeader, path: &Path) -> AcqResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write_log(BufWriter::new(file), log, header)
}

/// Consumes the log and writes it to `path` once.
pub fn persist(log: SampleLog, header: SessionHeader, path: &Path) -> Result<PersistReport, PersistFailure> {
    info!("[Export] writing {} row(s) to {}", log.len(), path.display());
    match write_file(&log, &header, path) {
        Ok(()) => {
            info!("[Export] saved {}", path.display());
            Ok(PersistReport {
                path: path.to_path_buf(),
                rows: log.len(),
            })
        }
        Err(error) => {
            error!("[Export] write to {} failed: {}", path.display(), error);
            Err(PersistFailure {
                log,
                header,
                path: path.to_path_buf(),
                error,
            })
        }
    }
}

/// One retry after a failed write; the second failure is handed to the caller.
pub fn persist_with_retry(
    log: SampleLog,
    header: SessionHeader,
    path: &Path,
) -> Result<PersistReport, PersistFailure> {
    match persist(log, header, path) {
        Ok(report) => Ok(report),
        Err(failure) => {
            warn!("[Export] retrying once");
            persist(failure.log, failure.header, path)
        }
    }
}
