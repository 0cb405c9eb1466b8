//! Text log writer: one file per measurement.
//!
//! Files are named `m_NNNN.txt` after the zero-padded measurement index and
//! are overwritten, never appended, when the same index is written again.
//!
//! # Format
//!
//! ```text
//! #setup 0
//! #notes 2
//! Board revision: 01
//! Firmware Version: yy.mm.ab
//! Logging Finished: 16.10.2026 14:3:27
//! data 5, 2
//! sample, ch1, ch3
//! 1, 10, 20
//! 2, 11, 21
//! ```
//!
//! The header keys and the `Logging Finished:` line are read by downstream
//! tooling and must not change.

use crate::error::{AppResult, DaqError};
use crate::measurement::{SampleMatrix, SessionRun};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timestamp layout of the `Logging Finished:` line. No field is zero-padded.
pub const TIMESTAMP_FORMAT: &str = "%-d.%-m.%Y %-H:%-M:%-S";

/// Writes completed measurements as text log files.
#[derive(Debug, Clone)]
pub struct LogWriter {
    firmware_version: String,
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new("yy.mm.ab")
    }
}

impl LogWriter {
    /// Writer stamping `firmware_version` into every header.
    #[must_use]
    pub fn new(firmware_version: impl Into<String>) -> Self {
        Self {
            firmware_version: firmware_version.into(),
        }
    }

    /// File name for a measurement index.
    #[must_use]
    pub fn file_name(measurement_index: u32) -> String {
        format!("m_{measurement_index:04}.txt")
    }

    /// Full path the log for `measurement_index` is written to inside `folder`.
    #[must_use]
    pub fn path_for(folder: &Path, measurement_index: u32) -> PathBuf {
        folder.join(Self::file_name(measurement_index))
    }

    /// Write `run` to its folder, stamped with the current local time.
    ///
    /// The folder is expected to exist; the caller validates it.
    pub fn write(&self, run: &SessionRun) -> AppResult<PathBuf> {
        self.write_at(run, Local::now())
    }

    /// Write `run` with an explicit completion timestamp.
    pub fn write_at(&self, run: &SessionRun, finished: DateTime<Local>) -> AppResult<PathBuf> {
        let matrix = run.matrix.as_ref().ok_or_else(|| {
            DaqError::invalid(format!(
                "measurement {} has no samples to log",
                run.measurement_index
            ))
        })?;

        let path = Self::path_for(&run.folder_path, run.measurement_index);
        self.render_to_file(&path, run, matrix, finished)
            .map_err(|source| DaqError::WriteError {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), rows = matrix.len(), "Log file written");
        Ok(path)
    }

    fn render_to_file(
        &self,
        path: &Path,
        run: &SessionRun,
        matrix: &SampleMatrix,
        finished: DateTime<Local>,
    ) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.render(&mut out, run, matrix, finished)?;
        out.flush()
    }

    /// Render the log text into any writer.
    pub fn render<W: Write>(
        &self,
        out: &mut W,
        run: &SessionRun,
        matrix: &SampleMatrix,
        finished: DateTime<Local>,
    ) -> io::Result<()> {
        let channels = run.request.channels();

        writeln!(out, "#setup 0")?;
        writeln!(out, "#notes {}", channels.len())?;
        writeln!(out, "Board revision: {}", run.board_revision.code())?;
        writeln!(out, "Firmware Version: {}", self.firmware_version)?;
        writeln!(out, "Logging Finished: {}", finished.format(TIMESTAMP_FORMAT))?;
        writeln!(
            out,
            "data {}, {}",
            run.request.sample_count(),
            channels.len()
        )?;

        write!(out, "sample")?;
        for ch in channels.iter() {
            write!(out, ", ch{ch}")?;
        }
        writeln!(out)?;

        for (index, row) in matrix.rows().iter().enumerate() {
            write!(out, "{}", index + 1)?;
            for value in row {
                write!(out, ", {value}")?;
            }
            writeln!(out)?;
        }

        Ok(())
    }
}
