//! Measurement data model shared by the codec, the session and the log writer.
//!
//! A [`SampleRequest`] is what the operator asks for, a [`SampleMatrix`] is what
//! the board sends back. Both are validated on construction so the rest of the
//! crate can rely on their invariants.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lowest channel id on the board.
pub const MIN_CHANNEL: u8 = 1;
/// Highest channel id on the board.
pub const MAX_CHANNEL: u8 = 8;
/// Largest sample count the firmware accepts in one request.
pub const MAX_SAMPLES: u32 = 3000;
/// Largest number of measurements in one run.
pub const MAX_ACQUISITIONS: u32 = 5000;

/// Non-empty, duplicate-free, order-preserving selection of channel ids.
///
/// Selection order is transmission order: it fixes the column order of every
/// decoded row and of the log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSet(Vec<u8>);

impl ChannelSet {
    /// Build a channel set, rejecting empty, duplicate or out-of-range ids.
    pub fn new(ids: impl IntoIterator<Item = u8>) -> AppResult<Self> {
        let mut channels = Vec::new();
        for id in ids {
            if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&id) {
                return Err(DaqError::invalid(format!(
                    "channel {id} out of range {MIN_CHANNEL}..={MAX_CHANNEL}"
                )));
            }
            if channels.contains(&id) {
                return Err(DaqError::invalid(format!("channel {id} selected twice")));
            }
            channels.push(id);
        }
        if channels.is_empty() {
            return Err(DaqError::invalid("no channels selected"));
        }
        Ok(Self(channels))
    }

    /// Channel ids in selection order.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Number of selected channels, i.e. columns per row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a `ChannelSet` cannot be constructed empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Channel ids in selection order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

impl FromStr for ChannelSet {
    type Err = DaqError;

    /// Parses a comma separated list such as `"1,3,8"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ids = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u8>()
                    .map_err(|_| DaqError::invalid(format!("'{part}' is not a channel number")))
            })
            .collect::<AppResult<Vec<u8>>>()?;
        Self::new(ids)
    }
}

impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// One acquisition request: how many rows, over which channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRequest {
    sample_count: u16,
    channels: ChannelSet,
}

impl SampleRequest {
    /// Validate `sample_count` against `1..=MAX_SAMPLES`.
    pub fn new(sample_count: u32, channels: ChannelSet) -> AppResult<Self> {
        if !(1..=MAX_SAMPLES).contains(&sample_count) {
            return Err(DaqError::invalid(format!(
                "number of samples must be between 1 and {MAX_SAMPLES}, got {sample_count}"
            )));
        }
        Ok(Self {
            // Range-checked above, always fits.
            sample_count: sample_count as u16,
            channels,
        })
    }

    /// Rows the board is asked for.
    #[must_use]
    pub fn sample_count(&self) -> u16 {
        self.sample_count
    }

    /// Channels in transmission order.
    #[must_use]
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Number of bytes the board sends back for the whole matrix.
    #[must_use]
    pub fn response_len(&self) -> usize {
        usize::from(self.sample_count) * self.channels.len() * crate::codec::SAMPLE_WIDTH
    }
}

/// Rows of decoded samples, one column per selected channel.
///
/// Rows are kept in read order. A matrix from a failed session may hold fewer
/// rows than requested, but never a partial row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SampleMatrix {
    columns: usize,
    rows: Vec<Vec<u16>>,
}

impl SampleMatrix {
    /// Empty matrix with `columns` values per row.
    #[must_use]
    pub fn new(columns: usize) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Empty matrix with room for `rows` rows.
    #[must_use]
    pub fn with_capacity(columns: usize, rows: usize) -> Self {
        Self {
            columns,
            rows: Vec::with_capacity(rows),
        }
    }

    /// Append a complete row.
    pub fn push_row(&mut self, row: Vec<u16>) -> AppResult<()> {
        if row.len() != self.columns {
            return Err(DaqError::invalid(format!(
                "row has {} values, matrix has {} columns",
                row.len(),
                self.columns
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Values per row.
    #[must_use]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Rows in read order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<u16>] {
        &self.rows
    }

    /// Number of complete rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row was decoded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consume the matrix, keeping its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Vec<u16>> {
        self.rows
    }
}

/// One measurement of a run, from creation to logging.
///
/// Created by the repeater at the start of each iteration, given its matrix
/// once the session finishes, and dropped after it was logged or its failure
/// reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRun {
    /// 1-based position in the run; names the log file.
    pub measurement_index: u32,
    /// What is asked of the board.
    pub request: SampleRequest,
    /// Written to the log header, never sent to the board.
    pub board_revision: BoardRevision,
    /// Folder the log file goes into.
    pub folder_path: PathBuf,
    /// Decoded samples; `None` until the session completes.
    pub matrix: Option<SampleMatrix>,
}

/// Hardware revision of the acquisition board. Recorded in the log header only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardRevision {
    /// First board revision
    Rev01,
    /// Second board revision
    Rev02,
}

impl BoardRevision {
    /// Two-digit form used in the log header.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            BoardRevision::Rev01 => "01",
            BoardRevision::Rev02 => "02",
        }
    }
}

impl FromStr for BoardRevision {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rev01" | "01" | "1" => Ok(BoardRevision::Rev01),
            "rev02" | "02" | "2" => Ok(BoardRevision::Rev02),
            other => Err(DaqError::invalid(format!(
                "unknown board revision '{other}', expected Rev01 or Rev02"
            ))),
        }
    }
}

impl fmt::Display for BoardRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev{}", self.code())
    }
}

/// Output format selector for log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `m_NNNN.txt` text logs
    #[default]
    Text,
    /// Accepted by the parser, rejected by validation
    Binary,
}

impl LogFormat {
    /// Reject formats the log writer cannot produce.
    pub fn ensure_supported(self) -> AppResult<()> {
        match self {
            LogFormat::Text => Ok(()),
            LogFormat::Binary => Err(DaqError::UnsupportedFormat(
                "Binary files are currently not supported".into(),
            )),
        }
    }
}

impl FromStr for LogFormat {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(LogFormat::Text),
            "binary" | "bin" => Ok(LogFormat::Binary),
            other => Err(DaqError::invalid(format!("unknown log format '{other}'"))),
        }
    }
}
