//! # Serial Monitor Core Library
//!
//! Acquisition session engine for a benchtop data-acquisition board attached
//! over a serial line. The host sends a short binary command (sample count plus
//! channel list), the board answers with a matrix of 16-bit samples, and every
//! completed matrix is written to its own text log file.
//!
//! ## Crate Structure
//!
//! - **`measurement`**: value types shared by every layer (`ChannelSet`,
//!   `SampleRequest`, `SampleMatrix`, `SessionRun`).
//! - **`codec`**: the command frame and sample decoding.
//! - **`transport`**: blocking serial I/O behind the `PortOpener` / `SerialLink` seams.
//! - **`mock`**: a scriptable simulated board implementing those seams.
//! - **`session`**: one request/response exchange producing one matrix.
//! - **`repeater`**: N sessions in sequence on a background task, reported as events.
//! - **`log_writer`**: `m_NNNN.txt` text logs.
//! - **`ports`**: serial port enumeration.
//! - **`config`**: layered configuration (defaults, TOML, environment).
//! - **`error`**: the `DaqError` enum used throughout the crate.
//! - **`tracing_setup`**: subscriber installation for the binary and tests.

pub mod codec;
pub mod config;
pub mod error;
pub mod log_writer;
pub mod measurement;
pub mod mock;
pub mod ports;
pub mod repeater;
pub mod session;
pub mod tracing_setup;
pub mod transport;

pub use error::{AppResult, DaqError, ErrorKind};
pub use measurement::{BoardRevision, ChannelSet, LogFormat, SampleMatrix, SampleRequest};
pub use repeater::{FailurePolicy, RunConfig, RunEvent, RunHandle, SessionRepeater};
