//! Session Repeater: runs N acquisition sessions back to back.
//!
//! The repeater owns the [`RepeaterState`] of a run. Callers never touch it
//! directly; they follow the run through [`RunEvent`]s received from the
//! [`RunHandle`] and get the final state back from [`RunHandle::wait`].
//!
//! Sessions block on serial I/O, so each one runs on a Tokio blocking worker
//! (`spawn_blocking`) while the run loop itself stays an ordinary async task.
//! Only one worker exists at a time: measurement `k + 1` is not started until
//! measurement `k` has been logged or its failure reported.
//!
//! # Usage
//!
//! ```rust,ignore
//! let repeater = SessionRepeater::new(config, Arc::new(SerialPortOpener))?;
//! let mut run = repeater.start();
//!
//! while let Some(event) = run.next_event().await {
//!     match event {
//!         RunEvent::Measurement { index, outcome: Ok(matrix) } => {
//!             println!("measurement {index}: {} rows", matrix.len());
//!         }
//!         RunEvent::Finished { .. } | RunEvent::Aborted { .. } => break,
//!         _ => {}
//!     }
//! }
//! let state = run.wait().await?;
//! ```

use crate::error::{AppResult, DaqError};
use crate::log_writer::LogWriter;
use crate::measurement::{
    BoardRevision, LogFormat, SampleMatrix, SampleRequest, SessionRun, MAX_ACQUISITIONS,
};
use crate::session::{AcquisitionSession, SessionOutcome};
use crate::transport::{LinkSettings, PortOpener, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument, Span};

/// What a run does after a measurement fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Report the failure and go on with the next measurement.
    #[default]
    Continue,
    /// Report the failure and abort the run.
    Abort,
}

impl FromStr for FailurePolicy {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(FailurePolicy::Continue),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(DaqError::invalid(format!(
                "unknown failure policy '{other}', expected continue or abort"
            ))),
        }
    }
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Not started
    Idle,
    /// Measurements in progress
    Running,
    /// Every requested measurement was attempted
    Completed,
    /// Ended early, see [`AbortReason`]
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Progress of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeaterState {
    /// Measurements the run was asked for.
    pub total_requested: u32,
    /// Index of the measurement in flight or last finished; 0 before the first.
    pub current_index: u32,
    /// Lifecycle of the run.
    pub status: RunStatus,
    /// Measurements that returned a full matrix.
    pub succeeded: u32,
    /// Measurements whose session failed.
    pub failed: u32,
    /// Measurements acquired but not persisted.
    pub log_failures: u32,
}

impl RepeaterState {
    fn new(total_requested: u32) -> Self {
        Self {
            total_requested,
            current_index: 0,
            status: RunStatus::Idle,
            succeeded: 0,
            failed: 0,
            log_failures: 0,
        }
    }
}

/// Why a run ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The operator asked to stop.
    Stopped,
    /// The given measurement failed under [`FailurePolicy::Abort`].
    MeasurementFailed(u32),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Stopped => write!(f, "stopped by operator"),
            AbortReason::MeasurementFailed(index) => write!(f, "measurement {index} failed"),
        }
    }
}

/// A failed measurement.
#[derive(Debug)]
pub struct MeasurementFailure {
    /// What stopped the session.
    pub error: DaqError,
    /// Complete rows decoded before the failure; they are not logged.
    pub partial_rows: usize,
}

/// Notifications emitted while a run progresses.
///
/// Exactly one terminal event (`Finished` or `Aborted`) is sent, always last.
#[derive(Debug)]
pub enum RunEvent {
    /// The run task is up.
    Started {
        /// Measurements requested
        total: u32,
    },
    /// One session ended.
    Measurement {
        /// 1-based measurement index
        index: u32,
        /// Full matrix, or the failure
        outcome: Result<SampleMatrix, MeasurementFailure>,
    },
    /// The log file for `index` is on disk.
    LogWritten {
        /// 1-based measurement index
        index: u32,
        /// File written
        path: PathBuf,
    },
    /// The measurement succeeded but its file could not be written.
    LogFailed {
        /// 1-based measurement index
        index: u32,
        /// Why the write failed
        error: DaqError,
    },
    /// Every measurement was attempted.
    Finished {
        /// Final counters
        state: RepeaterState,
    },
    /// The run ended early.
    Aborted {
        /// Counters at the time of the abort
        state: RepeaterState,
        /// Stop request or failing measurement
        reason: AbortReason,
    },
}

impl RunEvent {
    /// `Finished` or `Aborted`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Finished { .. } | RunEvent::Aborted { .. })
    }
}

/// Everything a run needs except the measurement index and the data.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Serial port opened for every session.
    pub port_name: String,
    /// Samples and channels requested each time.
    pub request: SampleRequest,
    /// Revision written into each log header.
    pub board_revision: BoardRevision,
    /// Existing folder the logs go to.
    pub folder_path: PathBuf,
    /// Number of measurements, at least 1.
    pub total: u32,
    /// Continue or abort after a failed measurement.
    pub failure_policy: FailurePolicy,
    /// Only [`LogFormat::Text`] passes validation.
    pub format: LogFormat,
    /// Line settings for every session.
    pub link: LinkSettings,
}

impl RunConfig {
    /// Run with the default policy, format and line settings.
    #[must_use]
    pub fn new(
        port_name: impl Into<String>,
        request: SampleRequest,
        board_revision: BoardRevision,
        folder_path: impl Into<PathBuf>,
        total: u32,
    ) -> Self {
        Self {
            port_name: port_name.into(),
            request,
            board_revision,
            folder_path: folder_path.into(),
            total,
            failure_policy: FailurePolicy::default(),
            format: LogFormat::default(),
            link: LinkSettings::default(),
        }
    }

    /// Continue or abort after a failed measurement.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Log format, checked by [`RunConfig::validate`].
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Serial line timing.
    #[must_use]
    pub fn with_link_settings(mut self, link: LinkSettings) -> Self {
        self.link = link;
        self
    }

    /// Reject the run before any I/O.
    pub fn validate(&self) -> AppResult<()> {
        if self.port_name.trim().is_empty() {
            return Err(DaqError::invalid("no serial port selected"));
        }
        if !(1..=MAX_ACQUISITIONS).contains(&self.total) {
            return Err(DaqError::invalid(format!(
                "number of acquisitions must be between 1 and {MAX_ACQUISITIONS}, got {}",
                self.total
            )));
        }
        if self.folder_path.as_os_str().is_empty() {
            return Err(DaqError::invalid("no log folder selected"));
        }
        if !self.folder_path.is_dir() {
            return Err(DaqError::invalid(format!(
                "log folder '{}' does not exist or is not a directory",
                self.folder_path.display()
            )));
        }
        self.format.ensure_supported()
    }

    fn session_run(&self, measurement_index: u32) -> SessionRun {
        SessionRun {
            measurement_index,
            request: self.request.clone(),
            board_revision: self.board_revision,
            folder_path: self.folder_path.clone(),
            matrix: None,
        }
    }
}

/// Drives the measurements of one run.
pub struct SessionRepeater {
    config: RunConfig,
    opener: Arc<dyn PortOpener>,
    writer: LogWriter,
}

impl SessionRepeater {
    /// Validate `config` and prepare a run. No I/O happens here.
    pub fn new(config: RunConfig, opener: Arc<dyn PortOpener>) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            opener,
            writer: LogWriter::default(),
        })
    }

    /// Replace the default text log writer.
    #[must_use]
    pub fn with_log_writer(mut self, writer: LogWriter) -> Self {
        self.writer = writer;
        self
    }

    /// The validated run configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Start the run on the current Tokio runtime.
    #[must_use]
    pub fn start(self) -> RunHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(self.run(tx, stop.clone()));

        RunHandle {
            events: rx,
            stop: StopHandle(stop),
            task,
        }
    }

    async fn run(self, tx: mpsc::UnboundedSender<RunEvent>, stop: Arc<AtomicBool>) -> RepeaterState {
        let mut state = RepeaterState::new(self.config.total);
        state.status = RunStatus::Running;
        info!(
            total = self.config.total,
            port = %self.config.port_name,
            folder = %self.config.folder_path.display(),
            "Run started"
        );
        emit(&tx, RunEvent::Started {
            total: self.config.total,
        });

        for index in 1..=self.config.total {
            if stop.load(Ordering::SeqCst) {
                return self.abort(&tx, state, AbortReason::Stopped);
            }
            state.current_index = index;

            let span = info_span!("measurement", index);
            let failed = self
                .measure(index, &mut state, &tx)
                .instrument(span)
                .await;

            if failed && self.config.failure_policy == FailurePolicy::Abort {
                return self.abort(&tx, state, AbortReason::MeasurementFailed(index));
            }
        }

        state.status = RunStatus::Completed;
        info!(
            succeeded = state.succeeded,
            failed = state.failed,
            "Run finished"
        );
        emit(&tx, RunEvent::Finished {
            state: state.clone(),
        });
        state
    }

    /// Acquire and log one measurement. Returns whether the session failed.
    async fn measure(
        &self,
        index: u32,
        state: &mut RepeaterState,
        tx: &mpsc::UnboundedSender<RunEvent>,
    ) -> bool {
        let mut run = self.config.session_run(index);

        let outcome = match self.acquire(&run).await {
            Ok(outcome) => outcome,
            Err(error) => SessionOutcome::Failed {
                partial: SampleMatrix::new(run.request.channels().len()),
                error,
            },
        };

        match outcome.into_result() {
            Ok(matrix) => {
                state.succeeded += 1;
                run.matrix = Some(matrix.clone());

                let written = self.write_log(run).await;
                emit(tx, RunEvent::Measurement {
                    index,
                    outcome: Ok(matrix),
                });

                match written {
                    Ok(path) => {
                        info!(path = %path.display(), "Measurement logged");
                        emit(tx, RunEvent::LogWritten { index, path });
                    }
                    Err(error) => {
                        state.log_failures += 1;
                        warn!(%error, "Measurement acquired but not logged");
                        emit(tx, RunEvent::LogFailed { index, error });
                    }
                }
                false
            }
            Err((partial, error)) => {
                state.failed += 1;
                warn!(%error, partial_rows = partial.len(), "Measurement failed, nothing logged");
                emit(tx, RunEvent::Measurement {
                    index,
                    outcome: Err(MeasurementFailure {
                        error,
                        partial_rows: partial.len(),
                    }),
                });
                true
            }
        }
    }

    /// Run one session on a blocking worker.
    async fn acquire(&self, run: &SessionRun) -> AppResult<SessionOutcome> {
        let opener = self.opener.clone();
        let link = self.config.link.clone();
        let port_name = self.config.port_name.clone();
        let request = run.request.clone();
        let board_revision = run.board_revision;
        let span = Span::current();

        let outcome = tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            let mut transport = Transport::new(opener, link);
            let mut session = AcquisitionSession::new(request, board_revision, port_name);
            session.run(&mut transport)
        })
        .await?;

        Ok(outcome)
    }

    /// Write the log on a blocking worker.
    async fn write_log(&self, run: SessionRun) -> AppResult<PathBuf> {
        let writer = self.writer.clone();
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            writer.write(&run)
        })
        .await?
    }

    fn abort(
        &self,
        tx: &mpsc::UnboundedSender<RunEvent>,
        mut state: RepeaterState,
        reason: AbortReason,
    ) -> RepeaterState {
        state.status = RunStatus::Aborted;
        warn!(%reason, current_index = state.current_index, "Run aborted");
        emit(tx, RunEvent::Aborted {
            state: state.clone(),
            reason,
        });
        state
    }
}

fn emit(tx: &mpsc::UnboundedSender<RunEvent>, event: RunEvent) {
    // A closed receiver means nobody is listening any more; the run still
    // finishes and logs its files.
    let _ = tx.send(event);
}

/// Cooperative stop flag for a run. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the run to stop. The measurement in flight finishes; no new one starts.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Caller side of a started run.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    stop: StopHandle,
    task: JoinHandle<RepeaterState>,
}

impl RunHandle {
    /// Next event, or `None` once the run task is gone and all events were read.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Same as [`StopHandle::stop`].
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Stop flag that outlives this handle.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the run to end and return its final state.
    pub async fn wait(self) -> AppResult<RepeaterState> {
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ChannelSet;
    use crate::mock::{MockBehavior, MockBoard};
    use std::time::Duration;

    fn config(folder: &std::path::Path, total: u32) -> RunConfig {
        let request = SampleRequest::new(2, ChannelSet::new([1, 2]).unwrap()).unwrap();
        RunConfig::new("mock0", request, BoardRevision::Rev01, folder, total).with_link_settings(
            LinkSettings {
                read_timeout: Duration::from_millis(20),
                ..LinkSettings::default()
            },
        )
    }

    async fn drain(handle: &mut RunHandle) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[test]
    fn rejects_invalid_runs_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let board = MockBoard::new();

        for total in [0, 5001] {
            let result = SessionRepeater::new(config(dir.path(), total), Arc::new(board.clone()));
            assert!(matches!(result, Err(DaqError::InvalidParameter(_))));
        }

        let missing = dir.path().join("nope");
        assert!(SessionRepeater::new(config(&missing, 1), Arc::new(board.clone())).is_err());

        let binary = config(dir.path(), 1).with_format(LogFormat::Binary);
        assert!(matches!(
            SessionRepeater::new(binary, Arc::new(board.clone())),
            Err(DaqError::UnsupportedFormat(_))
        ));

        assert_eq!(board.opens(), 0);
    }

    #[tokio::test]
    async fn abort_policy_stops_after_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let board = MockBoard::new();
        board.push(MockBehavior::Ramp);
        board.push(MockBehavior::Unavailable);

        let cfg = config(dir.path(), 3).with_failure_policy(FailurePolicy::Abort);
        let mut handle = SessionRepeater::new(cfg, Arc::new(board.clone()))
            .unwrap()
            .start();
        let events = drain(&mut handle).await;
        let state = handle.wait().await.unwrap();

        assert_eq!(state.status, RunStatus::Aborted);
        assert_eq!(state.current_index, 2);
        assert_eq!((state.succeeded, state.failed), (1, 1));
        assert!(matches!(
            events.last(),
            Some(RunEvent::Aborted {
                reason: AbortReason::MeasurementFailed(2),
                ..
            })
        ));
        assert!(dir.path().join("m_0001.txt").exists());
        assert!(!dir.path().join("m_0003.txt").exists());
    }

    #[tokio::test]
    async fn stop_before_first_measurement_acquires_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let board = MockBoard::new();

        let mut handle = SessionRepeater::new(config(dir.path(), 3), Arc::new(board.clone()))
            .unwrap()
            .start();
        handle.stop();
        let events = drain(&mut handle).await;
        let state = handle.wait().await.unwrap();

        assert_eq!(state.status, RunStatus::Aborted);
        assert_eq!(state.current_index, 0);
        assert!(matches!(events.first(), Some(RunEvent::Started { total: 3 })));
        assert!(matches!(
            events.last(),
            Some(RunEvent::Aborted {
                reason: AbortReason::Stopped,
                ..
            })
        ));
        assert_eq!(board.opens(), 0);
    }

    #[tokio::test]
    async fn stop_lets_the_measurement_in_flight_finish() {
        let dir = tempfile::tempdir().unwrap();
        let board = MockBoard::new();

        let mut handle = SessionRepeater::new(config(dir.path(), 3), Arc::new(board.clone()))
            .unwrap()
            .start();
        assert!(matches!(
            handle.next_event().await,
            Some(RunEvent::Started { .. })
        ));
        handle.stop();

        let events = drain(&mut handle).await;
        let state = handle.wait().await.unwrap();

        assert_eq!(state.status, RunStatus::Aborted);
        assert_eq!(state.current_index, 1);
        assert_eq!(state.succeeded, 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::LogWritten { index: 1, .. })));
        assert!(dir.path().join("m_0001.txt").exists());
        assert!(!dir.path().join("m_0002.txt").exists());
        assert_eq!(board.opens(), board.closes());
    }

    #[tokio::test]
    async fn log_failure_is_reported_without_failing_the_measurement() {
        let dir = tempfile::tempdir().unwrap();
        let board = MockBoard::new();
        let cfg = config(dir.path(), 1);
        let repeater = SessionRepeater::new(cfg, Arc::new(board)).unwrap();

        // Folder disappears between validation and logging.
        let folder = dir.path().to_path_buf();
        drop(dir);

        let mut handle = repeater.start();
        let events = drain(&mut handle).await;
        let state = handle.wait().await.unwrap();

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!((state.succeeded, state.log_failures), (1, 1));
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::LogFailed {
                index: 1,
                error: DaqError::WriteError { .. }
            }
        )));
        assert!(!folder.exists());

        // The acquired matrix is still delivered in full.
        let matrix = events.iter().find_map(|e| match e {
            RunEvent::Measurement {
                index: 1,
                outcome: Ok(matrix),
            } => Some(matrix),
            _ => None,
        });
        let matrix = matrix.unwrap();
        assert_eq!((matrix.len(), matrix.columns()), (2, 2));
    }

    #[test]
    fn failure_policy_parses() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!(
            "Continue".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::Continue
        );
        assert!("retry".parse::<FailurePolicy>().is_err());
    }
}
