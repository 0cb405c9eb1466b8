//! Acquisition Session: one request/response exchange producing one matrix.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐    ┌──────────┐    ┌──────────────┐    ┌───────────┐    ┌──────────┐
//! │ Idle │───▶│ Encoding │───▶│ Transmitting │───▶│ Receiving │───▶│ Complete │
//! └──────┘    └──────────┘    └──────┬───────┘    └─────┬─────┘    └──────────┘
//!                                    │                  │
//!                                    └───────┬──────────┘
//!                                            ▼
//!                                       ┌────────┐
//!                                       │ Failed │
//!                                       └────────┘
//! ```
//!
//! A session never retries. Whatever rows were decoded before a failure are
//! kept in the outcome, and the transport is closed before [`AcquisitionSession::run`]
//! returns on every path.

use crate::codec::{self, SAMPLE_WIDTH};
use crate::error::DaqError;
use crate::measurement::{BoardRevision, SampleMatrix, SampleRequest};
use crate::transport::Transport;
use std::fmt;
use tracing::{debug, info, instrument, trace, warn};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet
    Idle,
    /// Building the command frame
    Encoding,
    /// Opening the port and writing the command
    Transmitting,
    /// Reading rows back
    Receiving,
    /// All requested rows decoded
    Complete,
    /// Stopped on a transport or codec error
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Encoding => write!(f, "encoding"),
            SessionState::Transmitting => write!(f, "transmitting"),
            SessionState::Receiving => write!(f, "receiving"),
            SessionState::Complete => write!(f, "complete"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one session.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Exactly `sample_count` rows.
    Complete(SampleMatrix),
    /// The rows decoded before `error`, possibly none.
    Failed {
        /// Complete rows received before the failure
        partial: SampleMatrix,
        /// What stopped the session
        error: DaqError,
    },
}

impl SessionOutcome {
    /// Whether every requested row arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, SessionOutcome::Complete(_))
    }

    /// Rows decoded, complete or not.
    #[must_use]
    pub fn matrix(&self) -> &SampleMatrix {
        match self {
            SessionOutcome::Complete(matrix) => matrix,
            SessionOutcome::Failed { partial, .. } => partial,
        }
    }

    /// Split into the matrix or the partial rows plus error.
    pub fn into_result(self) -> Result<SampleMatrix, (SampleMatrix, DaqError)> {
        match self {
            SessionOutcome::Complete(matrix) => Ok(matrix),
            SessionOutcome::Failed { partial, error } => Err((partial, error)),
        }
    }
}

/// One acquisition against one port.
#[derive(Debug)]
pub struct AcquisitionSession {
    request: SampleRequest,
    board_revision: BoardRevision,
    port_name: String,
    state: SessionState,
}

impl AcquisitionSession {
    /// Idle session for `request` against `port_name`.
    #[must_use]
    pub fn new(
        request: SampleRequest,
        board_revision: BoardRevision,
        port_name: impl Into<String>,
    ) -> Self {
        Self {
            request,
            board_revision,
            port_name: port_name.into(),
            state: SessionState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// What this session asks the board for.
    #[must_use]
    pub fn request(&self) -> &SampleRequest {
        &self.request
    }

    /// Revision recorded with the result.
    #[must_use]
    pub fn board_revision(&self) -> BoardRevision {
        self.board_revision
    }

    /// Run the exchange to completion or failure.
    ///
    /// Blocks for the duration of the serial I/O.
    #[instrument(
        skip(self, transport),
        fields(
            port = %self.port_name,
            samples = self.request.sample_count(),
            channels = %self.request.channels(),
        )
    )]
    pub fn run(&mut self, transport: &mut Transport) -> SessionOutcome {
        self.state = SessionState::Idle;
        let mut matrix = SampleMatrix::with_capacity(
            self.request.channels().len(),
            usize::from(self.request.sample_count()),
        );

        let result = self.exchange(transport, &mut matrix);
        transport.close();

        match result {
            Ok(()) => {
                self.state = SessionState::Complete;
                info!(rows = matrix.len(), "Session complete");
                SessionOutcome::Complete(matrix)
            }
            Err(error) => {
                let failed_in = self.state;
                self.state = SessionState::Failed;
                warn!(
                    rows = matrix.len(),
                    state = %failed_in,
                    error = %error,
                    "Session failed"
                );
                SessionOutcome::Failed {
                    partial: matrix,
                    error,
                }
            }
        }
    }

    fn exchange(
        &mut self,
        transport: &mut Transport,
        matrix: &mut SampleMatrix,
    ) -> Result<(), DaqError> {
        self.state = SessionState::Encoding;
        let frame = codec::encode(&self.request);

        self.state = SessionState::Transmitting;
        transport.open(&self.port_name)?;
        transport.write(&frame)?;
        debug!(bytes = frame.len(), "Command frame sent");

        self.state = SessionState::Receiving;
        let columns = self.request.channels().len();
        for index in 0..self.request.sample_count() {
            let mut row = Vec::with_capacity(columns);
            for _ in 0..columns {
                let raw = transport.read_exact(SAMPLE_WIDTH)?;
                row.push(codec::decode_sample(&raw)?);
            }
            trace!(index, ?row, "Row received");
            matrix.push_row(row)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ChannelSet;
    use crate::mock::{MockBehavior, MockBoard};
    use crate::transport::LinkSettings;
    use std::sync::Arc;
    use std::time::Duration;

    fn request(samples: u32, channels: &[u8]) -> SampleRequest {
        SampleRequest::new(samples, ChannelSet::new(channels.iter().copied()).unwrap()).unwrap()
    }

    fn transport(board: &MockBoard) -> Transport {
        let settings = LinkSettings {
            read_timeout: Duration::from_millis(20),
            ..LinkSettings::default()
        };
        Transport::new(Arc::new(board.clone()), settings)
    }

    #[test]
    fn decodes_full_matrix_in_channel_order() {
        let expected = vec![
            vec![10, 20],
            vec![11, 21],
            vec![12, 22],
            vec![13, 23],
            vec![14, 24],
        ];
        let board = MockBoard::new();
        board.push(MockBehavior::Matrix(expected.clone()));

        let mut session = AcquisitionSession::new(request(5, &[1, 3]), BoardRevision::Rev01, "mock0");
        let outcome = session.run(&mut transport(&board));

        assert_eq!(session.state(), SessionState::Complete);
        assert_eq!(outcome.matrix().rows(), expected.as_slice());
        assert_eq!(board.frames(), vec![vec![5, 0, 1, 3]]);
        assert_eq!((board.opens(), board.closes()), (1, 1));
    }

    #[test]
    fn keeps_complete_rows_and_closes_once_on_link_failure() {
        let board = MockBoard::new();
        board.push(MockBehavior::FailAfterRows {
            rows: vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![7, 8]],
            after: 2,
        });

        let mut session = AcquisitionSession::new(request(4, &[2, 4]), BoardRevision::Rev02, "mock0");
        let outcome = session.run(&mut transport(&board));

        assert_eq!(session.state(), SessionState::Failed);
        match outcome {
            SessionOutcome::Failed { partial, error } => {
                assert_eq!(partial.rows(), &[vec![1, 2], vec![3, 4]]);
                assert!(matches!(error, DaqError::LinkError(_)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!((board.opens(), board.closes()), (1, 1));
        assert!(!board.is_link_open());
    }

    #[test]
    fn link_failure_mid_row_drops_the_partial_row() {
        let board = MockBoard::new();
        board.push(MockBehavior::FailAfterSamples {
            rows: vec![vec![257, 514], vec![771, 1028], vec![1, 2], vec![3, 4], vec![5, 6]],
            after: 3,
        });

        let mut session = AcquisitionSession::new(request(5, &[1, 2]), BoardRevision::Rev01, "mock0");
        let outcome = session.run(&mut transport(&board));

        assert_eq!(session.state(), SessionState::Failed);
        let (partial, error) = outcome.into_result().unwrap_err();
        assert_eq!(partial.rows(), &[vec![257, 514]]);
        assert!(partial.rows().iter().all(|row| row.len() == 2));
        assert!(matches!(error, DaqError::LinkError(_)));
        assert_eq!((board.opens(), board.closes()), (1, 1));
    }

    #[test]
    fn silent_board_fails_with_timeout() {
        let board = MockBoard::new();
        board.push(MockBehavior::Silent);

        let mut session = AcquisitionSession::new(request(3, &[1]), BoardRevision::Rev01, "mock0");
        let outcome = session.run(&mut transport(&board));

        let (partial, error) = outcome.into_result().unwrap_err();
        assert!(partial.is_empty());
        assert!(matches!(error, DaqError::Timeout { .. }));
        assert_eq!(board.closes(), 1);
    }

    #[test]
    fn unavailable_port_fails_before_any_io() {
        let board = MockBoard::new();
        board.push(MockBehavior::Unavailable);

        let mut session = AcquisitionSession::new(request(3, &[1]), BoardRevision::Rev01, "mock0");
        let outcome = session.run(&mut transport(&board));

        assert!(!outcome.is_complete());
        assert!(board.frames().is_empty());
        assert_eq!((board.opens(), board.closes()), (0, 0));
    }

    #[test]
    fn reopens_an_already_open_transport() {
        let board = MockBoard::new();
        let mut transport = transport(&board);
        transport.open("mock0").unwrap();
        assert!(board.is_link_open());

        let mut session = AcquisitionSession::new(request(2, &[1]), BoardRevision::Rev01, "mock0");
        let outcome = session.run(&mut transport);

        assert!(outcome.is_complete());
        assert_eq!((board.opens(), board.closes()), (2, 2));
        assert!(!transport.is_open());
    }
}
