//! Simulated acquisition board for testing and dry runs.
//!
//! [`MockBoard`] implements [`PortOpener`], so it drops in anywhere the real
//! [`SerialPortOpener`](crate::transport::SerialPortOpener) is used. Each open
//! consumes the next scripted [`MockBehavior`]; once the script runs out the
//! board answers with deterministic ramp data.
//!
//! The board also enforces exclusive ownership: opening it while another link
//! is still open fails with `PortUnavailable`, the same way a claimed tty does.
//!
//! # Example
//!
//! ```
//! use serial_monitor::mock::{MockBehavior, MockBoard};
//!
//! let board = MockBoard::new();
//! board.push(MockBehavior::Matrix(vec![vec![10, 20], vec![11, 21]]));
//! board.push(MockBehavior::Unavailable);
//! assert_eq!(board.opens(), 0);
//! ```

use crate::codec;
use crate::error::{AppResult, DaqError};
use crate::transport::{LinkSettings, PortOpener, SerialLink};
use bytes::Buf;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// How the board answers one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Generated data, different for every command received.
    Ramp,
    /// Send exactly these rows, whatever was requested.
    Matrix(Vec<Vec<u16>>),
    /// Send the first `after` rows of `rows`, then break the link.
    FailAfterRows {
        /// Scripted rows
        rows: Vec<Vec<u16>>,
        /// Rows sent before the break
        after: usize,
    },
    /// Send the first `after` samples of `rows` (row-major), then break the
    /// link, possibly in the middle of a row.
    FailAfterSamples {
        /// Scripted rows
        rows: Vec<Vec<u16>>,
        /// Samples sent before the break
        after: usize,
    },
    /// Accept the command and never answer.
    Silent,
    /// Refuse to open.
    Unavailable,
}

#[derive(Debug, Default)]
struct BoardState {
    script: VecDeque<MockBehavior>,
    opens: usize,
    closes: usize,
    link_open: bool,
    frames: Vec<Vec<u8>>,
}

/// Scriptable simulated board. Cloning shares the same board.
#[derive(Debug, Clone, Default)]
pub struct MockBoard {
    state: Arc<Mutex<BoardState>>,
}

impl MockBoard {
    /// Board with an empty script; every open answers with [`MockBehavior::Ramp`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behaviour for the next open.
    pub fn push(&self, behavior: MockBehavior) {
        self.lock().script.push_back(behavior);
    }

    /// Number of successful opens so far.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Number of closes so far.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Whether a link is currently open.
    #[must_use]
    pub fn is_link_open(&self) -> bool {
        self.lock().link_open
    }

    /// Every command frame received, in order.
    #[must_use]
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PortOpener for MockBoard {
    fn open(&self, port_name: &str, settings: &LinkSettings) -> AppResult<Box<dyn SerialLink>> {
        let mut state = self.lock();
        if state.link_open {
            return Err(DaqError::PortUnavailable {
                port: port_name.to_string(),
                reason: "port already claimed".into(),
            });
        }

        let behavior = state.script.pop_front().unwrap_or(MockBehavior::Ramp);
        if behavior == MockBehavior::Unavailable {
            return Err(DaqError::PortUnavailable {
                port: port_name.to_string(),
                reason: "no such device".into(),
            });
        }

        state.opens += 1;
        state.link_open = true;
        debug!(port = port_name, ?behavior, "Mock board opened");

        Ok(Box::new(MockLink {
            board: self.clone(),
            behavior,
            pending: VecDeque::new(),
            fail_at: None,
            read_timeout: settings.read_timeout,
            closed: false,
        }))
    }
}

struct MockLink {
    board: MockBoard,
    behavior: MockBehavior,
    pending: VecDeque<u8>,
    /// Byte count after which reads fail.
    fail_at: Option<usize>,
    read_timeout: Duration,
    closed: bool,
}

impl MockLink {
    fn respond(&mut self, frame: &[u8]) -> AppResult<()> {
        let (sample_count, channels) = parse_request(frame)?;
        let frame_no = {
            let mut state = self.board.lock();
            state.frames.push(frame.to_vec());
            state.frames.len()
        };

        let rows: Vec<Vec<u16>> = match &self.behavior {
            MockBehavior::Ramp => ramp(frame_no, sample_count, &channels),
            MockBehavior::Matrix(rows) => rows.clone(),
            MockBehavior::FailAfterRows { rows, after } => {
                let row_bytes = channels.len() * codec::SAMPLE_WIDTH;
                self.fail_at = Some(after * row_bytes);
                rows.iter().take(*after).cloned().collect()
            }
            MockBehavior::FailAfterSamples { rows, after } => {
                self.fail_at = Some(after * codec::SAMPLE_WIDTH);
                let samples: Vec<u16> = rows.iter().flatten().copied().take(*after).collect();
                vec![samples]
            }
            MockBehavior::Silent | MockBehavior::Unavailable => Vec::new(),
        };

        self.pending = rows
            .iter()
            .flatten()
            .flat_map(|value| codec::encode_sample(*value))
            .collect();
        Ok(())
    }
}

impl SerialLink for MockLink {
    fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        if self.closed {
            return Err(DaqError::LinkError("mock link closed".into()));
        }
        self.respond(bytes)
    }

    fn read_exact(&mut self, n: usize) -> AppResult<Vec<u8>> {
        if self.closed {
            return Err(DaqError::LinkError("mock link closed".into()));
        }
        if self.pending.len() >= n {
            let bytes: Vec<u8> = self.pending.drain(..n).collect();
            if let Some(remaining) = self.fail_at.as_mut() {
                *remaining = remaining.saturating_sub(n);
            }
            return Ok(bytes);
        }

        if self.fail_at.is_some() {
            return Err(DaqError::LinkError("simulated device disconnect".into()));
        }

        // Nothing more is coming; behave like a port that never answers.
        std::thread::sleep(self.read_timeout.min(Duration::from_millis(50)));
        Err(DaqError::Timeout {
            expected: n,
            received: self.pending.len(),
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.board.lock();
        state.closes += 1;
        state.link_open = false;
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        // A link dropped without close() still frees the port, but is not counted.
        if !self.closed {
            self.board.lock().link_open = false;
        }
    }
}

fn parse_request(frame: &[u8]) -> AppResult<(u16, Vec<u8>)> {
    if frame.len() < 3 {
        return Err(DaqError::LinkError(format!(
            "mock board got a {}-byte frame",
            frame.len()
        )));
    }
    let mut buf = frame;
    let sample_count = buf.get_u16_le();
    Ok((sample_count, buf.to_vec()))
}

fn ramp(frame_no: usize, sample_count: u16, channels: &[u8]) -> Vec<Vec<u16>> {
    (0..usize::from(sample_count))
        .map(|row| {
            channels
                .iter()
                .map(|ch| ((frame_no * 1000 + row * 10 + usize::from(*ch)) % 65_536) as u16)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(board: &MockBoard) -> Box<dyn SerialLink> {
        board.open("mock0", &LinkSettings::default()).unwrap()
    }

    #[test]
    fn answers_scripted_matrix() {
        let board = MockBoard::new();
        board.push(MockBehavior::Matrix(vec![vec![10, 20]]));
        let mut link = open(&board);
        link.write_all(&[1, 0, 1, 3]).unwrap();
        assert_eq!(link.read_exact(4).unwrap(), vec![10, 0, 20, 0]);
        link.close();

        assert_eq!(board.frames(), vec![vec![1, 0, 1, 3]]);
        assert_eq!(board.opens(), 1);
        assert_eq!(board.closes(), 1);
        assert!(!board.is_link_open());
    }

    #[test]
    fn refuses_second_open_while_claimed() {
        let board = MockBoard::new();
        let _link = open(&board);
        let err = board.open("mock0", &LinkSettings::default()).err().unwrap();
        assert!(matches!(err, DaqError::PortUnavailable { .. }));
    }

    #[test]
    fn fails_after_scripted_rows() {
        let board = MockBoard::new();
        board.push(MockBehavior::FailAfterRows {
            rows: vec![vec![1], vec![2], vec![3]],
            after: 1,
        });
        let mut link = open(&board);
        link.write_all(&[3, 0, 1]).unwrap();
        assert_eq!(link.read_exact(2).unwrap(), vec![1, 0]);
        assert!(matches!(link.read_exact(2), Err(DaqError::LinkError(_))));
    }

    #[test]
    fn fails_mid_row_after_scripted_samples() {
        let board = MockBoard::new();
        board.push(MockBehavior::FailAfterSamples {
            rows: vec![vec![1, 2], vec![3, 4]],
            after: 3,
        });
        let mut link = open(&board);
        link.write_all(&[2, 0, 1, 2]).unwrap();
        assert_eq!(link.read_exact(2).unwrap(), vec![1, 0]);
        assert_eq!(link.read_exact(2).unwrap(), vec![2, 0]);
        assert_eq!(link.read_exact(2).unwrap(), vec![3, 0]);
        assert!(matches!(link.read_exact(2), Err(DaqError::LinkError(_))));
    }

    #[test]
    fn ramp_differs_between_commands() {
        let board = MockBoard::new();
        let mut link = open(&board);
        link.write_all(&[1, 0, 2]).unwrap();
        let first = link.read_exact(2).unwrap();
        link.write_all(&[1, 0, 2]).unwrap();
        let second = link.read_exact(2).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn silent_board_times_out() {
        let board = MockBoard::new();
        board.push(MockBehavior::Silent);
        let mut link = open(&board);
        link.write_all(&[1, 0, 1]).unwrap();
        assert!(matches!(
            link.read_exact(2),
            Err(DaqError::Timeout { expected: 2, .. })
        ));
    }
}
