//! Wire codec for the acquisition board.
//!
//! # Frame layout
//!
//! ```text
//! host -> board:  [sample_count: u16 LE][channel_id: u8] * n
//! board -> host:  [sample: u16 LE] * (sample_count * n), row-major
//! ```
//!
//! Channel ids go out in selection order and the board answers each row in
//! that same order, so column `i` of every row belongs to `channels[i]`.
//!
//! Only this layout is supported. Earlier firmware that took a one-byte
//! count ahead of the channels is not spoken.

use crate::error::{AppResult, DaqError};
use crate::measurement::{ChannelSet, SampleRequest};
use bytes::{BufMut, Bytes, BytesMut};

/// Width in bytes of one encoded sample.
pub const SAMPLE_WIDTH: usize = 2;

/// Encode a sample-request command frame.
///
/// Validates `sample_count` and `channels` the same way [`SampleRequest::new`]
/// does, so callers holding raw operator input can go straight to bytes.
pub fn encode_request(sample_count: u32, channels: &[u8]) -> AppResult<Bytes> {
    let channels = ChannelSet::new(channels.iter().copied())?;
    let request = SampleRequest::new(sample_count, channels)?;
    Ok(encode(&request))
}

/// Encode an already validated request.
#[must_use]
pub fn encode(request: &SampleRequest) -> Bytes {
    let channels = request.channels().as_slice();
    let mut frame = BytesMut::with_capacity(2 + channels.len());
    frame.put_u16_le(request.sample_count());
    frame.put_slice(channels);
    frame.freeze()
}

/// Decode one little-endian `u16` sample.
///
/// Bytes beyond the first two are ignored.
pub fn decode_sample(raw: &[u8]) -> AppResult<u16> {
    match raw {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(DaqError::ShortRead {
            expected: SAMPLE_WIDTH,
            received: raw.len(),
        }),
    }
}

/// Encode one sample the way the board sends it.
#[must_use]
pub fn encode_sample(value: u16) -> [u8; SAMPLE_WIDTH] {
    value.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_count_then_channels() {
        let frame = encode_request(5, &[1, 3]).unwrap();
        assert_eq!(frame.as_ref(), &[0x05, 0x00, 1, 3]);

        let frame = encode_request(3000, &[8]).unwrap();
        assert_eq!(frame.as_ref(), &[0xB8, 0x0B, 8]);
    }

    #[test]
    fn channel_order_changes_the_frame() {
        let a = encode_request(10, &[1, 2]).unwrap();
        let b = encode_request(10, &[2, 1]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sample_count_boundaries() {
        for bad in [0, 3001] {
            assert!(matches!(
                encode_request(bad, &[1]),
                Err(DaqError::InvalidParameter(_))
            ));
        }
        for good in [1, 3000] {
            assert!(encode_request(good, &[1]).is_ok());
        }
    }

    #[test]
    fn rejects_bad_channel_lists() {
        assert!(matches!(
            encode_request(1, &[]),
            Err(DaqError::InvalidParameter(_))
        ));
        assert!(encode_request(1, &[1, 1]).is_err());
        assert!(encode_request(1, &[9]).is_err());
    }

    #[test]
    fn decode_round_trips_every_value() {
        for value in 0..=u16::MAX {
            assert_eq!(decode_sample(&encode_sample(value)).unwrap(), value);
        }
    }

    #[test]
    fn decode_short_input_is_a_short_read() {
        assert!(matches!(
            decode_sample(&[0x01]),
            Err(DaqError::ShortRead {
                expected: 2,
                received: 1
            })
        ));
        assert!(decode_sample(&[]).is_err());
    }
}
