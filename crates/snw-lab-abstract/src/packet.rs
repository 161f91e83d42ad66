//! Fixed-layout wire formats.
//!
//! ```text
//! DataPacket: [digest:8][sequence:8][length:8][payload: fragment_size]
//! AckPacket:  [flag:1][sequence:8][digest:8]
//! ```
//!
//! Integers are little-endian. The data digest covers bytes `8..` (including
//! the zero padding past `length`); the ack digest covers bytes `0..9`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::digest::digest;

pub const DIGEST_LEN: usize = 8;
/// Digest, sequence and length fields that precede the payload area.
pub const DATA_HEADER_LEN: usize = 24;
pub const ACK_FRAME_LEN: usize = 17;

/// Sequence number of the end-of-communication notice.
pub const TERMINATION_SEQ: u64 = 0;
/// Sequence number of the header fragment carrying the fragment count.
pub const HEADER_SEQ: u64 = 1;
/// Sequence number of the first data fragment of every message.
pub const FIRST_FRAGMENT_SEQ: u64 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("data frame is {actual} bytes, expected {expected}")]
    DataLength { expected: usize, actual: usize },
    #[error("ack frame is {actual} bytes, expected {ACK_FRAME_LEN}")]
    AckLength { actual: usize },
}

pub const fn data_frame_len(fragment_size: usize) -> usize {
    DATA_HEADER_LEN + fragment_size
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub sequence: u64,
    /// Logical payload; at most `fragment_size` bytes survive encoding.
    pub payload: Bytes,
}

impl DataPacket {
    pub fn new(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    /// Header fragment announcing how many data fragments follow.
    pub fn header(fragment_count: u64) -> Self {
        Self::new(HEADER_SEQ, fragment_count.to_le_bytes().to_vec())
    }

    pub fn termination() -> Self {
        Self::new(TERMINATION_SEQ, Bytes::new())
    }

    pub fn is_termination(&self) -> bool {
        self.sequence == TERMINATION_SEQ
    }

    /// Fragment count carried by a header fragment.
    pub fn fragment_count(&self) -> Option<u64> {
        let raw: [u8; 8] = self.payload.get(..8)?.try_into().ok()?;
        Some(u64::from_le_bytes(raw))
    }

    pub fn encode(&self, fragment_size: usize) -> Bytes {
        let take = self.payload.len().min(fragment_size);
        let mut frame = BytesMut::with_capacity(data_frame_len(fragment_size));
        frame.put_u64_le(0);
        frame.put_u64_le(self.sequence);
        frame.put_u64_le(take as u64);
        frame.put_slice(&self.payload[..take]);
        frame.put_bytes(0, fragment_size - take);

        let sum = digest(&frame[DIGEST_LEN..]);
        frame[..DIGEST_LEN].copy_from_slice(&sum.to_le_bytes());
        frame.freeze()
    }

    /// Decodes a frame without checking its digest. A corrupted length field
    /// is clamped to the payload area.
    pub fn decode(frame: &[u8], fragment_size: usize) -> Result<Self, PacketError> {
        let expected = data_frame_len(fragment_size);
        if frame.len() != expected {
            return Err(PacketError::DataLength {
                expected,
                actual: frame.len(),
            });
        }

        let mut fields = &frame[DIGEST_LEN..DATA_HEADER_LEN];
        let sequence = fields.get_u64_le();
        let length = usize::try_from(fields.get_u64_le())
            .map_or(fragment_size, |length| length.min(fragment_size));

        Ok(Self {
            sequence,
            payload: Bytes::copy_from_slice(&frame[DATA_HEADER_LEN..DATA_HEADER_LEN + length]),
        })
    }

    /// Recomputes the digest of a raw data frame and compares it with the stored one.
    pub fn validate(frame: &[u8], fragment_size: usize) -> bool {
        if frame.len() != data_frame_len(fragment_size) {
            return false;
        }
        let stored = (&frame[..DIGEST_LEN]).get_u64_le();
        stored == digest(&frame[DIGEST_LEN..])
    }

    /// Whatever sequence value a frame carries, valid or not.
    pub fn peek_sequence(frame: &[u8]) -> Option<u64> {
        let mut field = frame.get(DIGEST_LEN..DIGEST_LEN + 8)?;
        Some(field.get_u64_le())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    /// `true` for ACK, `false` for NAK.
    pub positive: bool,
    pub sequence: u64,
}

impl AckPacket {
    pub fn ack(sequence: u64) -> Self {
        Self {
            positive: true,
            sequence,
        }
    }

    pub fn nak(sequence: u64) -> Self {
        Self {
            positive: false,
            sequence,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(ACK_FRAME_LEN);
        frame.put_u8(self.positive as u8);
        frame.put_u64_le(self.sequence);
        let sum = digest(&frame[..]);
        frame.put_u64_le(sum);
        frame.freeze()
    }

    pub fn decode(frame: &[u8]) -> Result<Self, PacketError> {
        if frame.len() != ACK_FRAME_LEN {
            return Err(PacketError::AckLength {
                actual: frame.len(),
            });
        }
        let mut fields = frame;
        let positive = fields.get_u8() != 0;
        let sequence = fields.get_u64_le();
        Ok(Self { positive, sequence })
    }

    pub fn validate(frame: &[u8]) -> bool {
        if frame.len() != ACK_FRAME_LEN {
            return false;
        }
        let stored = (&frame[ACK_FRAME_LEN - DIGEST_LEN..]).get_u64_le();
        stored == digest(&frame[..ACK_FRAME_LEN - DIGEST_LEN])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: usize = 32;

    #[test]
    fn data_frame_layout() {
        let frame = DataPacket::new(5, b"hello".to_vec()).encode(FRAGMENT);
        assert_eq!(frame.len(), DATA_HEADER_LEN + FRAGMENT);
        assert_eq!(&frame[8..16], &5u64.to_le_bytes());
        assert_eq!(&frame[16..24], &5u64.to_le_bytes());
        assert_eq!(&frame[24..29], b"hello");
        assert!(frame[29..].iter().all(|&b| b == 0));
        assert_eq!(&frame[..8], &digest(&frame[8..]).to_le_bytes());
    }

    #[test]
    fn encoding_is_independent_of_what_lies_past_the_payload() {
        let a = DataPacket::new(3, b"abc".to_vec()).encode(FRAGMENT);
        let b = DataPacket::new(3, Bytes::from_static(b"abcdef").slice(..3)).encode(FRAGMENT);
        assert_eq!(a, b);
    }

    #[test]
    fn data_packet_decodes_back() {
        let packet = DataPacket::new(9, b"payload".to_vec());
        let frame = packet.encode(FRAGMENT);
        assert!(DataPacket::validate(&frame, FRAGMENT));
        assert_eq!(DataPacket::decode(&frame, FRAGMENT).unwrap(), packet);
    }

    #[test]
    fn header_carries_fragment_count() {
        let frame = DataPacket::header(42).encode(FRAGMENT);
        let decoded = DataPacket::decode(&frame, FRAGMENT).unwrap();
        assert_eq!(decoded.sequence, HEADER_SEQ);
        assert_eq!(decoded.fragment_count(), Some(42));
    }

    #[test]
    fn every_single_bit_flip_in_a_data_frame_is_detected() {
        let frame = DataPacket::new(2, b"XXXX".to_vec()).encode(FRAGMENT);
        for index in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.to_vec();
                corrupted[index] ^= 1 << bit;
                assert!(
                    !DataPacket::validate(&corrupted, FRAGMENT),
                    "byte {index} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn every_single_bit_flip_in_an_ack_frame_is_detected() {
        let frame = AckPacket::ack(7).encode();
        assert_eq!(frame.len(), ACK_FRAME_LEN);
        assert!(AckPacket::validate(&frame));
        for index in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.to_vec();
                corrupted[index] ^= 1 << bit;
                assert!(!AckPacket::validate(&corrupted));
            }
        }
    }

    #[test]
    fn corrupted_length_is_clamped() {
        let mut frame = DataPacket::new(2, b"abc".to_vec()).encode(FRAGMENT).to_vec();
        frame[23] = 0xff;
        let decoded = DataPacket::decode(&frame, FRAGMENT).unwrap();
        assert_eq!(decoded.payload.len(), FRAGMENT);
        assert!(!DataPacket::validate(&frame, FRAGMENT));
    }

    #[test]
    fn wrong_sizes_are_rejected() {
        assert_eq!(
            DataPacket::decode(&[0u8; 10], FRAGMENT),
            Err(PacketError::DataLength {
                expected: DATA_HEADER_LEN + FRAGMENT,
                actual: 10
            })
        );
        assert!(!DataPacket::validate(&[0u8; 10], FRAGMENT));
        assert_eq!(
            AckPacket::decode(&[0u8; 3]),
            Err(PacketError::AckLength { actual: 3 })
        );
        assert_eq!(DataPacket::peek_sequence(&[0u8; 10]), None);
    }

    #[test]
    fn nak_round_trips() {
        let frame = AckPacket::nak(11).encode();
        assert_eq!(frame[0], 0);
        assert_eq!(AckPacket::decode(&frame).unwrap(), AckPacket::nak(11));
    }
}
