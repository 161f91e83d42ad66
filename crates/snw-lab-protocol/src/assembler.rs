use bytes::{Bytes, BytesMut};
use snw_lab_abstract::DataPacket;
use snw_lab_abstract::packet::{HEADER_SEQ, TERMINATION_SEQ};

/// What a validated packet did to the assembly state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// Header fragment: state reset, `remaining` fragments expected.
    Started { remaining: u64 },
    /// Fragment appended, message not complete yet.
    Appended,
    /// Sequence number not above the last accepted one; dropped.
    Duplicate,
    Complete(Bytes),
    End,
}

/// Reassembly state for the message currently being received.
///
/// Sequence numbers restart at [`HEADER_SEQ`] for every message, so duplicates
/// are only recognised relative to the current message.
#[derive(Debug, Default)]
pub struct Assembler {
    last_accepted: u64,
    remaining: u64,
    buffer: BytesMut,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, packet: &DataPacket) -> AssemblyOutcome {
        match packet.sequence {
            TERMINATION_SEQ => AssemblyOutcome::End,
            HEADER_SEQ => {
                // A header always restarts assembly, even mid-message.
                self.last_accepted = HEADER_SEQ;
                self.remaining = packet.fragment_count().unwrap_or(0);
                self.buffer.clear();
                match self.remaining {
                    0 => AssemblyOutcome::Complete(Bytes::new()),
                    remaining => AssemblyOutcome::Started { remaining },
                }
            }
            sequence if sequence <= self.last_accepted => AssemblyOutcome::Duplicate,
            sequence => {
                self.last_accepted = sequence;
                self.buffer.extend_from_slice(&packet.payload);
                match self.remaining {
                    1 => {
                        self.remaining = 0;
                        AssemblyOutcome::Complete(self.buffer.split().freeze())
                    }
                    remaining => {
                        self.remaining = remaining.saturating_sub(1);
                        AssemblyOutcome::Appended
                    }
                }
            }
        }
    }

    pub fn last_accepted(&self) -> u64 {
        self.last_accepted
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Bytes accumulated for the message in progress.
    pub fn assembled_len(&self) -> usize {
        self.buffer.len()
    }
}
