use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use serde::Serialize;
use snw_lab_abstract::packet::TERMINATION_SEQ;
use snw_lab_abstract::{AckPacket, Channel, DataPacket, Message, SimConfig};
use tracing::{debug, trace};

use crate::assembler::{Assembler, AssemblyOutcome};
use crate::error::ArqError;
use crate::{ACK_ENDPOINT, DATA_ENDPOINT};

const RECEIVE_THREAD: &str = "snw-receive";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub frames_received: u64,
    /// Frames that failed validation and were answered with a NAK.
    pub corrupt_frames: u64,
    pub duplicates_discarded: u64,
    pub messages_delivered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    corrupt_frames: AtomicU64,
    duplicates_discarded: AtomicU64,
    messages_delivered: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            duplicates_discarded: self.duplicates_discarded.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Receiving half of the stop-and-wait protocol.
///
/// A single thread validates every data frame, answers with an ACK or NAK,
/// and pushes completed messages (and finally [`Message::End`]) onto an
/// output queue drained by [`receive_message`](Self::receive_message).
pub struct SnwReceiver {
    delivered: Receiver<Message>,
    counters: Arc<Counters>,
    handle: JoinHandle<()>,
}

impl SnwReceiver {
    pub fn spawn<C: Channel + 'static>(channel: Arc<C>, config: &SimConfig) -> Result<Self, ArqError> {
        config.validate()?;
        let counters = Arc::new(Counters::default());
        let (output, delivered) = unbounded();
        let fragment_size = config.fragment_size;

        let handle = {
            let counters = counters.clone();
            thread::Builder::new()
                .name(RECEIVE_THREAD.into())
                .spawn(move || receive_loop(channel.as_ref(), &counters, &output, fragment_size))
                .map_err(|source| ArqError::Spawn {
                    thread: RECEIVE_THREAD,
                    source,
                })?
        };

        Ok(Self {
            delivered,
            counters,
            handle,
        })
    }

    /// Block until the next completed message, or [`Message::End`].
    ///
    /// Once the receive thread has exited and its output is drained, every
    /// call returns [`Message::End`].
    pub fn receive_message(&self) -> Message {
        self.delivered.recv().unwrap_or(Message::End)
    }

    pub fn receive_message_timeout(&self, timeout: Duration) -> Option<Message> {
        match self.delivered.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Message::End),
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the receive thread, which exits once the termination notice arrives.
    pub fn join(self) -> Result<ReceiverStats, ArqError> {
        self.handle
            .join()
            .map_err(|_| ArqError::Panicked(RECEIVE_THREAD))?;
        Ok(self.counters.snapshot())
    }
}

fn receive_loop<C: Channel + ?Sized>(
    channel: &C,
    counters: &Counters,
    output: &Sender<Message>,
    fragment_size: usize,
) {
    let mut assembler = Assembler::new();

    loop {
        let Some(frame) = channel.recv(DATA_ENDPOINT) else {
            debug!("channel closed, receive loop done");
            return;
        };
        counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let packet = match DataPacket::validate(&frame, fragment_size)
            .then(|| DataPacket::decode(&frame, fragment_size))
        {
            Some(Ok(packet)) => packet,
            _ => {
                let sequence = DataPacket::peek_sequence(&frame).unwrap_or(TERMINATION_SEQ);
                counters.corrupt_frames.fetch_add(1, Ordering::Relaxed);
                debug!(sequence, "corrupt data frame, sending NAK");
                channel.send(ACK_ENDPOINT, &AckPacket::nak(sequence).encode());
                continue;
            }
        };

        channel.send(ACK_ENDPOINT, &AckPacket::ack(packet.sequence).encode());

        match assembler.accept(&packet) {
            AssemblyOutcome::End => {
                deliver(output, Message::End);
                debug!("termination notice received, receive loop done");
                return;
            }
            AssemblyOutcome::Complete(message) => {
                counters.messages_delivered.fetch_add(1, Ordering::Relaxed);
                debug!(bytes = message.len(), "message complete");
                deliver(output, Message::Data(message));
            }
            AssemblyOutcome::Duplicate => {
                counters.duplicates_discarded.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = packet.sequence, "discarding duplicate fragment");
            }
            AssemblyOutcome::Started { remaining } => {
                trace!(remaining, "header received");
            }
            AssemblyOutcome::Appended => {
                trace!(
                    sequence = packet.sequence,
                    remaining = assembler.remaining(),
                    "fragment appended"
                );
            }
        }
    }
}

fn deliver(output: &Sender<Message>, message: Message) {
    if output.send(message).is_err() {
        trace!("receiver handle dropped, discarding message");
    }
}
