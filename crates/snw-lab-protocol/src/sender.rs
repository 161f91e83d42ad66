use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use snw_lab_abstract::packet::{FIRST_FRAGMENT_SEQ, TERMINATION_SEQ};
use snw_lab_abstract::{AckPacket, Channel, DataPacket, Message, SimConfig};
use tracing::{debug, trace};

use crate::error::ArqError;
use crate::{ACK_ENDPOINT, DATA_ENDPOINT};

const TRANSMIT_THREAD: &str = "snw-transmit";
const LISTENER_THREAD: &str = "snw-ack-listener";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    /// Data frames handed to the channel, retransmissions included.
    pub transmissions: u64,
    pub retransmissions: u64,
    pub acks_accepted: u64,
    /// Ack frames whose digest did not match.
    pub acks_corrupt: u64,
    /// Valid NAKs and acks for a sequence number that is not outstanding.
    pub acks_ignored: u64,
}

#[derive(Debug, Default)]
struct Counters {
    transmissions: AtomicU64,
    retransmissions: AtomicU64,
    acks_accepted: AtomicU64,
    acks_corrupt: AtomicU64,
    acks_ignored: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SenderStats {
        SenderStats {
            transmissions: self.transmissions.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            acks_accepted: self.acks_accepted.load(Ordering::Relaxed),
            acks_corrupt: self.acks_corrupt.load(Ordering::Relaxed),
            acks_ignored: self.acks_ignored.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct Outstanding {
    /// Only the front packet is ever on the wire.
    packets: VecDeque<DataPacket>,
    /// Bumped on every pop, so the transmit loop can tell an ack from a timeout.
    generation: u64,
    ended: bool,
    /// Set when the sender is torn down before the handshake; stops the transmit loop.
    shutdown: bool,
}

#[derive(Debug)]
struct Shared {
    outstanding: Mutex<Outstanding>,
    advance: Condvar,
    counters: Counters,
    fragment_size: usize,
    timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Outstanding> {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shut_down(&self) {
        self.lock().shutdown = true;
        self.advance.notify_all();
    }
}

/// Sending half of the stop-and-wait protocol.
///
/// Owns a transmit thread, which retransmits the front of the outstanding
/// queue every `timeout_ms` until it is acknowledged, and an ack listener
/// thread, which pops the front on a valid matching ACK. Retransmission is
/// unbounded: a packet that never gets through is resent forever.
pub struct SnwSender {
    shared: Arc<Shared>,
    transmit: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl SnwSender {
    pub fn spawn<C: Channel + 'static>(channel: Arc<C>, config: &SimConfig) -> Result<Self, ArqError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            outstanding: Mutex::new(Outstanding::default()),
            advance: Condvar::new(),
            counters: Counters::default(),
            fragment_size: config.fragment_size,
            timeout: Duration::from_millis(config.timeout_ms),
        });

        let transmit = {
            let shared = shared.clone();
            let channel = channel.clone();
            thread::Builder::new()
                .name(TRANSMIT_THREAD.into())
                .spawn(move || transmit_loop(channel.as_ref(), &shared))
                .map_err(|source| ArqError::Spawn {
                    thread: TRANSMIT_THREAD,
                    source,
                })?
        };
        let listener = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(LISTENER_THREAD.into())
                .spawn(move || ack_listener(channel.as_ref(), &shared))
        };
        let listener = match listener {
            Ok(handle) => handle,
            Err(source) => {
                shared.shut_down();
                transmit
                    .join()
                    .map_err(|_| ArqError::Panicked(TRANSMIT_THREAD))?;
                return Err(ArqError::Spawn {
                    thread: LISTENER_THREAD,
                    source,
                });
            }
        };

        Ok(Self {
            shared,
            transmit,
            listener,
        })
    }

    /// Queue a message for reliable delivery.
    ///
    /// [`Message::End`] queues the termination notice; any call after it
    /// fails with [`ArqError::Terminated`].
    pub fn send_message(&self, message: impl Into<Message>) -> Result<(), ArqError> {
        let message = message.into();
        let ending = message.is_end();
        let packets = match message {
            Message::Data(bytes) => fragment(&bytes, self.shared.fragment_size),
            Message::End => vec![DataPacket::termination()],
        };

        {
            let mut outstanding = self.shared.lock();
            if outstanding.ended {
                return Err(ArqError::Terminated);
            }
            outstanding.ended = ending;
            debug!(
                packets = packets.len(),
                queued = outstanding.packets.len(),
                "queueing message"
            );
            outstanding.packets.extend(packets);
        }
        self.shared.advance.notify_one();
        Ok(())
    }

    /// Packets still waiting for an acknowledgment.
    pub fn outstanding(&self) -> usize {
        self.shared.lock().packets.len()
    }

    pub fn stats(&self) -> SenderStats {
        self.shared.counters.snapshot()
    }

    /// `true` once both network threads have exited.
    pub fn is_finished(&self) -> bool {
        self.transmit.is_finished() && self.listener.is_finished()
    }

    /// Wait for both network threads. Only returns after the termination
    /// handshake, so call it after sending [`Message::End`].
    pub fn join(self) -> Result<SenderStats, ArqError> {
        self.transmit
            .join()
            .map_err(|_| ArqError::Panicked(TRANSMIT_THREAD))?;
        self.listener
            .join()
            .map_err(|_| ArqError::Panicked(LISTENER_THREAD))?;
        Ok(self.shared.counters.snapshot())
    }
}

/// Split a message into a header packet followed by its numbered fragments.
///
/// An empty message still gets one zero-length fragment, so it is delivered
/// like any other.
pub fn fragment(message: &Bytes, fragment_size: usize) -> Vec<DataPacket> {
    let count = message.len().div_ceil(fragment_size).max(1);
    let mut packets = Vec::with_capacity(count + 1);
    packets.push(DataPacket::header(count as u64));
    packets.extend((0..count).map(|index| {
        let start = (index * fragment_size).min(message.len());
        let end = (start + fragment_size).min(message.len());
        DataPacket::new(FIRST_FRAGMENT_SEQ + index as u64, message.slice(start..end))
    }));
    packets
}

fn transmit_loop<C: Channel + ?Sized>(channel: &C, shared: &Shared) {
    let counters = &shared.counters;
    let mut last_generation = None;
    let mut outstanding = shared.lock();

    loop {
        if outstanding.shutdown {
            debug!("sender shut down, transmit loop done");
            return;
        }
        if outstanding.packets.is_empty() {
            outstanding = shared
                .advance
                .wait_while(outstanding, |o| o.packets.is_empty() && !o.shutdown)
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        }

        let (sequence, frame) = match outstanding.packets.front() {
            Some(front) => (front.sequence, front.encode(shared.fragment_size)),
            None => continue,
        };
        let generation = outstanding.generation;
        drop(outstanding);

        Counters::bump(&counters.transmissions);
        if last_generation == Some(generation) {
            Counters::bump(&counters.retransmissions);
            debug!(sequence, "timeout, retransmitting");
        } else {
            trace!(sequence, "transmitting");
        }
        last_generation = Some(generation);
        channel.send(DATA_ENDPOINT, &frame);

        if sequence == TERMINATION_SEQ {
            // Nothing acknowledges the notice reliably, so wake our own listener.
            channel.send(ACK_ENDPOINT, &AckPacket::ack(TERMINATION_SEQ).encode());
            debug!("termination notice sent, transmit loop done");
            return;
        }

        outstanding = shared
            .advance
            .wait_timeout_while(shared.lock(), shared.timeout, |o| {
                o.generation == generation && !o.shutdown
            })
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

fn ack_listener<C: Channel + ?Sized>(channel: &C, shared: &Shared) {
    let counters = &shared.counters;

    loop {
        let Some(frame) = channel.recv(ACK_ENDPOINT) else {
            debug!("channel closed, ack listener done");
            return;
        };
        if !AckPacket::validate(&frame) {
            Counters::bump(&counters.acks_corrupt);
            trace!("dropping corrupt ack frame");
            continue;
        }
        let Ok(ack) = AckPacket::decode(&frame) else {
            continue;
        };

        if ack.positive && ack.sequence == TERMINATION_SEQ {
            debug!("termination acknowledged, ack listener done");
            return;
        }

        let accepted = {
            let mut outstanding = shared.lock();
            let matches = ack.positive
                && outstanding
                    .packets
                    .front()
                    .is_some_and(|front| front.sequence == ack.sequence);
            if matches {
                outstanding.packets.pop_front();
                outstanding.generation += 1;
            }
            matches
        };

        if accepted {
            Counters::bump(&counters.acks_accepted);
            trace!(sequence = ack.sequence, "ack accepted");
            shared.advance.notify_one();
        } else {
            Counters::bump(&counters.acks_ignored);
            trace!(
                sequence = ack.sequence,
                positive = ack.positive,
                "ignoring ack"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Loopback;
    use snw_lab_abstract::Endpoint;

    fn config() -> SimConfig {
        SimConfig {
            fragment_size: 8,
            timeout_ms: 20,
            ..SimConfig::ideal()
        }
    }

    fn next_data(channel: &Loopback) -> DataPacket {
        let frame = channel.recv(Endpoint::B).unwrap();
        assert!(DataPacket::validate(&frame, 8));
        DataPacket::decode(&frame, 8).unwrap()
    }

    #[test]
    fn fragments_into_header_and_numbered_slices() {
        let packets = fragment(&Bytes::from_static(b"0123456789"), 4);
        let sequences: Vec<u64> = packets.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(packets[0].fragment_count(), Some(3));
        assert_eq!(&packets[1].payload[..], b"0123");
        assert_eq!(&packets[3].payload[..], b"89");
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_fragment() {
        let packets = fragment(&Bytes::from_static(b"01234567"), 4);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].fragment_count(), Some(2));
    }

    #[test]
    fn empty_message_gets_one_empty_fragment() {
        let packets = fragment(&Bytes::new(), 4);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].fragment_count(), Some(1));
        assert!(packets[1].payload.is_empty());
    }

    #[test]
    fn retransmits_until_acknowledged() {
        let channel = Arc::new(Loopback::default());
        let sender = SnwSender::spawn(channel.clone(), &config()).unwrap();
        sender.send_message("hi").unwrap();

        let first = next_data(&channel);
        let again = next_data(&channel);
        assert_eq!(first, again);
        assert_eq!(first.sequence, 1);
        assert!(sender.stats().retransmissions >= 1);

        channel.send(Endpoint::A, &AckPacket::ack(1).encode());
        // Frames already in flight may still repeat the header.
        let mut next = next_data(&channel);
        while next.sequence == 1 {
            next = next_data(&channel);
        }
        assert_eq!(next.sequence, 2);
        assert_eq!(&next.payload[..], b"hi");
    }

    #[test]
    fn nak_and_mismatched_ack_do_not_advance() {
        let channel = Arc::new(Loopback::default());
        let sender = SnwSender::spawn(channel.clone(), &config()).unwrap();
        sender.send_message("hi").unwrap();
        next_data(&channel);

        channel.send(Endpoint::A, &AckPacket::nak(1).encode());
        channel.send(Endpoint::A, &AckPacket::ack(2).encode());
        let mut corrupt = AckPacket::ack(1).encode().to_vec();
        corrupt[3] ^= 0x10;
        channel.send(Endpoint::A, &corrupt);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(sender.outstanding(), 2);
        let stats = sender.stats();
        assert_eq!(stats.acks_accepted, 0);
        assert_eq!(stats.acks_ignored, 2);
        assert_eq!(stats.acks_corrupt, 1);
    }

    #[test]
    fn shut_down_stops_an_idle_transmit_loop() {
        let channel = Arc::new(Loopback::default());
        let sender = SnwSender::spawn(channel.clone(), &config()).unwrap();
        sender.shared.shut_down();
        sender.transmit.join().unwrap();
        assert!(channel.try_recv(Endpoint::B).is_none());
        assert_eq!(sender.shared.counters.snapshot().transmissions, 0);
    }

    #[test]
    fn shut_down_stops_retransmission() {
        let channel = Arc::new(Loopback::default());
        let sender = SnwSender::spawn(channel.clone(), &config()).unwrap();
        sender.send_message("hi").unwrap();
        next_data(&channel);
        sender.shared.shut_down();
        sender.transmit.join().unwrap();
        assert_eq!(sender.shared.lock().packets.len(), 2);
    }

    #[test]
    fn termination_sends_notice_once_and_exits() {
        let channel = Arc::new(Loopback::default());
        let sender = SnwSender::spawn(channel.clone(), &config()).unwrap();
        sender.send_message(Message::End).unwrap();
        assert!(matches!(
            sender.send_message("late"),
            Err(ArqError::Terminated)
        ));

        let stats = sender.join().unwrap();
        assert_eq!(stats.transmissions, 1);
        assert!(next_data(&channel).is_termination());
        assert!(channel.try_recv(Endpoint::B).is_none());
    }
}
