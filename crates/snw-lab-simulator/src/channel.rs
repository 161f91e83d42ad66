//! Duplex channel with Poisson delay and periodic bit errors.
//!
//! Each direction is an independent FIFO. A send sleeps for a delay drawn
//! from a Poisson distribution, then enqueues a copy of the frame. Every
//! `avg_valid_bytes` bytes carried by a direction, the frame containing the
//! boundary byte gets one random bit flipped. Frames are never dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, unbounded};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use serde::Serialize;
use snw_lab_abstract::{Channel, Endpoint, SimConfig};
use tracing::{debug, info, warn};

use crate::hexdump::hex_dump;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub sent: u64,
    pub received: u64,
    pub bits_flipped: u64,
}

/// Counters for both directions, named after the receiving endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub to_a: LinkStats,
    pub to_b: LinkStats,
}

impl fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total packets sent to endpoint A: {}", self.to_a.sent)?;
        writeln!(f, "Total packets sent to endpoint B: {}", self.to_b.sent)?;
        writeln!(f, "Total packets received from endpoint A: {}", self.to_a.received)?;
        writeln!(f, "Total packets received from endpoint B: {}", self.to_b.received)?;
        write!(
            f,
            "Bits flipped towards A/B: {}/{}",
            self.to_a.bits_flipped, self.to_b.bits_flipped
        )
    }
}

/// Per-direction randomness and the byte budget left before the next bit error.
///
/// Mutated by whichever thread sends in this direction; the protocol keeps
/// that to one thread per direction (plus the sender's final self-ack).
struct Impairment {
    rng: StdRng,
    valid_bytes_left: u64,
}

struct Link {
    endpoint: Endpoint,
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    impairment: Mutex<Impairment>,
    sent: AtomicU64,
    received: AtomicU64,
    bits_flipped: AtomicU64,
}

impl Link {
    fn new(endpoint: Endpoint, rng: StdRng, avg_valid_bytes: u64) -> Self {
        let (tx, rx) = unbounded();
        Self {
            endpoint,
            tx,
            rx,
            impairment: Mutex::new(Impairment {
                rng,
                valid_bytes_left: avg_valid_bytes,
            }),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            bits_flipped: AtomicU64::new(0),
        }
    }

    fn sample_delay(&self, delay: Option<&Poisson<f64>>) -> Duration {
        let Some(delay) = delay else {
            return Duration::ZERO;
        };
        let mut impairment = self.impairment.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_millis(delay.sample(&mut impairment.rng) as u64)
    }

    /// Charge `frame` against the byte budget and flip one bit if it crosses it.
    fn corrupt(&self, frame: &mut [u8], avg_valid_bytes: u64) -> Option<(usize, u8)> {
        if avg_valid_bytes == 0 || frame.is_empty() {
            return None;
        }
        let mut impairment = self.impairment.lock().unwrap_or_else(PoisonError::into_inner);
        let size = frame.len() as u64;
        if impairment.valid_bytes_left > size {
            impairment.valid_bytes_left -= size;
            return None;
        }

        let overflow = size - impairment.valid_bytes_left;
        impairment.valid_bytes_left = avg_valid_bytes - overflow % avg_valid_bytes;

        let index = impairment.rng.random_range(0..frame.len());
        let bit = impairment.rng.random_range(0..8u8);
        frame[index] ^= 1 << bit;
        Some((index, bit))
    }

    fn stats(&self) -> LinkStats {
        LinkStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            bits_flipped: self.bits_flipped.load(Ordering::Relaxed),
        }
    }
}

pub struct NoisyChannel {
    delay: Option<Poisson<f64>>,
    avg_valid_bytes: u64,
    show_packets: bool,
    to_a: Link,
    to_b: Link,
}

impl NoisyChannel {
    pub fn new(config: &SimConfig) -> Result<Self> {
        let delay = if config.avg_delay_ms > 0.0 {
            Some(Poisson::new(config.avg_delay_ms).map_err(|err| {
                anyhow!("invalid mean channel delay {}ms: {err}", config.avg_delay_ms)
            })?)
        } else {
            None
        };

        let rng = |salt: u64| match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ salt),
            None => StdRng::from_os_rng(),
        };

        debug!(
            avg_delay_ms = config.avg_delay_ms,
            avg_valid_bytes = config.avg_valid_bytes,
            seed = ?config.seed,
            "noisy channel created"
        );

        Ok(Self {
            delay,
            avg_valid_bytes: config.avg_valid_bytes,
            show_packets: config.show_packets,
            to_a: Link::new(Endpoint::A, rng(0xa), config.avg_valid_bytes),
            to_b: Link::new(Endpoint::B, rng(0xb), config.avg_valid_bytes),
        })
    }

    fn link(&self, endpoint: Endpoint) -> &Link {
        match endpoint {
            Endpoint::A => &self.to_a,
            Endpoint::B => &self.to_b,
        }
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            to_a: self.to_a.stats(),
            to_b: self.to_b.stats(),
        }
    }

    /// Frames queued towards `endpoint` and not yet received.
    pub fn pending(&self, endpoint: Endpoint) -> usize {
        self.link(endpoint).rx.len()
    }
}

impl Channel for NoisyChannel {
    fn send(&self, to: Endpoint, frame: &[u8]) {
        let link = self.link(to);
        let delay = link.sample_delay(self.delay.as_ref());
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut copy = frame.to_vec();
        if let Some((index, bit)) = link.corrupt(&mut copy, self.avg_valid_bytes) {
            link.bits_flipped.fetch_add(1, Ordering::Relaxed);
            debug!(endpoint = ?to, index, bit, "bit error injected");
        }
        if link.tx.send(copy.into()).is_err() {
            warn!(endpoint = ?to, "link closed, dropping frame");
            return;
        }
        link.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn recv(&self, at: Endpoint) -> Option<Bytes> {
        let link = self.link(at);
        let frame = link.rx.recv().ok()?;
        link.received.fetch_add(1, Ordering::Relaxed);

        if self.show_packets {
            info!(
                target: "snw_lab::channel",
                "Endpoint '{:?}' received:\n{}",
                link.endpoint,
                hex_dump(&frame)
            );
        }
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn corrupting(avg_valid_bytes: u64) -> NoisyChannel {
        NoisyChannel::new(&SimConfig {
            avg_valid_bytes,
            seed: Some(1),
            ..SimConfig::ideal()
        })
        .unwrap()
    }

    fn take(channel: &NoisyChannel, at: Endpoint) -> Bytes {
        channel.recv(at).expect("frame queued")
    }

    fn flipped_frames(channel: &NoisyChannel, frames: usize, size: usize) -> Vec<usize> {
        (0..frames)
            .filter(|_| {
                channel.send(Endpoint::B, &vec![0u8; size]);
                take(channel, Endpoint::B).iter().any(|&byte| byte != 0)
            })
            .collect()
    }

    #[test]
    fn delivers_in_order_without_impairment() {
        let channel = NoisyChannel::new(&SimConfig::ideal()).unwrap();
        for value in 0..5u8 {
            channel.send(Endpoint::A, &[value; 3]);
        }
        for value in 0..5u8 {
            assert_eq!(&take(&channel, Endpoint::A)[..], &[value; 3]);
        }
        assert_eq!(channel.pending(Endpoint::B), 0);
    }

    #[test]
    fn flips_a_bit_each_time_the_byte_budget_runs_out() {
        let channel = corrupting(100);
        assert_eq!(flipped_frames(&channel, 10, 30), vec![3, 6, 9]);
        assert_eq!(channel.stats().to_b.bits_flipped, 3);
    }

    #[test]
    fn exactly_one_bit_is_flipped() {
        let channel = corrupting(10);
        channel.send(Endpoint::A, &[0u8; 64]);
        let frame = take(&channel, Endpoint::A);
        let ones: u32 = frame.iter().map(|byte| byte.count_ones()).sum();
        assert_eq!(ones, 1);
    }

    #[test]
    fn zero_budget_disables_corruption() {
        let channel = corrupting(0);
        assert!(flipped_frames(&channel, 20, 1048).is_empty());
    }

    #[test]
    fn directions_are_independent() {
        let channel = corrupting(100);
        channel.send(Endpoint::B, &[0u8; 90]);
        channel.send(Endpoint::A, &[0u8; 30]);
        assert!(take(&channel, Endpoint::A).iter().all(|&byte| byte == 0));
        let stats = channel.stats();
        assert_eq!(stats.to_b.sent, 1);
        assert_eq!(stats.to_a.sent, 1);
        assert_eq!(stats.to_a.received, 1);
        assert_eq!(stats.to_b.received, 0);
    }

    #[test]
    fn same_seed_flips_the_same_bits() {
        let frames = |channel: &NoisyChannel| -> Vec<Bytes> {
            (0..6)
                .map(|_| {
                    channel.send(Endpoint::B, &[0u8; 40]);
                    take(channel, Endpoint::B)
                })
                .collect()
        };
        assert_eq!(frames(&corrupting(50)), frames(&corrupting(50)));
    }

    #[test]
    fn send_sleeps_for_the_sampled_delay() {
        let channel = NoisyChannel::new(&SimConfig {
            avg_delay_ms: 20.0,
            avg_valid_bytes: 0,
            seed: Some(9),
            ..Default::default()
        })
        .unwrap();
        let start = Instant::now();
        for _ in 0..5 {
            channel.send(Endpoint::B, b"x");
        }
        // Poisson(20) summed over five draws is essentially never below 30.
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(channel.pending(Endpoint::B), 5);
    }

    #[test]
    fn rejects_non_finite_delay() {
        let config = SimConfig {
            avg_delay_ms: f64::INFINITY,
            ..Default::default()
        };
        assert!(NoisyChannel::new(&config).is_err());
    }
}
