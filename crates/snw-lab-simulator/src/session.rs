use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use snw_lab_abstract::{Message, SimConfig, TestAction};
use snw_lab_protocol::{SnwReceiver, SnwSender};
use tracing::{info, warn};

use crate::channel::NoisyChannel;
use crate::trace::SimulationReport;

pub const DEFAULT_DURATION: Duration = Duration::from_millis(2_000);
/// Time allowed for the termination handshake after the sentinel is queued.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(1_000);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// One sender, one receiver and the noisy channel between them.
pub struct Session {
    config: SimConfig,
    channel: Arc<NoisyChannel>,
    duration: Duration,
    grace: Duration,
}

#[derive(Default)]
struct Deliveries {
    data: Vec<Vec<u8>>,
    at_ms: Vec<u64>,
    sentinel: bool,
}

impl Deliveries {
    /// Drain the receiver until `done` holds, the sentinel arrives or `deadline` passes.
    fn drain_until(
        &mut self,
        receiver: &SnwReceiver,
        start: Instant,
        deadline: Instant,
        done: impl Fn(&Self) -> bool,
    ) {
        while !self.sentinel && !done(self) {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return;
            };
            match receiver.receive_message_timeout(remaining) {
                Some(Message::Data(data)) => {
                    info!(
                        "Receiver: message received ({} bytes): {}",
                        data.len(),
                        String::from_utf8_lossy(&data)
                    );
                    self.at_ms.push(elapsed_ms(start));
                    self.data.push(data.to_vec());
                }
                Some(Message::End) => self.sentinel = true,
                None => return,
            }
        }
    }
}

impl Session {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate().context("invalid simulation config")?;
        let channel = Arc::new(NoisyChannel::new(&config)?);
        Ok(Self {
            config,
            channel,
            duration: DEFAULT_DURATION,
            grace: DEFAULT_GRACE,
        })
    }

    /// Deadline after which the sentinel is sent even if messages are still pending.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// How long to wait for the termination handshake once the notice is queued.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Play `actions` in time order and report what the application saw.
    ///
    /// Without an explicit [`TestAction::EndCommunication`], the sentinel is
    /// sent once every message is delivered or the duration runs out.
    pub fn run(self, actions: &[TestAction]) -> Result<SimulationReport> {
        let mut actions = actions.to_vec();
        actions.sort_by_key(TestAction::time);
        let expected = actions.iter().filter(|a| a.payload().is_some()).count();

        let receiver = SnwReceiver::spawn(self.channel.clone(), &self.config)?;
        let sender = SnwSender::spawn(self.channel.clone(), &self.config)?;
        info!("Receiver created and listens for messages...");
        info!("Sender created and starts sending messages...");

        let start = Instant::now();
        let mut deliveries = Deliveries::default();
        let mut end_sent = false;

        for action in &actions {
            let due = start + Duration::from_millis(action.time());
            deliveries.drain_until(&receiver, start, due, |_| false);
            if let Some(remaining) = due.checked_duration_since(Instant::now()) {
                thread::sleep(remaining);
            }
            match action.payload() {
                Some(payload) => sender
                    .send_message(payload)
                    .context("failed to queue message")?,
                None => {
                    sender
                        .send_message(Message::End)
                        .context("failed to queue end of communication")?;
                    end_sent = true;
                }
            }
        }

        if !end_sent {
            deliveries.drain_until(&receiver, start, start + self.duration, |d| {
                d.data.len() >= expected
            });
            sender
                .send_message(Message::End)
                .context("failed to queue end of communication")?;
        }

        let grace_deadline = Instant::now() + self.grace;
        deliveries.drain_until(&receiver, start, grace_deadline, |_| false);
        while !(sender.is_finished() && receiver.is_finished()) && Instant::now() < grace_deadline {
            thread::sleep(POLL_INTERVAL);
        }

        let terminated = sender.is_finished() && receiver.is_finished();
        let (sender_stats, receiver_stats) = if terminated {
            (sender.join()?, receiver.join()?)
        } else {
            warn!(
                outstanding = sender.outstanding(),
                "termination handshake did not complete, leaving engine threads behind"
            );
            (sender.stats(), receiver.stats())
        };

        let channel = self.channel.stats();
        info!("\n{channel}");

        Ok(SimulationReport {
            config: self.config,
            duration_ms: elapsed_ms(start),
            delivered_data: deliveries.data,
            delivered_at_ms: deliveries.at_ms,
            channel,
            sender: sender_stats,
            receiver: receiver_stats,
            sentinel_received: deliveries.sentinel,
            terminated,
        })
    }
}
