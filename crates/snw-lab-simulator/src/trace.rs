use serde::Serialize;
use snw_lab_abstract::SimConfig;
use snw_lab_protocol::{ReceiverStats, SenderStats};

use crate::channel::ChannelStats;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration_ms: u64,
    pub delivered_data: Vec<Vec<u8>>,
    /// Milliseconds from session start to each delivery, parallel to `delivered_data`.
    pub delivered_at_ms: Vec<u64>,
    pub channel: ChannelStats,
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
    /// The receiver handed out the end-of-communication sentinel.
    pub sentinel_received: bool,
    /// Every engine thread exited within the grace period.
    pub terminated: bool,
}

impl SimulationReport {
    pub fn delivered_text(&self) -> Vec<String> {
        self.delivered_data
            .iter()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .collect()
    }
}
