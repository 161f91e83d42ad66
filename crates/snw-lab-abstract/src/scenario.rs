use crate::config::SimConfig;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    /// Time budget before the end-of-communication notice is sent anyway.
    pub duration_ms: Option<u64>,
    /// How long to wait for the termination handshake after the notice is queued.
    pub grace_ms: Option<u64>,
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub avg_delay_ms: Option<f64>,
    pub avg_valid_bytes: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub fragment_size: Option<usize>,
    pub show_packets: Option<bool>,
    pub seed: Option<u64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.avg_delay_ms {
            config.avg_delay_ms = v;
        }
        if let Some(v) = self.avg_valid_bytes {
            config.avg_valid_bytes = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.fragment_size {
            config.fragment_size = v;
        }
        if let Some(v) = self.show_packets {
            config.show_packets = v;
        }
        if let Some(v) = self.seed {
            config.seed = Some(v);
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Application sends a text message `time` ms after the start
    AppSend { time: u64, data: String },
    /// Application sends `count` copies of `byte`, optionally followed by a decimal index
    AppSendRepeated {
        time: u64,
        byte: char,
        count: usize,
        suffix_index: Option<u64>,
    },
    /// Application ends the communication
    EndCommunication { time: u64 },
}

impl TestAction {
    pub fn time(&self) -> u64 {
        match self {
            TestAction::AppSend { time, .. }
            | TestAction::AppSendRepeated { time, .. }
            | TestAction::EndCommunication { time } => *time,
        }
    }

    /// Message bytes carried by the action, `None` for the end of communication.
    pub fn payload(&self) -> Option<Vec<u8>> {
        match self {
            TestAction::AppSend { data, .. } => Some(data.as_bytes().to_vec()),
            TestAction::AppSendRepeated {
                byte,
                count,
                suffix_index,
                ..
            } => {
                let mut text = byte.to_string().repeat(*count);
                if let Some(index) = suffix_index {
                    text.push_str(&index.to_string());
                }
                Some(text.into_bytes())
            }
            TestAction::EndCommunication { .. } => None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// Assert that specific data was delivered to the application layer
    DataDelivered { data: String },
    /// Assert that exactly `count` messages were delivered
    DeliveredCount { count: usize },
    /// Assert that the sentinel arrived and all engine threads exited
    Terminated,
    /// Assert that simulation finishes within time
    MaxDuration { ms: u64 },
}
