pub mod channel;
pub mod hexdump;
pub mod scenario_runner;
pub mod session;
pub mod trace;

pub use channel::{ChannelStats, LinkStats, NoisyChannel};
pub use hexdump::hex_dump;
pub use scenario_runner::{ScenarioOutcome, load_scenario, run_scenario};
pub use session::Session;
pub use trace::SimulationReport;
