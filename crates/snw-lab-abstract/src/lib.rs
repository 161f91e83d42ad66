pub mod config;
pub mod digest;
pub mod interface;
pub mod message;
pub mod packet;
pub mod scenario;

pub use config::{ConfigError, SimConfig};
pub use digest::digest;
pub use interface::{Channel, Endpoint};
pub use message::Message;
pub use packet::{AckPacket, DataPacket, PacketError};
pub use scenario::{SimConfigOverride, TestAction, TestAssertion, TestScenario};
