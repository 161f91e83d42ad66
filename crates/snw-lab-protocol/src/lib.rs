//! Stop-and-wait ARQ engines.
//!
//! [`SnwSender`] fragments messages and keeps retransmitting the oldest
//! unacknowledged packet until a matching ACK arrives. [`SnwReceiver`]
//! validates, acknowledges and reassembles them. Both run on their own
//! threads and talk only through a [`Channel`](snw_lab_abstract::Channel).

pub mod assembler;
pub mod error;
pub mod receiver;
pub mod sender;

use snw_lab_abstract::Endpoint;

pub use assembler::{Assembler, AssemblyOutcome};
pub use error::ArqError;
pub use receiver::{ReceiverStats, SnwReceiver};
pub use sender::{SenderStats, SnwSender, fragment};

/// Endpoint data packets are addressed to; the receiver listens here.
pub const DATA_ENDPOINT: Endpoint = Endpoint::B;
/// Endpoint ACK/NAK packets are addressed to; the sender listens here.
pub const ACK_ENDPOINT: Endpoint = Endpoint::A;

#[cfg(test)]
mod testing;
