use bytes::Bytes;

/// One end of the duplex channel. Frames sent *to* an endpoint are received *at* it.
///
/// The sender transmits data to `B` and listens on `A`; the receiver does the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    A,
    B,
}

/// The medium both protocol engines talk through.
///
/// Implementations may delay and alter frames but must hand out each frame
/// once, in the order it was sent to that endpoint.
pub trait Channel: Send + Sync {
    /// Queue a copy of `frame` for delivery at `to`.
    fn send(&self, to: Endpoint, frame: &[u8]);

    /// Block until a frame addressed to `at` is available.
    ///
    /// `None` means the channel is closed and nothing more will arrive.
    fn recv(&self, at: Endpoint) -> Option<Bytes>;
}
