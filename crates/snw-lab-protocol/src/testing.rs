use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, unbounded};
use snw_lab_abstract::{Channel, Endpoint};

/// Perfect in-memory channel for engine unit tests.
pub(crate) struct Loopback {
    to_a: (Sender<Bytes>, Receiver<Bytes>),
    to_b: (Sender<Bytes>, Receiver<Bytes>),
}

impl Default for Loopback {
    fn default() -> Self {
        Self {
            to_a: unbounded(),
            to_b: unbounded(),
        }
    }
}

impl Loopback {
    fn link(&self, endpoint: Endpoint) -> &(Sender<Bytes>, Receiver<Bytes>) {
        match endpoint {
            Endpoint::A => &self.to_a,
            Endpoint::B => &self.to_b,
        }
    }

    pub(crate) fn try_recv(&self, at: Endpoint) -> Option<Bytes> {
        self.link(at).1.try_recv().ok()
    }
}

impl Channel for Loopback {
    fn send(&self, to: Endpoint, frame: &[u8]) {
        // Both halves live in `self`, so the link cannot be disconnected.
        let _ = self.link(to).0.send(Bytes::copy_from_slice(frame));
    }

    fn recv(&self, at: Endpoint) -> Option<Bytes> {
        self.link(at).1.recv().ok()
    }
}
