use bytes::Bytes;

/// What the application hands to the sender and gets back from the receiver.
///
/// `End` is the out-of-band end-of-communication sentinel; it travels as the
/// sequence-0 packet and is never confused with message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Data(Bytes),
    End,
}

impl Message {
    pub fn is_end(&self) -> bool {
        matches!(self, Message::End)
    }

    pub fn into_data(self) -> Option<Bytes> {
        match self {
            Message::Data(bytes) => Some(bytes),
            Message::End => None,
        }
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::Data(bytes.into())
    }
}

impl From<&'static [u8]> for Message {
    fn from(bytes: &'static [u8]) -> Self {
        Message::Data(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Message {
    fn from(text: &'static str) -> Self {
        Message::Data(Bytes::from_static(text.as_bytes()))
    }
}
