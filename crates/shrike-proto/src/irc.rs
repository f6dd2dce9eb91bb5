//! IRC message codec for tokio.
//!
//! Wraps [`LineCodec`] and parses lines into [`Message`] values, encoding
//! outbound messages with validation so nothing malformed reaches the wire.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error;
use crate::line::LineCodec;
use crate::message::Message;

/// Tokio codec for encoding/decoding IRC messages.
pub struct IrcCodec {
    inner: LineCodec,
}

impl IrcCodec {
    /// Create a new codec with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LineCodec::new(),
        }
    }

    /// Create a new codec with custom max line length.
    #[must_use]
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            inner: LineCodec::with_max_len(max_len),
        }
    }
}

impl Default for IrcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = error::ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<Message>> {
        self.inner
            .decode(src)
            .and_then(|res| res.map_or(Ok(None), |line| Message::parse(&line).map(Some)))
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = error::ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> error::Result<()> {
        let mut line = msg.to_line().map_err(|cause| {
            error::ProtocolError::InvalidMessage {
                string: msg.to_string(),
                cause,
            }
        })?;
        line.push_str("\r\n");
        self.inner.encode(line, dst)
    }
}
