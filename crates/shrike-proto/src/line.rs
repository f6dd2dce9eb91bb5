//! Line-based codec for tokio.
//!
//! Reads newline-terminated lines, decoding bytes as UTF-8 with lossy
//! substitution (servers occasionally relay other encodings; a client drops
//! bad sequences rather than the connection).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error;

/// Line-based codec that handles newline-terminated messages.
///
/// By default, lines are limited to 512 bytes (IRC standard).
pub struct LineCodec {
    /// Index of next byte to check for newline
    next_index: usize,
    /// Maximum line length
    max_len: usize,
}

impl LineCodec {
    /// Create a new codec with the default 512-byte line limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_index: 0,
            max_len: 512,
        }
    }

    /// Create a new codec with custom max line length.
    #[must_use]
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = error::ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<String>> {
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            // Found a line - extract it
            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if line.len() > self.max_len {
                return Err(error::ProtocolError::MessageTooLong {
                    actual: line.len(),
                    limit: self.max_len,
                });
            }

            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        } else {
            // No complete line yet - remember where we stopped
            self.next_index = src.len();

            // Check if partial line already exceeds limit
            if src.len() > self.max_len {
                return Err(error::ProtocolError::MessageTooLong {
                    actual: src.len(),
                    limit: self.max_len,
                });
            }

            Ok(None)
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = error::ProtocolError;

    fn encode(&mut self, msg: String, dst: &mut BytesMut) -> error::Result<()> {
        dst.extend(msg.into_bytes());
        Ok(())
    }
}
