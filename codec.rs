use crate::error::CodecError;
use crate::wire::WireEnvelope;

/// Largest frame body accepted or produced by the default codec
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encodes envelopes into wire frames and reassembles envelopes from a byte
/// stream.
///
/// Framing (length prefixes, buffering of partial frames) lives entirely
/// behind this trait; the channel only ever sees parsed envelopes.
pub trait WireCodec: Send {
    fn encode(&self, envelope: &WireEnvelope) -> Result<Vec<u8>, CodecError>;

    /// Feeds raw bytes from the stream and returns every envelope completed
    /// by them. Trailing partial frames stay buffered for the next call.
    fn decode(&mut self, bytes: &[u8]) -> Result<Vec<WireEnvelope>, CodecError>;
}

/// Default codec: a 4-byte big-endian length prefix followed by the
/// JSON-encoded envelope.
pub struct LengthPrefixJson {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl LengthPrefixJson {
    pub fn new() -> LengthPrefixJson {
        LengthPrefixJson::with_max_frame(DEFAULT_MAX_FRAME_LEN)
    }

    /// Codec that refuses frames with a body longer than `max_frame` bytes
    pub fn with_max_frame(max_frame: usize) -> LengthPrefixJson {
        LengthPrefixJson {
            buffer: Vec::new(),
            max_frame,
        }
    }
}

impl Default for LengthPrefixJson {
    fn default() -> LengthPrefixJson {
        LengthPrefixJson::new()
    }
}

impl WireCodec for LengthPrefixJson {
    fn encode(&self, envelope: &WireEnvelope) -> Result<Vec<u8>, CodecError> {
        let body = serde_json::to_vec(envelope)?;

        if body.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame,
            });
        }

        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<Vec<WireEnvelope>, CodecError> {
        self.buffer.extend_from_slice(bytes);

        let mut envelopes = Vec::new();
        loop {
            if self.buffer.len() < 4 {
                break;
            }

            let mut prefix = [0u8; 4];
            prefix.copy_from_slice(&self.buffer[..4]);
            let body_len = u32::from_be_bytes(prefix) as usize;

            if body_len > self.max_frame {
                return Err(CodecError::FrameTooLarge {
                    len: body_len,
                    max: self.max_frame,
                });
            }
            if self.buffer.len() < 4 + body_len {
                break;
            }

            let envelope = serde_json::from_slice(&self.buffer[4..4 + body_len])?;
            self.buffer.drain(..4 + body_len);
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}
