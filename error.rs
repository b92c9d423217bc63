use thiserror::Error;

use crate::wire::WireErrorCode;

/// Failure observed by an outbound call, either returned synchronously by
/// `call_method` (before the call is registered) or delivered to its
/// completion callback (after).
#[derive(Debug, Error)]
pub enum CallError {
    /// No live transport; the call was never registered
    #[error("transport is not connected")]
    NotConnected,

    /// The channel was torn down before a response arrived
    #[error("channel closed before a response arrived")]
    ChannelClosed,

    /// A payload failed to (de)serialize against the expected message shape
    #[error("payload did not match the expected shape: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The request envelope could not be encoded for the wire
    #[error("could not encode request envelope: {0}")]
    Encode(#[from] CodecError),

    /// The peer answered with an ERROR envelope
    #[error("remote error ({code:?}): {message}")]
    Remote {
        code: WireErrorCode,
        message: String,
    },
}

/// Failure while framing envelopes onto or off the byte stream
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("invalid envelope encoding: {0}")]
    Envelope(#[from] serde_json::Error),
}
