//! Error types for the codec layer.
//!
//! Framing errors describe malformed input on the wire: escape violations
//! and integrity failures inside an envelope, or a byte stream in which no
//! envelope boundary can be found within the buffering limit. All of them
//! are recovered locally — the decoder discards the offending bytes and
//! resynchronizes on the next plausible envelope start — and never
//! terminate an endpoint. Only I/O errors escalate to the endpoint's
//! lifecycle state machine.

use std::io;

use thiserror::Error;

use crate::frame::FrameError;

/// Wire-level errors occurring during envelope boundary detection and
/// body validation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// No envelope boundary found within the configured buffering limit.
    ///
    /// Raised when noise or garbage input accumulates without a terminator;
    /// the buffered bytes are discarded to bound memory growth.
    #[error("no frame boundary within {max} buffered bytes")]
    BufferOverflow {
        /// Configured buffering limit.
        max: usize,
    },

    /// A `DLE` escape was followed by a byte with no meaning in the
    /// envelope grammar.
    #[error("invalid escape sequence: DLE followed by {byte:#04x}")]
    InvalidEscape {
        /// Offending byte following the escape.
        byte: u8,
    },

    /// Envelope declares or carries a body exceeding the maximum frame size.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Body size observed or declared.
        size: usize,
        /// Maximum allowed body size.
        max: usize,
    },

    /// The envelope's body failed validation.
    ///
    /// This is the CAN29 integrity check: a body whose length field
    /// disagrees with its actual size, or one too short to carry the fixed
    /// header, is discarded in its entirety.
    #[error("invalid body: {0}")]
    InvalidBody(#[from] FrameError),
}

/// Top-level codec error.
///
/// Framing errors are recoverable: the malformed bytes have already been
/// consumed when the error is returned, so the caller may keep decoding
/// from the same buffer. I/O errors are not.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Malformed input on the wire.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Whether decoding may continue on the same stream after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool { matches!(self, Self::Framing(_)) }

    /// Error category for logging and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Io(_) => "io",
        }
    }
}

impl From<FrameError> for CodecError {
    fn from(err: FrameError) -> Self { Self::Framing(FramingError::InvalidBody(err)) }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e,
            CodecError::Framing(e) => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
