//! CAN29 message model.
//!
//! A [`Frame`] is one decoded CAN29 message, independent of the envelope it
//! travelled in. The serial side wraps the same body in a DLE escape
//! envelope while the CAN server side carries it length-prefixed; both sides
//! share this representation and the [`codec`](crate::codec) layer handles
//! the envelopes.
//!
//! Body layout on the wire:
//!
//! ```text
//! byte 0   destination address
//! byte 1   source address
//! byte 2   length field (bytes following the command number)
//! byte 3   command class
//! byte 4   command number
//! byte 5   process id
//! byte 6   sub id
//! byte 7.. data
//! ```
//!
//! The length field is the message's integrity check: a body whose length
//! field disagrees with its actual size never yields a `Frame`.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Escape byte opening every serial envelope control sequence.
pub const DLE: u8 = 0x10;
/// Start-of-text marker following [`DLE`].
pub const STX: u8 = 0x02;
/// End-of-text marker following [`DLE`].
pub const ETX: u8 = 0x03;
/// Carriage return; escaped inside serial envelopes alongside [`DLE`].
pub const CR: u8 = 0x0D;

/// Fixed bytes preceding the length-counted region of a body.
///
/// The length field counts everything after the command number, so the
/// destination, source, length, class, and command bytes sit outside it.
pub const FIXED_HEADER_LEN: usize = 5;

/// Shortest valid body: fixed header plus process id and sub id.
pub const MIN_BODY_LEN: usize = FIXED_HEADER_LEN + 2;

/// Command class of an intermediate answer in a multi-answer series.
pub const CLASS_INTERMEDIATE_ANSWER: u8 = 0x05;
/// Command class of an unsolicited event notification.
pub const CLASS_EVENT: u8 = 0x07;
/// Command class of a direct answer.
pub const CLASS_DIRECT_ANSWER: u8 = 0x08;
/// Command class of the final answer in a multi-answer series.
pub const CLASS_FINAL_ANSWER: u8 = 0x09;

/// Errors raised while interpreting a message body.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Body shorter than the fixed header plus process and sub id.
    #[error("body too short: {len} bytes, need at least {MIN_BODY_LEN}")]
    TooShort {
        /// Bytes available.
        len: usize,
    },

    /// The length field disagrees with the body's actual size.
    #[error("length field mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        /// Value of the length field.
        declared: usize,
        /// Bytes actually following the command number.
        actual: usize,
    },
}

/// Classification of a frame derived from its command class.
///
/// CAN29 is self-describing: the command class alone determines whether a
/// message opens a transaction, answers one, or is an unsolicited push.
/// Classification never depends on which endpoint a frame arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Opens a new transaction (command classes `0x10..=0x1F`).
    Request,
    /// Partial answer in a multi-answer series; the transaction stays open.
    IntermediateAnswer,
    /// Direct or final answer; completes the transaction.
    FinalAnswer,
    /// Unsolicited event notification, not correlated to any request.
    Event,
    /// Command class outside the defined request/answer/event set.
    ///
    /// CAN29 reserves most of the class space. Traffic using a reserved
    /// class is passed through uncorrelated, like an event, so protocol
    /// extensions the bridge does not know survive it unharmed.
    Other,
}

/// Key matching an answer to the request that opened its transaction.
///
/// The key is orientation-normalized: a request from client `c` to device
/// `d` and the answer from `d` back to `c` derive the same key, so the
/// forwarding engine computes it identically on both legs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    /// Address of the side that opened the transaction.
    pub client: u8,
    /// Address of the side expected to answer.
    pub device: u8,
    /// Command number of the transaction.
    pub command: u8,
    /// Process id of the transaction.
    pub proc_id: u8,
    /// Sub id of the transaction.
    pub sub_id: u8,
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#04x}->{:#04x} cmd={:#04x} proc={:#04x} sub={:#04x}",
            self.client, self.device, self.command, self.proc_id, self.sub_id
        )
    }
}

/// One decoded CAN29 message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Destination address on the CAN bus.
    pub dst: u8,
    /// Source address on the CAN bus.
    pub src: u8,
    /// Command class; drives [`MessageKind`] classification.
    pub cmd_class: u8,
    /// Command number within the class.
    pub cmd_number: u8,
    /// Process id distinguishing transactions with the same command.
    pub proc_id: u8,
    /// Sub id qualifying the command.
    pub sub_id: u8,
    /// Trailing data bytes, possibly empty.
    pub data: Bytes,
}

impl Frame {
    /// Parse an unescaped message body.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] when fewer than [`MIN_BODY_LEN`]
    /// bytes are supplied and [`FrameError::LengthMismatch`] when the length
    /// field disagrees with the body's actual size.
    pub fn parse(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < MIN_BODY_LEN {
            return Err(FrameError::TooShort { len: body.len() });
        }
        let declared = usize::from(body[2]);
        let actual = body.len() - FIXED_HEADER_LEN;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        Ok(Self {
            dst: body[0],
            src: body[1],
            cmd_class: body[3],
            cmd_number: body[4],
            proc_id: body[5],
            sub_id: body[6],
            data: Bytes::copy_from_slice(&body[7..]),
        })
    }

    /// Total body length this frame serializes to.
    #[must_use]
    pub fn body_len(&self) -> usize { MIN_BODY_LEN + self.data.len() }

    /// Serialize the body, recomputing the length field.
    ///
    /// The caller-held frame is trusted for its fields but never for its
    /// length accounting; encoding always derives the length field from the
    /// actual data size.
    pub fn write_body(&self, dst: &mut BytesMut) {
        dst.reserve(self.body_len());
        dst.put_u8(self.dst);
        dst.put_u8(self.src);
        dst.put_u8(self.length_field());
        dst.put_u8(self.cmd_class);
        dst.put_u8(self.cmd_number);
        dst.put_u8(self.proc_id);
        dst.put_u8(self.sub_id);
        dst.extend_from_slice(&self.data);
    }

    /// Value of the length field: bytes following the command number.
    ///
    /// Payloads are bounded well below `u8::MAX` by the envelope's maximum
    /// frame size; oversized payloads are rejected by the encoder before
    /// this is consulted.
    #[must_use]
    pub fn length_field(&self) -> u8 {
        u8::try_from(2 + self.data.len()).unwrap_or(u8::MAX)
    }

    /// Classify this frame from its command class.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self.cmd_class {
            0x10..=0x1F => MessageKind::Request,
            CLASS_INTERMEDIATE_ANSWER => MessageKind::IntermediateAnswer,
            CLASS_EVENT => MessageKind::Event,
            CLASS_DIRECT_ANSWER | CLASS_FINAL_ANSWER => MessageKind::FinalAnswer,
            _ => MessageKind::Other,
        }
    }

    /// Derive the correlation key for this frame.
    ///
    /// Returns `None` for [`MessageKind::Event`] and [`MessageKind::Other`]
    /// frames, which carry no transaction to correlate.
    #[must_use]
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        let (client, device) = match self.kind() {
            MessageKind::Request => (self.src, self.dst),
            MessageKind::IntermediateAnswer | MessageKind::FinalAnswer => (self.dst, self.src),
            MessageKind::Event | MessageKind::Other => return None,
        };
        Some(CorrelationKey {
            client,
            device,
            command: self.cmd_number,
            proc_id: self.proc_id,
            sub_id: self.sub_id,
        })
    }
}
