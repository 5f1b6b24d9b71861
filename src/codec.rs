//! Envelope codecs for the two sides of the bridge.
//!
//! Both endpoints carry identical CAN29 message bodies but wrap them
//! differently: the serial side uses the DLE escape envelope
//! (`0x10 0x02 … 0x10 0x03`, with `0x10` and `0x0D` body bytes escaped by a
//! preceding `0x10`), while the CAN server side prefixes the unescaped body
//! with a big-endian `u16` length. Each codec implements `tokio_util`'s
//! [`Decoder`] and [`Encoder`] with [`Frame`] as the item type so the
//! endpoint read/write loops are symmetric.
//!
//! # Error Handling
//!
//! Decoders support incremental feeding: `decode` retains only the
//! unconsumed tail between calls and returns `Ok(None)` until a complete
//! envelope is buffered. A malformed envelope is consumed in its entirety
//! before the error is returned, so callers resume decoding on the same
//! buffer — framing faults never poison the stream. A configurable
//! buffering limit bounds memory growth when no boundary can be found in
//! noise input.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub mod error;

pub use error::{CodecError, FramingError};

use crate::frame::{CR, DLE, ETX, Frame, STX};

/// Largest body a CAN29 length field can describe: the five fixed header
/// bytes plus 255 counted bytes.
pub const MAX_BODY_LEN: usize = 5 + 255;

/// Default buffering limit for the serial decoder.
///
/// Generous relative to the worst-case escaped envelope (`2 * body + 4`
/// bytes) so bursts of back-to-back messages never trip it, while still
/// bounding growth on garbage input.
pub const DEFAULT_MAX_BUFFERED: usize = 4096;

/// Codec for the serial side's DLE escape envelope.
#[derive(Clone, Debug)]
pub struct SerialCodec {
    max_buffered: usize,
}

impl SerialCodec {
    /// Construct a codec with the given buffering limit.
    ///
    /// The limit is raised to at least one worst-case envelope so a single
    /// maximum-size message can always be decoded.
    #[must_use]
    pub fn new(max_buffered: usize) -> Self {
        Self {
            max_buffered: max_buffered.max(2 * MAX_BODY_LEN + 4),
        }
    }

    /// Buffering limit enforced by this codec.
    #[must_use]
    pub fn max_buffered(&self) -> usize { self.max_buffered }

    /// Guard the buffered tail against unbounded growth.
    ///
    /// Called whenever an envelope is still incomplete; clears the buffer
    /// and reports the overflow once the limit is exceeded.
    fn check_buffered(&self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() > self.max_buffered {
            src.clear();
            return Err(FramingError::BufferOverflow {
                max: self.max_buffered,
            }
            .into());
        }
        Ok(None)
    }
}

impl Default for SerialCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_BUFFERED) }
}

/// Locate the first `DLE STX` start marker in `src`.
fn find_start(src: &[u8]) -> Option<usize> { src.windows(2).position(|w| w == [DLE, STX]) }

impl Decoder for SerialCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        'resync: loop {
            // Align on an envelope start, discarding noise. A trailing lone
            // DLE is kept: it may be the first half of a start marker.
            match find_start(src) {
                Some(start) => {
                    if start > 0 {
                        tracing::debug!(discarded = start, "skipping noise before frame start");
                        src.advance(start);
                    }
                }
                None => {
                    let keep = usize::from(src.last() == Some(&DLE));
                    let discard = src.len() - keep;
                    if discard > 0 {
                        tracing::debug!(discarded = discard, "no frame start in buffer");
                        src.advance(discard);
                    }
                    return Ok(None);
                }
            }

            // Unescape the body while scanning for the terminator.
            let mut body = Vec::new();
            let mut i = 2;
            loop {
                let Some(&byte) = src.get(i) else {
                    return self.check_buffered(src);
                };
                if byte != DLE {
                    body.push(byte);
                    i += 1;
                    continue;
                }
                let Some(&next) = src.get(i + 1) else {
                    return self.check_buffered(src);
                };
                match next {
                    ETX => {
                        src.advance(i + 2);
                        return Ok(Some(Frame::parse(&body)?));
                    }
                    // A fresh start marker aborts the half-received
                    // envelope; restart collection there.
                    STX => {
                        tracing::debug!(discarded = i, "envelope aborted by new start marker");
                        src.advance(i);
                        continue 'resync;
                    }
                    DLE | CR => {
                        body.push(next);
                        i += 2;
                    }
                    other => {
                        src.advance(i + 2);
                        return Err(FramingError::InvalidEscape { byte: other }.into());
                    }
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame = self.decode(src)?;
        if frame.is_none() && !src.is_empty() {
            tracing::debug!(remaining = src.len(), "partial envelope discarded at EOF");
            src.clear();
        }
        Ok(frame)
    }
}

impl Encoder<Frame> for SerialCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.body_len() > MAX_BODY_LEN {
            return Err(FramingError::OversizedFrame {
                size: item.body_len(),
                max: MAX_BODY_LEN,
            }
            .into());
        }
        let mut body = BytesMut::with_capacity(item.body_len());
        item.write_body(&mut body);

        dst.reserve(2 * body.len() + 4);
        dst.extend_from_slice(&[DLE, STX]);
        for &byte in body.iter() {
            if byte == DLE || byte == CR {
                dst.extend_from_slice(&[DLE, byte]);
            } else {
                dst.extend_from_slice(&[byte]);
            }
        }
        dst.extend_from_slice(&[DLE, ETX]);
        Ok(())
    }
}

/// Length prefix size used by the CAN server envelope.
pub const NET_HEADER_LEN: usize = 2;

/// Codec for the CAN server side's length-prefixed envelope.
#[derive(Clone, Debug, Default)]
pub struct NetCodec;

impl Decoder for NetCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = src.get(..NET_HEADER_LEN) else {
            return Ok(None);
        };
        let declared = usize::from(u16::from_be_bytes([header[0], header[1]]));
        if declared > MAX_BODY_LEN {
            // A corrupt length prefix leaves no reliable way to realign a
            // length-prefixed stream; drop the buffered bytes wholesale.
            src.clear();
            return Err(FramingError::OversizedFrame {
                size: declared,
                max: MAX_BODY_LEN,
            }
            .into());
        }
        if src.len() < NET_HEADER_LEN + declared {
            return Ok(None);
        }
        src.advance(NET_HEADER_LEN);
        let body = src.split_to(declared);
        Ok(Some(Frame::parse(&body)?))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame = self.decode(src)?;
        if frame.is_none() && !src.is_empty() {
            tracing::debug!(remaining = src.len(), "partial envelope discarded at EOF");
            src.clear();
        }
        Ok(frame)
    }
}

impl Encoder<Frame> for NetCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = item.body_len();
        if body_len > MAX_BODY_LEN {
            return Err(FramingError::OversizedFrame {
                size: body_len,
                max: MAX_BODY_LEN,
            }
            .into());
        }
        let prefix = u16::try_from(body_len).map_err(|_| FramingError::OversizedFrame {
            size: body_len,
            max: MAX_BODY_LEN,
        })?;
        dst.reserve(NET_HEADER_LEN + body_len);
        dst.extend_from_slice(&prefix.to_be_bytes());
        item.write_body(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
