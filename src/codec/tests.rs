//! Unit tests for the serial and network envelope codecs.
//!
//! Cover incremental decoding, escape handling, resynchronization after
//! malformed envelopes, buffering limits, and the encode/decode round-trip
//! law for both envelopes.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;
use crate::frame::FrameError;

fn frame_with_data(data: &'static [u8]) -> Frame {
    Frame {
        dst: 0x19,
        src: 0x11,
        cmd_class: 0x18,
        cmd_number: 0x01,
        proc_id: 0x23,
        sub_id: 0x02,
        data: Bytes::from_static(data),
    }
}

fn encode_serial(frame: &Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    SerialCodec::default()
        .encode(frame.clone(), &mut buf)
        .expect("encode should succeed");
    buf
}

#[rstest]
#[case::empty(&[])]
#[case::plain(&[0x01, 0x42])]
#[case::needs_escaping(&[0x10, 0x0D, 0x10, 0x10])]
fn serial_round_trip(#[case] data: &'static [u8]) {
    let frame = frame_with_data(data);
    let mut buf = encode_serial(&frame);

    let decoded = SerialCodec::default()
        .decode(&mut buf)
        .expect("decode should succeed")
        .expect("expected a frame");
    assert_eq!(decoded, frame);
    assert!(buf.is_empty(), "all envelope bytes must be consumed");
}

#[test]
fn serial_envelope_escapes_dle_and_cr() {
    let frame = frame_with_data(&[0x10, 0x0D]);
    let buf = encode_serial(&frame);

    // DLE STX, 7 header bytes (none need escaping here), two escaped data
    // bytes, DLE ETX.
    assert_eq!(buf.len(), 2 + 7 + 4 + 2);
    assert_eq!(&buf[..2], &[DLE, STX]);
    assert_eq!(&buf[buf.len() - 2..], &[DLE, ETX]);
    assert_eq!(&buf[9..13], &[DLE, 0x10, DLE, 0x0D]);
}

#[test]
fn serial_decode_is_incremental() {
    let frame = frame_with_data(&[0xAA]);
    let encoded = encode_serial(&frame);

    let mut codec = SerialCodec::default();
    let mut buf = BytesMut::new();
    for (i, &byte) in encoded.iter().enumerate() {
        buf.extend_from_slice(&[byte]);
        let result = codec.decode(&mut buf).expect("decode should succeed");
        if i + 1 < encoded.len() {
            assert!(result.is_none(), "no frame before byte {}", i + 1);
        } else {
            assert_eq!(result, Some(frame.clone()));
        }
    }
}

#[test]
fn serial_decode_skips_leading_noise() {
    let frame = frame_with_data(&[]);
    let mut buf = BytesMut::from(&[0x00, 0xFF, 0x03][..]);
    buf.extend_from_slice(&encode_serial(&frame));

    let decoded = SerialCodec::default()
        .decode(&mut buf)
        .expect("decode should succeed");
    assert_eq!(decoded, Some(frame));
}

#[test]
fn serial_decode_recovers_after_corrupt_envelope() {
    let good = frame_with_data(&[0x07]);

    // First envelope carries a body whose length field is inflated.
    let mut corrupt = frame_with_data(&[]);
    corrupt.data = Bytes::from_static(&[0x01]);
    let mut body = BytesMut::new();
    corrupt.write_body(&mut body);
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[DLE, STX]);
    buf.extend_from_slice(&body[..body.len() - 1]);
    buf.extend_from_slice(&[DLE, ETX]);
    buf.extend_from_slice(&encode_serial(&good));

    let mut codec = SerialCodec::default();
    let err = codec
        .decode(&mut buf)
        .expect_err("corrupt envelope must fail");
    assert!(err.is_recoverable(), "framing faults are recoverable");
    assert!(matches!(
        err,
        CodecError::Framing(FramingError::InvalidBody(FrameError::LengthMismatch { .. }))
    ));

    // The decoder consumed exactly the corrupt envelope; the next call
    // yields the valid frame.
    let decoded = codec.decode(&mut buf).expect("decode should succeed");
    assert_eq!(decoded, Some(good));
}

#[test]
fn serial_decode_rejects_invalid_escape() {
    let mut buf = BytesMut::from(&[DLE, STX, 0x19, 0x11, DLE, 0x7F][..]);
    let err = SerialCodec::default()
        .decode(&mut buf)
        .expect_err("invalid escape must fail");
    assert!(matches!(
        err,
        CodecError::Framing(FramingError::InvalidEscape { byte: 0x7F })
    ));
}

#[test]
fn serial_decode_restarts_on_nested_start_marker() {
    let frame = frame_with_data(&[0x55]);
    let mut buf = BytesMut::from(&[DLE, STX, 0x19, 0x11][..]);
    buf.extend_from_slice(&encode_serial(&frame));

    let decoded = SerialCodec::default()
        .decode(&mut buf)
        .expect("decode should succeed");
    assert_eq!(decoded, Some(frame));
}

#[test]
fn serial_decode_enforces_buffering_limit() {
    let mut codec = SerialCodec::new(0);
    let limit = codec.max_buffered();

    let mut buf = BytesMut::from(&[DLE, STX][..]);
    buf.extend_from_slice(&vec![0x41; limit + 1]);
    let err = codec.decode(&mut buf).expect_err("overflow must fail");
    assert!(matches!(
        err,
        CodecError::Framing(FramingError::BufferOverflow { .. })
    ));
    assert!(buf.is_empty(), "overflowed buffer must be discarded");
}

#[test]
fn serial_decode_keeps_trailing_dle_while_waiting() {
    let mut codec = SerialCodec::default();
    let mut buf = BytesMut::from(&[0x00, 0x01, DLE][..]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());
    assert_eq!(buf.as_ref(), &[DLE], "lone DLE may start the next frame");

    let frame = frame_with_data(&[]);
    let encoded = encode_serial(&frame);
    buf.extend_from_slice(&encoded[1..]);
    let decoded = codec.decode(&mut buf).expect("decode should succeed");
    assert_eq!(decoded, Some(frame));
}

#[rstest]
#[case::empty(&[])]
#[case::plain(&[0x10, 0x0D, 0x42])]
fn net_round_trip(#[case] data: &'static [u8]) {
    let frame = frame_with_data(data);
    let mut codec = NetCodec;
    let mut buf = BytesMut::new();
    codec
        .encode(frame.clone(), &mut buf)
        .expect("encode should succeed");
    assert_eq!(buf.len(), NET_HEADER_LEN + frame.body_len());

    let decoded = codec.decode(&mut buf).expect("decode should succeed");
    assert_eq!(decoded, Some(frame));
    assert!(buf.is_empty());
}

#[test]
fn net_decode_waits_for_full_body() {
    let frame = frame_with_data(&[0x01, 0x02]);
    let mut codec = NetCodec;
    let mut buf = BytesMut::new();
    codec
        .encode(frame.clone(), &mut buf)
        .expect("encode should succeed");

    let mut partial = buf.split_to(buf.len() - 1);
    assert!(codec.decode(&mut partial).expect("decode").is_none());
    partial.unsplit(buf);
    assert_eq!(codec.decode(&mut partial).expect("decode"), Some(frame));
}

#[test]
fn net_decode_rejects_oversized_prefix() {
    let mut buf = BytesMut::from(&u16::MAX.to_be_bytes()[..]);
    buf.extend_from_slice(&[0x00; 8]);
    let err = NetCodec
        .decode(&mut buf)
        .expect_err("oversized prefix must fail");
    assert!(matches!(
        err,
        CodecError::Framing(FramingError::OversizedFrame { .. })
    ));
    assert!(buf.is_empty());
}

proptest! {
    // Round-trip law: decode(encode(F)) == F for any well-formed frame, on
    // both envelopes.
    #[test]
    fn round_trip_law(
        dst in any::<u8>(),
        src in any::<u8>(),
        cmd_class in any::<u8>(),
        cmd_number in any::<u8>(),
        proc_id in any::<u8>(),
        sub_id in any::<u8>(),
        data in proptest::collection::vec(any::<u8>(), 0..=253),
    ) {
        let frame = Frame {
            dst,
            src,
            cmd_class,
            cmd_number,
            proc_id,
            sub_id,
            data: Bytes::from(data),
        };

        let mut serial = SerialCodec::default();
        let mut buf = BytesMut::new();
        serial.encode(frame.clone(), &mut buf).expect("serial encode");
        let decoded = serial.decode(&mut buf).expect("serial decode");
        prop_assert_eq!(decoded.as_ref(), Some(&frame));
        prop_assert!(buf.is_empty());

        let mut net = NetCodec;
        let mut buf = BytesMut::new();
        net.encode(frame.clone(), &mut buf).expect("net encode");
        let decoded = net.decode(&mut buf).expect("net decode");
        prop_assert_eq!(decoded, Some(frame));
        prop_assert!(buf.is_empty());
    }
}
