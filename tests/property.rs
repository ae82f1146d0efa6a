//! Property-based tests for framing, reassembly and splitting.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rswc::codec::FrameCodec;
use rswc::config::Limits;
use rswc::protocol::{FragmentAssembler, Frame, FrameHeader, FrameValidator, OpCode, apply_mask};
use rswc::{Error, MessageKind, OutgoingFrameSplitter, Role};

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Text), Just(OpCode::Binary), Just(OpCode::Continuation)]
}

fn kind_strategy() -> impl Strategy<Value = MessageKind> {
    prop_oneof![Just(MessageKind::Text), Just(MessageKind::Binary)]
}

fn server_codec() -> FrameCodec {
    FrameCodec::new(FrameValidator::new(Role::Server, 1 << 20))
}

proptest! {
    // =========================================================================
    // Decoding is resumable: any chunking of the input yields the same frame
    // =========================================================================
    #[test]
    fn test_decode_survives_arbitrary_chunking(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..70_000),
        chunk in 1usize..4096,
    ) {
        let frame = Frame::new(fin, opcode, payload.clone());
        let mut wire = BytesMut::new();
        FrameCodec::client(1 << 20).encode(&frame, &mut wire).unwrap();

        let codec = server_codec();
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for piece in wire.chunks(chunk) {
            prop_assert!(decoded.is_none(), "frame completed before all bytes arrived");
            buf.extend_from_slice(piece);
            decoded = codec.decode(&mut buf).unwrap();
        }
        let decoded = decoded.expect("frame never completed");
        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded.fin, fin);
        prop_assert_eq!(decoded.opcode, opcode);
        prop_assert!(decoded.masked);
        prop_assert_eq!(decoded.payload(), &payload[..]);
    }

    // =========================================================================
    // Oversized frames are refused from the header alone
    // =========================================================================
    #[test]
    fn test_oversize_rejected_before_payload(
        max in 1usize..1000,
        extra in 1usize..1000,
    ) {
        let frame = Frame::binary(vec![0u8; max + extra]);
        let mut wire = BytesMut::new();
        frame.encode(&mut wire, None);
        let header_len = FrameHeader::parse(&wire).unwrap().unwrap().header_len;

        let mut head_only = BytesMut::from(&wire[..header_len]);
        let result = Frame::decode(&mut head_only, max);
        let rejected = matches!(result, Err(Error::FrameTooLarge { .. }));
        prop_assert!(rejected);
    }

    // =========================================================================
    // Header parsing never panics on garbage
    // =========================================================================
    #[test]
    fn test_header_parse_total(bytes in prop::collection::vec(any::<u8>(), 0..20)) {
        let _ = FrameHeader::parse(&bytes);
    }

    #[test]
    fn test_mask_is_involution(
        data in prop::collection::vec(any::<u8>(), 0..300),
        key in any::<[u8; 4]>(),
    ) {
        let mut work = data.clone();
        apply_mask(&mut work, key);
        apply_mask(&mut work, key);
        prop_assert_eq!(work, data);
    }

    // =========================================================================
    // Reassembly concatenates fragments in order
    // =========================================================================
    #[test]
    fn test_assembler_concatenates(
        kind in kind_strategy(),
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..20),
    ) {
        let mut assembler = FragmentAssembler::new(&Limits::default());
        let last = chunks.len() - 1;
        let mut result = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let opcode = if i == 0 { kind.opcode() } else { OpCode::Continuation };
            let out = assembler.push(Frame::new(i == last, opcode, chunk.clone())).unwrap();
            if i < last {
                prop_assert!(out.is_none());
                // control frames may arrive mid-message without disturbing it
                let ping = assembler.push(Frame::ping("x")).unwrap();
                prop_assert!(ping.is_none());
            }
            result = out;
        }
        let message = result.expect("final fragment completes the message");
        prop_assert_eq!(message.kind, kind);
        prop_assert_eq!(&message.payload[..], &chunks.concat()[..]);
        prop_assert!(assembler.in_progress().is_none());
    }

    #[test]
    fn test_interleaved_data_frame_rejected(
        first in kind_strategy(),
        second in kind_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..50),
    ) {
        let mut assembler = FragmentAssembler::new(&Limits::default());
        assembler.push(Frame::new(false, first.opcode(), payload.clone())).unwrap();
        let err = assembler.push(Frame::new(true, second.opcode(), payload)).unwrap_err();
        let violation = matches!(err, Error::ProtocolViolation(_));
        prop_assert!(violation);
        prop_assert!(assembler.in_progress().is_none());
        prop_assert_eq!(assembler.buffered(), 0);
    }

    // =========================================================================
    // Splitting respects the size bound and loses nothing
    // =========================================================================
    #[test]
    fn test_splitter_bounds_and_concatenation(
        kind in kind_strategy(),
        len in 0usize..20_000,
        max in 1usize..5_000,
    ) {
        let payload: Bytes = (0..len).map(|i| (i % 253) as u8).collect::<Vec<_>>().into();
        let splitter = OutgoingFrameSplitter::new(max, true);
        let frames = splitter.split_message(kind, payload.clone()).unwrap();

        let expected = len.div_ceil(max).max(1);
        prop_assert_eq!(frames.len(), expected);
        prop_assert_eq!(frames[0].opcode, kind.opcode());
        for (i, frame) in frames.iter().enumerate() {
            prop_assert!(frame.payload.len() <= max);
            prop_assert_eq!(frame.fin, i == frames.len() - 1);
            if i > 0 {
                prop_assert_eq!(frame.opcode, OpCode::Continuation);
            }
        }
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload.iter().copied()).collect();
        prop_assert_eq!(&joined[..], &payload[..]);
    }

    #[test]
    fn test_splitter_refuses_oversize_when_disabled(
        max in 1usize..1000,
        extra in 1usize..1000,
    ) {
        let splitter = OutgoingFrameSplitter::new(max, false);
        let err = splitter
            .split_message(MessageKind::Binary, Bytes::from(vec![0u8; max + extra]))
            .unwrap_err();
        prop_assert_eq!(err.category(), rswc::ErrorCategory::Capacity);
    }
}

#[test]
fn test_split_fragments_feed_the_assembler() {
    let payload = Bytes::from(vec![7u8; 67_933]);
    let frames = OutgoingFrameSplitter::new(4096, true)
        .split_message(MessageKind::Binary, payload.clone())
        .unwrap();
    assert_eq!(frames.len(), 17);

    let mut assembler = FragmentAssembler::new(&Limits::default());
    let mut message = None;
    for frame in frames {
        message = assembler.push(frame).unwrap();
    }
    assert_eq!(message.unwrap().payload, payload);
}
