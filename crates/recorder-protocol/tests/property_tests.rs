//! Property-based tests for framing and the stream parser.

use proptest::prelude::*;
use recorder_protocol::frame::{self, CrcMode, FrameError};
use recorder_protocol::{Document, DocumentCodec, EbmlCodec, FrameParser};

/// Payloads biased towards the control bytes.
fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(
        prop_oneof![
            3 => any::<u8>(),
            1 => Just(0x7Eu8),
            1 => Just(0x7Du8),
        ],
        0..300,
    )
}

proptest! {
    #[test]
    fn prop_frame_round_trip(data in payload()) {
        let framed = frame::encode(&data);
        prop_assert_eq!(frame::decode(&framed).unwrap(), data);
    }

    #[test]
    fn prop_encoded_body_has_no_break(data in payload()) {
        let framed = frame::encode(&data);
        let body = &framed[1..framed.len() - 1];
        prop_assert!(!body.contains(&0x7E));
    }

    /// Flipping one bit of the body is always detected, as long as the flip
    /// does not create or destroy a control byte (which changes the framing
    /// rather than the data).
    #[test]
    fn prop_single_bit_flip_is_checksum_error(
        data in payload(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut framed = frame::encode(&data);
        let body_len = framed.len() - 2;
        let at = 1 + position.index(body_len);
        let original = framed[at];
        let flipped = original ^ (1 << bit);
        prop_assume!(original != 0x7D);
        prop_assume!(flipped != 0x7E && flipped != 0x7D);

        framed[at] = flipped;
        let result = frame::decode(&framed);
        let is_checksum = matches!(result, Err(FrameError::Checksum { .. }));
        prop_assert!(is_checksum);
    }

    #[test]
    fn prop_parser_handles_any_chunking(
        payloads in prop::collection::vec(payload(), 1..6),
        chunk in 1usize..40,
    ) {
        let stream: Vec<u8> = payloads.iter().flat_map(|p| frame::encode(p)).collect();
        let mut parser = FrameParser::new();
        for piece in stream.chunks(chunk) {
            parser.feed(piece);
        }

        let decoded: Vec<Vec<u8>> = parser
            .drain()
            .map(|body| frame::decode_body(&body, CrcMode::Verify).unwrap())
            .collect();
        prop_assert_eq!(decoded, payloads);
    }

    #[test]
    fn prop_ping_document_round_trip(
        data in prop::collection::vec(any::<u8>(), 0..100),
        index in any::<u16>(),
    ) {
        let codec = EbmlCodec::command_response();
        let document = Document::new().with(
            "EBMLCommand",
            Document::new()
                .with("SendPing", data)
                .with("CommandIdx", u64::from(index)),
        );
        let bytes = codec.serialize(&document).unwrap();
        prop_assert_eq!(codec.deserialize(&bytes).unwrap(), document);
    }
}
