//! Property-based tests for the BPP wire format.
//!
//! Every block must round-trip at every value its bit widths allow, and
//! values that don't fit must be rejected rather than masked.

use bytes::{Buf, Bytes, BytesMut};
use bpp_transport::error::WireError;
use bpp_transport::wire::*;
use proptest::prelude::*;

fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![Just(Command::None), Just(Command::Wash), Just(Command::Drop)]
}

fn condition_strategy() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::Never),
        Just(Condition::Always),
        Just(Condition::LimitedFn),
    ]
}

fn nal_type_strategy() -> impl Strategy<Value = NalType> {
    prop_oneof![Just(NalType::NonVcl), Just(NalType::Vcl)]
}

prop_compose! {
    fn metadata_strategy(max_size: u16)(
        nal_count in 0u8..32,
        nal_no in 0u16..4096,
        frag_no in 0u8..32,
        content_size in 0u16..=max_size,
        significance in 0u8..16,
        dropped in any::<bool>(),
        last_fragment in any::<bool>(),
        nal_type in nal_type_strategy(),
    ) -> MetadataBlock {
        MetadataBlock {
            nal_count,
            nal_no,
            frag_no,
            content_size,
            significance,
            dropped,
            last_fragment,
            nal_type,
        }
    }
}

// ─── Block Roundtrip ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn block_header_roundtrip(count in 0u8..32) {
        let header = BlockHeader::new(count);
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        prop_assert_eq!(buf.len(), BLOCK_HEADER_LEN);
        prop_assert_eq!(BlockHeader::decode(&mut buf.freeze()).unwrap(), header);
    }

    #[test]
    fn command_block_roundtrip(
        command in command_strategy(),
        condition in condition_strategy(),
        function in 0u16..0x4000,
        threshold in 0u8..16,
        sequence in any::<u32>(),
    ) {
        let block = CommandBlock { command, condition, function, threshold, sequence };
        let mut buf = BytesMut::new();
        block.encode(&mut buf).unwrap();
        prop_assert_eq!(buf.len(), COMMAND_BLOCK_LEN);
        prop_assert_eq!(CommandBlock::decode(&mut buf.freeze()).unwrap(), block);
    }

    #[test]
    fn metadata_block_roundtrip(block in metadata_strategy(MAX_CONTENT_SIZE as u16)) {
        let mut buf = BytesMut::new();
        block.encode(&mut buf).unwrap();
        prop_assert_eq!(buf.len(), METADATA_BLOCK_LEN);
        prop_assert_eq!(MetadataBlock::decode(&mut buf.freeze()).unwrap(), block);
    }

    #[test]
    fn blocks_decode_back_to_back(
        a in metadata_strategy(100),
        b in metadata_strategy(100),
    ) {
        let mut buf = BytesMut::new();
        a.encode(&mut buf).unwrap();
        b.encode(&mut buf).unwrap();
        let mut readable = buf.freeze();
        prop_assert_eq!(MetadataBlock::decode(&mut readable).unwrap(), a);
        prop_assert_eq!(MetadataBlock::decode(&mut readable).unwrap(), b);
        prop_assert_eq!(readable.remaining(), 0);
    }
}

// ─── Overflow Rejection ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn oversized_nal_no_rejected(nal_no in 4096u16..=u16::MAX) {
        let block = MetadataBlock {
            nal_count: 1,
            nal_no,
            frag_no: 1,
            content_size: 0,
            significance: 0,
            dropped: false,
            last_fragment: false,
            nal_type: NalType::Vcl,
        };
        let is_overflow = matches!(
            block.encode(&mut BytesMut::new()),
            Err(WireError::FieldOverflow { field: "nal_no", .. })
        );
        prop_assert!(is_overflow);
    }

    #[test]
    fn oversized_function_rejected(function in 0x4000u16..=u16::MAX) {
        let mut block = CommandBlock::forward(0);
        block.function = function;
        prop_assert!(block.encode(&mut BytesMut::new()).is_err());
    }

    #[test]
    fn oversized_significance_rejected(significance in 16u8..=u8::MAX) {
        let block = MetadataBlock {
            nal_count: 1,
            nal_no: 0,
            frag_no: 1,
            content_size: 0,
            significance,
            dropped: false,
            last_fragment: false,
            nal_type: NalType::Vcl,
        };
        prop_assert!(block.encode(&mut BytesMut::new()).is_err());
    }
}

// ─── Full Packet ─────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn packet_roundtrip(
        metadata in prop::collection::vec(metadata_strategy(300), 0..=MAX_CHUNK_COUNT),
        sequence in any::<u32>(),
        threshold in 0u8..16,
    ) {
        let total: usize = metadata.iter().map(|m| m.content_size as usize).sum();
        let payload = Bytes::from((0..total).map(|i| (i % 253) as u8).collect::<Vec<_>>());
        let command = CommandBlock::wash(Condition::Always, threshold, BppFunction::None, sequence);
        let pkt = Packet::new(command, metadata.clone(), payload).unwrap();

        let encoded = pkt.encode().unwrap();
        prop_assert_eq!(encoded.len(), packet_overhead(metadata.len()) + total);

        let decoded = Packet::decode(&mut encoded.freeze()).unwrap();
        prop_assert_eq!(&decoded, &pkt);
        let sizes: Vec<usize> = decoded.contents().map(|(_, b)| b.len()).collect();
        let expected: Vec<usize> = metadata.iter().map(|m| m.content_size as usize).collect();
        prop_assert_eq!(sizes, expected);
    }

    #[test]
    fn truncated_packet_never_panics(cut in 0usize..64) {
        let meta = MetadataBlock {
            nal_count: 1,
            nal_no: 1,
            frag_no: 1,
            content_size: 40,
            significance: 3,
            dropped: false,
            last_fragment: true,
            nal_type: NalType::Vcl,
        };
        let pkt = Packet::new(CommandBlock::forward(1), vec![meta], Bytes::from(vec![7u8; 40])).unwrap();
        let encoded = pkt.encode().unwrap().freeze();
        let cut = cut.min(encoded.len() - 1);
        prop_assert!(Packet::decode(&mut encoded.slice(..cut)).is_err());
    }
}

#[test]
fn boundary_values_roundtrip() {
    let metadata: Vec<MetadataBlock> = (0..MAX_CHUNK_COUNT)
        .map(|_| MetadataBlock {
            nal_count: 31,
            nal_no: 4095,
            frag_no: 31,
            content_size: 1,
            significance: 15,
            dropped: false,
            last_fragment: true,
            nal_type: NalType::Vcl,
        })
        .collect();
    let command = CommandBlock {
        command: Command::Wash,
        condition: Condition::LimitedFn,
        function: 0x3FFF,
        threshold: 15,
        sequence: u32::MAX,
    };
    let pkt = Packet::new(command, metadata, Bytes::from(vec![1u8; MAX_CHUNK_COUNT])).unwrap();
    assert_eq!(pkt.header.chunk_count, 31);

    let decoded = Packet::decode(&mut pkt.encode().unwrap().freeze()).unwrap();
    assert_eq!(decoded, pkt);
    assert_eq!(decoded.command.function, 0x3FFF);
}
