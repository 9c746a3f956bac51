//! Property-based tests for the binary frame codec

use proptest::prelude::*;
use xfsync::shared::protocol::{decode_frame, encode_binary, split_binary, BINARY_HEADER_PREFIX_LEN};
use xfsync::shared::{DataType, Frame, TransData};

fn data_type() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::Resource),
        Just(DataType::Thumbnail),
        Just(DataType::DocUpload),
        Just(DataType::Op),
    ]
}

proptest! {
    #[test]
    fn test_split_binary_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        if let Ok((header, payload)) = split_binary(&data) {
            prop_assert_eq!(BINARY_HEADER_PREFIX_LEN + header.len() + payload.len(), data.len());
        }
    }

    #[test]
    fn test_binary_frame_keeps_header_and_payload(
        data_type in data_type(),
        data_id in "[a-z0-9]{1,12}",
        data in ".{0,40}",
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let header = TransData::new(data_type, data_id, data);
        let frame = encode_binary(&header, &payload).unwrap();
        let inbound = decode_frame(Frame::Binary(frame.into())).unwrap();

        prop_assert_eq!(inbound.envelope, header);
        let binary = inbound.binary.unwrap();
        prop_assert_eq!(binary.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected(extra in 1u32..1024, tail in proptest::collection::vec(any::<u8>(), 0..32)) {
        let declared = tail.len() as u32 + extra;
        let mut frame = declared.to_le_bytes().to_vec();
        frame.extend_from_slice(&tail);
        prop_assert!(split_binary(&frame).is_err());
    }
}
