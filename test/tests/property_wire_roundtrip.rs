/// Wire-format properties: every encode must decode back to itself, and
/// batch bytes must be a pure function of their inputs.
use proptest::prelude::*;

use weft_serde::{ByteReader, ByteWriter};
use weft_shared::{BatchKind, MessageHeader, RecordBatch, RefId, StreamMessage, SyncMessage};

proptest! {
    #[test]
    fn varint_round_trip(value in any::<u64>()) {
        let mut writer = ByteWriter::new();
        writer.write_var_u64(value);
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        prop_assert_eq!(reader.read_var_u64().unwrap(), value);
        prop_assert!(reader.is_empty());
    }

    #[test]
    fn string_round_trip(value in ".*") {
        let mut writer = ByteWriter::new();
        writer.write_string(&value);
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        prop_assert_eq!(reader.read_string().unwrap(), value);
    }

    #[test]
    fn stream_message_round_trip(
        user in any::<u64>(),
        state_version in any::<u64>(),
        time in any::<f64>().prop_filter("finite", |t| t.is_finite()),
        group in any::<u16>(),
        is_async in any::<bool>(),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let message = StreamMessage {
            user: RefId::from_raw(user),
            state_version,
            time,
            group,
            is_async,
            payload,
        };
        let bytes = message.encode();
        match SyncMessage::decode(&bytes).unwrap() {
            SyncMessage::Stream(decoded) => prop_assert_eq!(decoded, message),
            _ => prop_assert!(false, "decoded to the wrong kind"),
        }
    }

    #[test]
    fn record_batch_round_trip(
        state_version in any::<u64>(),
        sync_tick in any::<u64>(),
        records in proptest::collection::btree_map(
            any::<u64>(),
            proptest::collection::vec(any::<u8>(), 0..64),
            0..16,
        ),
    ) {
        let header = MessageHeader {
            state_version,
            sync_tick,
            wall_time: 0.25,
            sender_user: None,
        };
        let mut batch = RecordBatch::new(BatchKind::Delta, header);
        for (raw_id, payload) in &records {
            let target = RefId::from_raw(*raw_id);
            batch.begin_record(target).unwrap().write_bytes(payload);
            batch.finish_record(target).unwrap();
        }

        let bytes = batch.encode();
        // determinism: re-encoding yields identical bytes
        prop_assert_eq!(&bytes, &batch.encode());

        let mut reader = ByteReader::new(&bytes[1..]);
        let decoded = RecordBatch::decode(BatchKind::Delta, &mut reader).unwrap();
        prop_assert_eq!(decoded.header.state_version, state_version);
        prop_assert_eq!(decoded.header.sync_tick, sync_tick);
        prop_assert_eq!(decoded.records.len(), records.len());
        for (record, (raw_id, payload)) in decoded.records.iter().zip(records.iter()) {
            prop_assert_eq!(record.target_id.raw(), *raw_id);
            prop_assert_eq!(decoded.record_payload(record), &payload[..]);
        }
    }
}
