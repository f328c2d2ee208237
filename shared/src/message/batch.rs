use weft_serde::{ByteReader, ByteWriter};

use crate::{
    element::Validity,
    message::{MessageError, MessageHeader},
    ref_id::RefId,
    types::Tick,
};

/// The three message kinds sharing the binary-batch shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Delta,
    Full,
    Confirmation,
}

impl BatchKind {
    pub fn type_tag(self) -> u8 {
        match self {
            BatchKind::Delta => 1,
            BatchKind::Full => 2,
            BatchKind::Confirmation => 3,
        }
    }
}

/// One element's slice of a batch payload.
#[derive(Debug, Clone)]
pub struct DataRecord {
    pub target_id: RefId,
    pub start: usize,
    pub end: usize,
    pub validity: Validity,
    pub processed: bool,
}

/// An ordered list of per-element records over a single payload buffer.
///
/// Records are appended through `begin_record`/`finish_record`; only one
/// record may be open at a time, and out-of-order finishes are refused.
/// Within an encoded batch records are sorted ascending by target id, which
/// makes batch bytes deterministic for equal inputs.
#[derive(Debug)]
pub struct RecordBatch {
    pub kind: BatchKind,
    pub header: MessageHeader,
    /// Present on confirmations: the sender tick being acknowledged.
    pub confirm_tick: Option<Tick>,
    pub records: Vec<DataRecord>,
    payload: ByteWriter,
    in_flight: Option<(RefId, usize)>,
}

impl RecordBatch {
    pub fn new(kind: BatchKind, header: MessageHeader) -> Self {
        Self {
            kind,
            header,
            confirm_tick: None,
            records: Vec::new(),
            payload: ByteWriter::new(),
            in_flight: None,
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Opens a record for `target_id` and exposes the payload writer.
    pub fn begin_record(&mut self, target_id: RefId) -> Result<&mut ByteWriter, MessageError> {
        if let Some((pending, _)) = self.in_flight {
            return Err(MessageError::RecordInFlight { pending });
        }
        self.in_flight = Some((target_id, self.payload.len()));
        Ok(&mut self.payload)
    }

    /// The payload writer of the open record.
    pub fn writer(&mut self) -> &mut ByteWriter {
        &mut self.payload
    }

    /// Seals the open record.
    pub fn finish_record(&mut self, target_id: RefId) -> Result<(), MessageError> {
        let Some((expected, start)) = self.in_flight else {
            return Err(MessageError::NoRecordInFlight);
        };
        if expected != target_id {
            return Err(MessageError::RecordMismatch {
                expected,
                finished: target_id,
            });
        }
        self.in_flight = None;
        self.records.push(DataRecord {
            target_id,
            start,
            end: self.payload.len(),
            validity: Validity::Valid,
            processed: false,
        });
        Ok(())
    }

    /// Abandons the open record, rolling the payload back.
    pub fn abort_record(&mut self) {
        if let Some((_, start)) = self.in_flight.take() {
            let mut bytes = std::mem::take(&mut self.payload).into_bytes();
            bytes.truncate(start);
            let mut writer = ByteWriter::new();
            writer.write_bytes(&bytes);
            self.payload = writer;
        }
    }

    pub fn record_payload(&self, record: &DataRecord) -> &[u8] {
        &self.payload.as_slice()[record.start..record.end]
    }

    pub fn record_reader(&self, record: &DataRecord) -> ByteReader<'_> {
        ByteReader::new(self.record_payload(record))
    }

    /// Serializes the batch, including its leading type tag.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(self.payload.len() + 64);
        writer.write_u8(self.kind.type_tag());
        self.header.encode(&mut writer);
        if self.kind == BatchKind::Confirmation {
            writer.write_var_u64(self.confirm_tick.unwrap_or(0));
        }
        writer.write_var_usize(self.records.len());
        for record in &self.records {
            writer.write_var_u64(record.target_id.raw());
            writer.write_length_prefixed(self.record_payload(record));
        }
        writer.into_bytes()
    }

    /// Parses a batch body (the type tag has already been consumed).
    pub fn decode(kind: BatchKind, reader: &mut ByteReader) -> Result<Self, MessageError> {
        let header = MessageHeader::decode(reader)?;
        let confirm_tick = if kind == BatchKind::Confirmation {
            Some(reader.read_var_u64()?)
        } else {
            None
        };
        let count = reader.read_var_usize()?;
        let mut payload = ByteWriter::new();
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            let target_id = RefId::from_raw(reader.read_var_u64()?);
            let declared = reader.read_var_usize()?;
            if declared > reader.remaining() {
                return Err(MessageError::PayloadOverrun {
                    target: target_id,
                    declared,
                    remaining: reader.remaining(),
                });
            }
            let start = payload.len();
            payload.write_bytes(reader.read_bytes(declared)?);
            records.push(DataRecord {
                target_id,
                start,
                end: payload.len(),
                validity: Validity::Valid,
                processed: false,
            });
        }
        Ok(Self {
            kind,
            header,
            confirm_tick,
            records,
            payload,
            in_flight: None,
        })
    }
}
