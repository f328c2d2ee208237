use weft_serde::{ByteReader, ByteWriter};

use crate::{ref_id::RefId, types::{StateVersion, Tick}};

mod batch;
mod control;
mod error;
mod stream;

pub use batch::{BatchKind, DataRecord, RecordBatch};
pub use control::{ControlEnvelope, ControlMessage, JoinGrant, JoinRequest};
pub use error::MessageError;
pub use stream::StreamMessage;

/// The fields every message carries: the sender's state version, sync tick
/// and wall time. The sender user is not written to the wire; the authority
/// derives it from the connection the message arrived on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageHeader {
    pub state_version: StateVersion,
    pub sync_tick: Tick,
    pub wall_time: f64,
    pub sender_user: Option<RefId>,
}

impl MessageHeader {
    pub fn encode(&self, writer: &mut ByteWriter) {
        writer.write_var_u64(self.state_version);
        writer.write_var_u64(self.sync_tick);
        writer.write_f64(self.wall_time);
    }

    pub fn decode(reader: &mut ByteReader) -> Result<Self, MessageError> {
        Ok(Self {
            state_version: reader.read_var_u64()?,
            sync_tick: reader.read_var_u64()?,
            wall_time: reader.read_f64()?,
            sender_user: None,
        })
    }
}

/// A transport-level ping; answered in kind with the original send time so
/// the originator can measure round-trip latency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ping {
    pub sent_time: f64,
    pub is_reply: bool,
}

impl Ping {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write_u8(7);
        writer.write_bool(self.is_reply);
        writer.write_f64(self.sent_time);
        writer.into_bytes()
    }

    pub fn decode(reader: &mut ByteReader) -> Result<Self, MessageError> {
        Ok(Self {
            is_reply: reader.read_bool()?,
            sent_time: reader.read_f64()?,
        })
    }
}

/// The discriminated union of everything that travels on the wire.
/// The leading byte selects the kind:
/// `1 = Delta, 2 = Full, 3 = Confirmation, 4 = Control, 5 = Stream,
/// 6 = AsyncStream, 7 = Ping, 8 = Disconnect`.
#[derive(Debug)]
pub enum SyncMessage {
    Batch(RecordBatch),
    Stream(StreamMessage),
    Control(ControlEnvelope),
    Ping(Ping),
    Disconnect,
}

impl SyncMessage {
    pub fn kind_label(&self) -> &'static str {
        match self {
            SyncMessage::Batch(batch) => match batch.kind {
                BatchKind::Delta => "delta",
                BatchKind::Full => "full",
                BatchKind::Confirmation => "confirmation",
            },
            SyncMessage::Stream(_) => "stream",
            SyncMessage::Control(_) => "control",
            SyncMessage::Ping(_) => "ping",
            SyncMessage::Disconnect => "disconnect",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            SyncMessage::Batch(batch) => batch.encode(),
            SyncMessage::Stream(stream) => stream.encode(),
            SyncMessage::Control(envelope) => envelope.encode(),
            SyncMessage::Ping(ping) => ping.encode(),
            SyncMessage::Disconnect => vec![8],
        }
    }

    /// Parses one message off raw transport bytes.
    pub fn decode(bytes: &[u8]) -> Result<SyncMessage, MessageError> {
        let mut reader = ByteReader::new(bytes);
        let tag = reader.read_u8().map_err(|_| MessageError::Empty)?;
        match tag {
            1 => Ok(SyncMessage::Batch(RecordBatch::decode(
                BatchKind::Delta,
                &mut reader,
            )?)),
            2 => Ok(SyncMessage::Batch(RecordBatch::decode(
                BatchKind::Full,
                &mut reader,
            )?)),
            3 => Ok(SyncMessage::Batch(RecordBatch::decode(
                BatchKind::Confirmation,
                &mut reader,
            )?)),
            4 => Ok(SyncMessage::Control(ControlEnvelope::decode(&mut reader)?)),
            5 => Ok(SyncMessage::Stream(StreamMessage::decode(
                false,
                &mut reader,
            )?)),
            6 => Ok(SyncMessage::Stream(StreamMessage::decode(
                true,
                &mut reader,
            )?)),
            7 => Ok(SyncMessage::Ping(Ping::decode(&mut reader)?)),
            8 => Ok(SyncMessage::Disconnect),
            tag => Err(MessageError::InvalidTypeTag { tag }),
        }
    }
}
