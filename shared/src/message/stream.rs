use weft_serde::{ByteReader, ByteWriter};

use crate::{message::MessageError, ref_id::RefId, types::StateVersion};

/// A high-frequency, best-effort message outside the batch pipeline.
///
/// Streams ride the unreliable transport path, carry their own framing, and
/// are time-bounded: a stream older than the session's maximum age on
/// receipt is discarded rather than applied late. The group tag is opaque
/// to the core; routing may consult it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub user: RefId,
    pub state_version: StateVersion,
    pub time: f64,
    pub group: u16,
    pub is_async: bool,
    pub payload: Vec<u8>,
}

impl StreamMessage {
    pub fn type_tag(&self) -> u8 {
        if self.is_async {
            6
        } else {
            5
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(self.payload.len() + 32);
        writer.write_u8(self.type_tag());
        writer.write_var_u64(self.user.raw());
        writer.write_var_u64(self.state_version);
        writer.write_f64(self.time);
        writer.write_u16(self.group);
        writer.write_length_prefixed(&self.payload);
        writer.into_bytes()
    }

    /// Parses a stream body; `is_async` comes from the consumed type tag.
    pub fn decode(is_async: bool, reader: &mut ByteReader) -> Result<Self, MessageError> {
        let user = RefId::from_raw(reader.read_var_u64()?);
        let state_version = reader.read_var_u64()?;
        let time = reader.read_f64()?;
        let group = reader.read_u16()?;
        let payload = reader.read_length_prefixed()?.to_vec();
        Ok(Self {
            user,
            state_version,
            time,
            group,
            is_async,
            payload,
        })
    }
}
