use weft_serde::{ByteReader, ByteWriter};

use crate::{
    message::{MessageError, MessageHeader},
    ref_id::RefId,
    types::StateVersion,
};

const TAG_JOIN_REQUEST: u8 = 1;
const TAG_JOIN_GRANT: u8 = 2;
const TAG_JOIN_START_DELTA: u8 = 3;
const TAG_JOIN_REJECT: u8 = 4;
const TAG_SERVER_CLOSE: u8 = 5;
const TAG_REQUEST_FULL_STATE: u8 = 6;

/// A guest's request to join the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub user_name: String,
    pub machine_id: String,
    /// The user id from a previous session, or null for a fresh join.
    pub user_id: RefId,
    pub head_device: u32,
}

/// The authority's admission, granting the guest its identifier range.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinGrant {
    pub assigned_user_id: RefId,
    pub allocation_id_start: RefId,
    pub allocation_id_end: RefId,
    pub max_users: u16,
    pub world_time: f64,
    pub state_version: StateVersion,
}

/// Control submessages following a `Control` type byte and the common
/// header. Each body travels behind a varint length so unknown tags can be
/// skipped in one piece.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    JoinRequest(JoinRequest),
    JoinGrant(JoinGrant),
    /// Marks the end of a new peer's full batch: deltas start here.
    JoinStartDelta,
    JoinReject { reason: String },
    ServerClose,
    RequestFullState,
}

impl ControlMessage {
    fn tag(&self) -> u8 {
        match self {
            ControlMessage::JoinRequest(_) => TAG_JOIN_REQUEST,
            ControlMessage::JoinGrant(_) => TAG_JOIN_GRANT,
            ControlMessage::JoinStartDelta => TAG_JOIN_START_DELTA,
            ControlMessage::JoinReject { .. } => TAG_JOIN_REJECT,
            ControlMessage::ServerClose => TAG_SERVER_CLOSE,
            ControlMessage::RequestFullState => TAG_REQUEST_FULL_STATE,
        }
    }

    fn encode_body(&self, writer: &mut ByteWriter) {
        match self {
            ControlMessage::JoinRequest(request) => {
                writer.write_string(&request.user_name);
                writer.write_string(&request.machine_id);
                writer.write_var_u64(request.user_id.raw());
                writer.write_u32(request.head_device);
            }
            ControlMessage::JoinGrant(grant) => {
                writer.write_var_u64(grant.assigned_user_id.raw());
                writer.write_var_u64(grant.allocation_id_start.raw());
                writer.write_var_u64(grant.allocation_id_end.raw());
                writer.write_u16(grant.max_users);
                writer.write_f64(grant.world_time);
                writer.write_var_u64(grant.state_version);
            }
            ControlMessage::JoinReject { reason } => {
                writer.write_string(reason);
            }
            ControlMessage::JoinStartDelta
            | ControlMessage::ServerClose
            | ControlMessage::RequestFullState => {}
        }
    }

    fn decode_body(tag: u8, reader: &mut ByteReader) -> Result<Self, MessageError> {
        match tag {
            TAG_JOIN_REQUEST => Ok(ControlMessage::JoinRequest(JoinRequest {
                user_name: reader.read_string()?,
                machine_id: reader.read_string()?,
                user_id: RefId::from_raw(reader.read_var_u64()?),
                head_device: reader.read_u32()?,
            })),
            TAG_JOIN_GRANT => Ok(ControlMessage::JoinGrant(JoinGrant {
                assigned_user_id: RefId::from_raw(reader.read_var_u64()?),
                allocation_id_start: RefId::from_raw(reader.read_var_u64()?),
                allocation_id_end: RefId::from_raw(reader.read_var_u64()?),
                max_users: reader.read_u16()?,
                world_time: reader.read_f64()?,
                state_version: reader.read_var_u64()?,
            })),
            TAG_JOIN_START_DELTA => Ok(ControlMessage::JoinStartDelta),
            TAG_JOIN_REJECT => Ok(ControlMessage::JoinReject {
                reason: reader.read_string()?,
            }),
            TAG_SERVER_CLOSE => Ok(ControlMessage::ServerClose),
            TAG_REQUEST_FULL_STATE => Ok(ControlMessage::RequestFullState),
            tag => Err(MessageError::UnknownControlTag { tag }),
        }
    }
}

/// A control submessage plus the common header every message carries.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEnvelope {
    pub header: MessageHeader,
    pub message: ControlMessage,
}

impl ControlEnvelope {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write_u8(4);
        self.header.encode(&mut writer);
        writer.write_u8(self.message.tag());
        let mut body = ByteWriter::new();
        self.message.encode_body(&mut body);
        writer.write_length_prefixed(body.as_slice());
        writer.into_bytes()
    }

    pub fn decode(reader: &mut ByteReader) -> Result<Self, MessageError> {
        let header = MessageHeader::decode(reader)?;
        let tag = reader.read_u8()?;
        let body = reader.read_length_prefixed()?;
        let mut body_reader = ByteReader::new(body);
        let message = ControlMessage::decode_body(tag, &mut body_reader)?;
        Ok(Self { header, message })
    }
}
