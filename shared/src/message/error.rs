use thiserror::Error;

use weft_serde::SerdeError;

use crate::ref_id::RefId;

/// Errors raised while framing or parsing wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// The leading type byte named no known message kind.
    #[error("Invalid message type tag {tag}")]
    InvalidTypeTag { tag: u8 },

    /// A control envelope carried an unknown submessage tag.
    #[error("Unknown control submessage tag {tag}")]
    UnknownControlTag { tag: u8 },

    /// `begin_record` while another record is still open.
    #[error("Record for {pending} is still in flight")]
    RecordInFlight { pending: RefId },

    /// `finish_record` named a different target than the open record.
    #[error("Finished record {finished} but {expected} is in flight")]
    RecordMismatch { expected: RefId, finished: RefId },

    /// `finish_record` with no record open.
    #[error("No record in flight")]
    NoRecordInFlight,

    /// A record declared more payload than the buffer holds.
    #[error("Record for {target} declares {declared} byte(s) but only {remaining} remain")]
    PayloadOverrun {
        target: RefId,
        declared: usize,
        remaining: usize,
    },

    /// A message arrived with no bytes at all.
    #[error("Empty message")]
    Empty,

    #[error(transparent)]
    Serde(#[from] SerdeError),
}
