//! # Weft Shared
//! The replicated-world data model shared by weft host & guest sessions:
//! identifier allocation and the element registry, the typed sync-element
//! hierarchy, record batches with their framing codec, and the sync
//! controller that turns dirty elements into deterministic delta batches.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod controller;
mod element;
mod message;
mod model;
mod ref_id;
mod registry;
mod trash;
mod types;

pub use weft_serde::{
    ByteReader, ByteWriter, ColorRgba, Quaternion, SerdeError, Vector3, WireValue,
    FLOAT_EPSILON, MAX_VARINT_BYTES,
};

pub use controller::{ControllerError, RecordOutcome};
pub use element::{
    ChildFactory, ConflictState, ElementCore, ElementCtor, ElementError, ElementEvent,
    ElementList, KeyedDictionary, ReplicatedMap, ReplicatorKind, SyncElement, TypeRegistry,
    TypedReplicatorKind, Validity, ValueField,
};
pub use message::{
    BatchKind, ControlEnvelope, ControlMessage, DataRecord, JoinGrant, JoinRequest,
    MessageError, MessageHeader, Ping, RecordBatch, StreamMessage, SyncMessage,
};
pub use model::{DirtySet, WorldModel};
pub use ref_id::{
    RefId, FIXTURE_FLOOR, FIXTURE_SLOTS, POSITION_MAX, USER_BYTE_GLOBAL, USER_BYTE_LOCAL,
};
pub use registry::{ReferenceController, RegistryError};
pub use trash::Trash;
pub use types::{HostRole, StateVersion, Tick, WorldState};
