use thiserror::Error;

use weft_serde::SerdeError;

use crate::{ref_id::RefId, registry::RegistryError, types::Tick};

/// Errors raised by sync-element operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElementError {
    /// Mutation of an element that has been disposed.
    #[error("Element {id} is disposed")]
    Disposed { id: RefId },

    /// External mutation of an element currently held by a driver link.
    #[error("Element {id} is driven and rejects external mutation")]
    Driven { id: RefId },

    /// A downcast found an element of an unexpected concrete kind.
    #[error("Element {id} is not a {expected}")]
    WrongKind { id: RefId, expected: &'static str },

    /// A confirmation attempted to move `last_confirmed_tick` backwards.
    #[error("Confirm tick {tick} is not after last confirmed tick {last_confirmed}")]
    StaleConfirm { tick: Tick, last_confirmed: Tick },

    /// A dirty-set insertion raced a collection pass.
    #[error("Sync controller is closed for collection")]
    ClosedForCollection,

    /// A container operation used an out-of-range index.
    #[error("Index {index} out of bounds for container of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A keyed insertion collided with an existing key.
    #[error("Key already present in dictionary {id}")]
    DuplicateKey { id: RefId },

    /// A container delta carried an opcode this peer does not understand.
    #[error("Unknown container delta opcode {opcode}")]
    UnknownOpcode { opcode: u8 },

    /// A typed replicator was asked to encode an element it never bound a
    /// type id for.
    #[error("No type binding recorded for element {key}")]
    MissingTypeBinding { key: RefId },

    #[error(transparent)]
    Serde(#[from] SerdeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
