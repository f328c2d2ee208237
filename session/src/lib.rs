//! # Weft Session
//! The sync pipeline around a replicated world: the decode, encode and sync
//! worker threads, the join protocol, user lifecycle, and the `Session`
//! facade shared by authority and guest peers (the two roles run the same
//! pipeline and differ only at the labeled steps of the sync cycle).

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod config;
mod error;
mod pending;
mod pipeline;
mod session;
mod stats;
mod transport;
mod users;

pub use config::SessionConfig;
pub use error::SessionError;
pub use pipeline::AutoResetEvent;
pub use session::Session;
pub use stats::{KindSnapshot, Stats, StatsSnapshot};
pub use transport::{
    AcceptSink, ClosedSink, Connection, DataSink, Listener, LocalEndpoint, LocalHub,
    LocalListener, PeerId, TransportError,
};
pub use users::{install_world_fixtures, user_replicator_id, User, UserReplicatorKind};
