//! # Weft Serde
//! Byte-level wire codec primitives shared by the weft replication crates.
//!
//! Everything on the weft wire is byte-aligned: unsigned integers use a
//! 7-bit group encoding with an MSB continuation flag, fixed-width numbers
//! are little-endian, and strings carry a variable-length byte-count prefix.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod error;
mod reader;
mod value;
mod writer;

pub use error::SerdeError;
pub use reader::ByteReader;
pub use value::{ColorRgba, Quaternion, Vector3, WireValue, FLOAT_EPSILON};
pub use writer::ByteWriter;

/// Maximum number of bytes a 64-bit variable-length integer may occupy.
/// Ten groups of seven bits cover 70 bits; anything longer is malformed.
pub const MAX_VARINT_BYTES: usize = 10;
