use std::fmt;

use weft_serde::{ByteReader, ByteWriter, SerdeError, WireValue};

/// Highest position expressible in the 56-bit position field.
pub const POSITION_MAX: u64 = (1 << 56) - 1;

/// User byte of authority-allocated (global) identifiers.
pub const USER_BYTE_GLOBAL: u8 = 0;

/// User byte of local identifiers. Local elements never synchronize.
pub const USER_BYTE_LOCAL: u8 = 0xFF;

/// Number of reserved global positions, counted down from [`POSITION_MAX`],
/// that hold world fixtures (root machinery constructed identically on every
/// peer). The global allocation cursor never reaches them.
pub const FIXTURE_SLOTS: u64 = 0xFF;

/// First fixture position. `fixture(0)` is the highest global position.
pub const FIXTURE_FLOOR: u64 = POSITION_MAX - FIXTURE_SLOTS;

/// A 64-bit identifier for every replicated entity, partitioned as
/// `(user_byte : 8, position : 56)`.
///
/// User byte 0 is the authority's namespace, bytes 1..=0xFE belong to guest
/// peers, and 0xFF marks local identifiers that never leave this peer.
/// Identifiers order by raw numeric value; batch layouts rely on that order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefId(u64);

impl RefId {
    pub const NULL: RefId = RefId(0);

    pub const fn new(user_byte: u8, position: u64) -> Self {
        Self(((user_byte as u64) << 56) | (position & POSITION_MAX))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// A reserved global identifier for world fixture `index`.
    pub const fn fixture(index: u64) -> Self {
        Self::new(USER_BYTE_GLOBAL, POSITION_MAX - index)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn user_byte(self) -> u8 {
        (self.0 >> 56) as u8
    }

    pub const fn position(self) -> u64 {
        self.0 & POSITION_MAX
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn is_local(self) -> bool {
        self.user_byte() == USER_BYTE_LOCAL
    }

    pub const fn is_global(self) -> bool {
        self.user_byte() == USER_BYTE_GLOBAL
    }

    /// The next identifier in the same namespace, or `None` when the 56-bit
    /// position would overflow.
    pub fn checked_next(self) -> Option<RefId> {
        if self.position() >= POSITION_MAX {
            return None;
        }
        Some(RefId(self.0 + 1))
    }

    /// Offsets within the same namespace; used by the min-offset codecs.
    pub fn offset_from(self, base: RefId) -> u64 {
        self.0 - base.0
    }

    pub fn add_offset(base: RefId, offset: u64) -> RefId {
        RefId(base.0 + offset)
    }
}

impl fmt::Debug for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefId(0x{:016X})", self.0)
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl WireValue for RefId {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_var_u64(self.0);
    }

    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        Ok(RefId(reader.read_var_u64()?))
    }

    fn wire_eq(&self, other: &Self) -> bool {
        self == other
    }
}
