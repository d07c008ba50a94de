//! Byte order used by primitive and bitfield-backing integers.

/// The on-wire byte order of a fixed-width integer.
///
/// There is no "native" variant: every primitive field picks big or little
/// endian explicitly at declaration time, and that choice is frozen into the
/// type descriptor. Bitfield backing integers are read/written in their own
/// declared endianness; the sub-field packing within the integer is always
/// MSB-first regardless (see `crate::bitfield`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    pub const fn is_big(self) -> bool {
        matches!(self, Endian::Big)
    }
}

impl Default for Endian {
    /// Matches the wire formats this engine targets (OpenFlow, GZIP header
    /// fields, HTTP/2 frames): big-endian is the common default, little
    /// remains an explicit per-field/per-struct opt-in.
    fn default() -> Self {
        Endian::Big
    }
}
