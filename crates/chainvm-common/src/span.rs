//! Pointer-and-length packing for the host/guest boundary.
//!
//! Every buffer that crosses the boundary is described by a 32-bit pointer into
//! the guest's linear memory and a 32-bit length, packed into one `i64`: the
//! pointer occupies the low 32 bits and the length the high 32 bits.

/// A buffer inside the guest's linear memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    /// Offset of the first byte.
    pub ptr: u32,
    /// Number of bytes.
    pub len: u32,
}

impl Span {
    /// Create a span from a pointer and a length.
    pub const fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    /// Unpack a span from its wire representation.
    pub const fn from_packed(packed: i64) -> Self {
        let (ptr, len) = decode(packed);
        Self { ptr, len }
    }

    /// Pack this span into its wire representation.
    pub const fn packed(self) -> i64 {
        encode(self.ptr, self.len)
    }

    /// One past the last byte, or `None` if the span wraps the address space.
    pub const fn end(self) -> Option<u32> {
        self.ptr.checked_add(self.len)
    }
}

/// Pack a pointer and a length into one `i64`.
#[allow(clippy::cast_possible_wrap)]
pub const fn encode(ptr: u32, len: u32) -> i64 {
    (((len as u64) << 32) | (ptr as u64)) as i64
}

/// Split an `i64` into its pointer (low half) and length (high half).
#[allow(clippy::cast_sign_loss)]
pub const fn decode(packed: i64) -> (u32, u32) {
    let raw = packed as u64;
    (raw as u32, (raw >> 32) as u32)
}
