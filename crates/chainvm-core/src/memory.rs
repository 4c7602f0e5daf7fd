//! Bounds-checked access to the guest's linear memory.
//!
//! Every `(pointer, length)` pair handed to the host is validated here
//! against the current memory size before a slice is produced. Host
//! functions never index guest memory directly.

use chainvm_common::{HostError, Span};

/// Read-only view over guest linear memory.
#[derive(Debug, Clone, Copy)]
pub struct GuestMemory<'a> {
    data: &'a [u8],
}

/// Mutable view over guest linear memory.
#[derive(Debug)]
pub struct GuestMemoryMut<'a> {
    data: &'a mut [u8],
}

/// Resolve `[ptr, ptr + len)` to a byte range inside a memory of `size` bytes.
fn checked_range(ptr: u32, len: u32, size: usize) -> Result<std::ops::Range<usize>, HostError> {
    let start = ptr as usize;
    let end = start.checked_add(len as usize).filter(|end| *end <= size);

    match end {
        Some(end) => Ok(start..end),
        None => Err(HostError::OutOfBounds {
            ptr,
            len,
            memory_size: size,
        }),
    }
}

impl<'a> GuestMemory<'a> {
    /// Wrap a memory slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Size of the memory in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Borrow `len` bytes starting at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::OutOfBounds`] if the range leaves the memory.
    pub fn slice(&self, ptr: u32, len: u32) -> Result<&'a [u8], HostError> {
        let range = checked_range(ptr, len, self.data.len())?;
        Ok(&self.data[range])
    }

    /// Borrow the bytes described by a span.
    pub fn span(&self, span: Span) -> Result<&'a [u8], HostError> {
        self.slice(span.ptr, span.len)
    }

    /// Read a fixed-size array starting at `ptr`.
    pub fn array<const N: usize>(&self, ptr: u32) -> Result<[u8; N], HostError> {
        let bytes = self.slice(ptr, N as u32)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

impl<'a> GuestMemoryMut<'a> {
    /// Wrap a mutable memory slice.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Size of the memory in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Reborrow as a read-only view.
    pub fn view(&self) -> GuestMemory<'_> {
        GuestMemory::new(self.data)
    }

    /// Copy `bytes` into memory at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::OutOfBounds`] if the destination leaves the memory.
    pub fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), HostError> {
        let len = u32::try_from(bytes.len()).map_err(|_| HostError::OutOfBounds {
            ptr,
            len: u32::MAX,
            memory_size: self.data.len(),
        })?;
        let range = checked_range(ptr, len, self.data.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_in_bounds() {
        let data = [10, 20, 30, 40, 50];
        let memory = GuestMemory::new(&data);
        assert_eq!(memory.slice(1, 3).unwrap(), &[20, 30, 40]);
        assert_eq!(memory.slice(5, 0).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn test_slice_out_of_bounds() {
        let data = [0u8; 4];
        let memory = GuestMemory::new(&data);

        assert_eq!(
            memory.slice(2, 3),
            Err(HostError::OutOfBounds {
                ptr: 2,
                len: 3,
                memory_size: 4
            })
        );
        assert!(memory.slice(u32::MAX, u32::MAX).is_err());
        assert!(memory.slice(5, 0).is_err());
    }

    #[test]
    fn test_span_and_array() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let memory = GuestMemory::new(&data);
        assert_eq!(memory.span(Span::new(6, 2)).unwrap(), &[7, 8]);
        assert_eq!(memory.array::<4>(2).unwrap(), [3, 4, 5, 6]);
        assert!(memory.array::<4>(6).is_err());
    }

    #[test]
    fn test_write() {
        let mut data = [0u8; 8];
        let mut memory = GuestMemoryMut::new(&mut data);
        memory.write(2, &[0xAA, 0xBB]).unwrap();
        assert!(memory.write(7, &[1, 2]).is_err());
        assert_eq!(memory.view().slice(2, 2).unwrap(), &[0xAA, 0xBB]);
        assert_eq!(data[2], 0xAA);
    }
}
