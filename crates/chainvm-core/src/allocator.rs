//! Freeing-bump heap allocator for the guest's linear memory.
//!
//! Requests are rounded up to a power-of-two *order* (8 bytes for order 0).
//! Each order keeps a free list of released blocks. When a free list is
//! empty the allocator bumps a pointer that only moves forward. If the bump
//! would pass the end of the current memory, the caller grows the memory by
//! the number of pages reported in the [`Allocation`] before committing it.
//!
//! Bookkeeping lives on the host side; the guest never sees block headers.
//! [`HeapAllocator::clear`] resets the whole heap between top-level calls.

use std::collections::HashMap;

use chainvm_common::{AllocationError, WASM_PAGE_SIZE};

/// Size of the smallest block.
const MIN_BLOCK_SIZE: u32 = 8;

/// Number of orders; the biggest block is 32 MiB.
const NUM_ORDERS: usize = 23;

/// Biggest single allocation in bytes.
pub const MAX_ALLOCATION: u32 = MIN_BLOCK_SIZE << (NUM_ORDERS - 1);

/// A planned allocation.
///
/// Produced by [`HeapAllocator::plan`]; nothing changes until it is passed to
/// [`HeapAllocator::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Address handed to the guest.
    pub ptr: u32,
    /// Pages the memory must grow by before the block is usable.
    pub grow_pages: u32,
    order: usize,
    from_free_list: bool,
}

/// Host-managed guest heap.
#[derive(Debug, Clone)]
pub struct HeapAllocator {
    base: u32,
    bump: u32,
    heap_limit: u32,
    free_lists: Vec<Vec<u32>>,
    live: HashMap<u32, usize>,
}

impl HeapAllocator {
    /// Create an allocator whose first block starts at `base`.
    ///
    /// `base` is rounded up to the block alignment. No address at or above
    /// `heap_limit` is ever handed out.
    pub fn new(base: u32, heap_limit: u32) -> Self {
        let base = base.next_multiple_of(MIN_BLOCK_SIZE);
        Self {
            base,
            bump: base,
            heap_limit,
            free_lists: vec![Vec::new(); NUM_ORDERS],
            live: HashMap::new(),
        }
    }

    /// First address of the heap.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Number of blocks currently handed out.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Plan an allocation of `size` bytes against a memory of `memory_size` bytes.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::RequestTooLarge`] if `size` exceeds [`MAX_ALLOCATION`]
    /// - [`AllocationError::OutOfMemory`] if the block would cross the heap limit
    pub fn plan(&self, size: u32, memory_size: u64) -> Result<Allocation, AllocationError> {
        let order = order_of(size)?;

        if let Some(&ptr) = self.free_lists[order].last() {
            return Ok(Allocation {
                ptr,
                grow_pages: 0,
                order,
                from_free_list: true,
            });
        }

        let block = block_size(order);
        let end = self
            .bump
            .checked_add(block)
            .filter(|end| *end <= self.heap_limit)
            .ok_or(AllocationError::OutOfMemory {
                requested: size,
                heap_limit: self.heap_limit,
            })?;

        let missing = u64::from(end).saturating_sub(memory_size);
        let grow_pages = missing.div_ceil(u64::from(WASM_PAGE_SIZE)) as u32;

        Ok(Allocation {
            ptr: self.bump,
            grow_pages,
            order,
            from_free_list: false,
        })
    }

    /// Apply a planned allocation.
    ///
    /// The plan must come from the latest call to [`plan`](Self::plan) with no
    /// intervening mutation.
    pub fn commit(&mut self, allocation: Allocation) -> u32 {
        if allocation.from_free_list {
            self.free_lists[allocation.order].pop();
        } else {
            self.bump = allocation.ptr + block_size(allocation.order);
        }
        self.live.insert(allocation.ptr, allocation.order);
        allocation.ptr
    }

    /// Allocate without growing memory.
    ///
    /// Convenience for callers that know the memory is large enough.
    ///
    /// # Errors
    ///
    /// Fails like [`plan`](Self::plan), and with `MemoryTooSmall` if the
    /// memory would have to grow.
    pub fn allocate(&mut self, size: u32, memory_size: u64) -> Result<u32, AllocationError> {
        let allocation = self.plan(size, memory_size)?;
        if allocation.grow_pages > 0 {
            return Err(AllocationError::MemoryTooSmall {
                requested: size,
                memory_size,
            });
        }
        Ok(self.commit(allocation))
    }

    /// Return a block to its order's free list.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::InvalidFree`] if `ptr` is not a live block.
    pub fn deallocate(&mut self, ptr: u32) -> Result<(), AllocationError> {
        let order = self
            .live
            .remove(&ptr)
            .ok_or(AllocationError::InvalidFree { pointer: ptr })?;
        self.free_lists[order].push(ptr);
        Ok(())
    }

    /// Forget every allocation and move the bump pointer back to the base.
    pub fn clear(&mut self) {
        self.bump = self.base;
        self.live.clear();
        for list in &mut self.free_lists {
            list.clear();
        }
    }
}

fn block_size(order: usize) -> u32 {
    MIN_BLOCK_SIZE << order
}

fn order_of(size: u32) -> Result<usize, AllocationError> {
    if size > MAX_ALLOCATION {
        return Err(AllocationError::RequestTooLarge { requested: size });
    }
    let rounded = size.max(MIN_BLOCK_SIZE).next_power_of_two();
    Ok((rounded.trailing_zeros() - MIN_BLOCK_SIZE.trailing_zeros()) as usize)
}
