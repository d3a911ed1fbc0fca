//! Allocator interface (§6 collaborator): every allocation in the protocol
//! flows through this trait so an embedder can swap in an arena/TLSF-backed
//! implementation for a per-client silo, freed wholesale on disconnect.
//! Only the default system-heap implementation is provided here; the
//! TLSF-backed variant is explicitly out of scope (§1).

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Raised when an allocation cannot be satisfied. Non-fatal at the call
/// site; the caller promotes this to a connection error on the next
/// `advance_time` (§5, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("allocator out of memory")]
pub struct OutOfMemory;

/// Allocation capability injected into every owning structure at
/// construction (§9 "Raw new[]/delete[] and a TLSF arena → allocator
/// abstraction").
pub trait Allocator {
    /// # Safety
    /// `layout` must have nonzero size. The returned pointer, if any, must
    /// be freed via `free` with the same layout exactly once.
    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, OutOfMemory>;

    /// # Safety
    /// `ptr`/`layout` must match a prior successful `allocate` call that
    /// has not already been freed.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Wraps the system heap allocator (`std::alloc`). The default for
/// everything that doesn't need a dedicated per-client arena.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, OutOfMemory> {
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(OutOfMemory)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_allocator_round_trips() {
        let allocator = SystemAllocator;
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let ptr = allocator.allocate(layout).unwrap();
            allocator.free(ptr, layout);
        }
    }
}
