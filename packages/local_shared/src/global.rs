use std::alloc::{self, GlobalAlloc, Layout};

/// The default allocator for control blocks.
///
/// Forwards to whatever allocator is registered as the process-wide `#[global_allocator]`,
/// which is also the allocator used by `Box`, `Vec` and friends. Use the `*_in` constructors of
/// [`LocalShared`][crate::LocalShared] to place control blocks in a different allocator.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Global;

// SAFETY: We forward every call to the registered global allocator, which upholds the
// `GlobalAlloc` contract on our behalf.
unsafe impl GlobalAlloc for Global {
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Pure forwarding, mutations only produce UB.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: Forwarding the caller's guarantees about `layout`.
        unsafe { alloc::alloc(layout) }
    }

    #[inline]
    #[cfg_attr(test, mutants::skip)] // Pure forwarding, mutations only produce UB.
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantees about `ptr` and `layout`.
        unsafe {
            alloc::dealloc(ptr, layout);
        }
    }
}
