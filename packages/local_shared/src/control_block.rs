//! The non-atomic control block shared by every handle in an ownership group.
//!
//! A control block is a single heap allocation laid out as a [`LocalCounted`] header followed by
//! the allocator that produced the block and an opaque cleanup object. The header carries two
//! function pointers that know the concrete types, which lets the handles stay ignorant of
//! deleters, allocators and the way the resource was acquired.

use std::alloc::{GlobalAlloc, Layout};
use std::cell::Cell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::process;
use std::ptr::{self, NonNull};

use tracing::{debug, trace};

use crate::{Error, Result};

/// Header at the start of every control block.
///
/// The owners of a block collectively hold one local reference, so the storage outlives the
/// guarded resource by construction.
#[repr(C)]
pub(crate) struct LocalCounted {
    owners: Cell<usize>,
    local_refs: Cell<usize>,

    // Drops the cleanup object in place. Called exactly once, when `owners` reaches zero.
    dispose_fn: unsafe fn(NonNull<LocalCounted>),

    // Returns the block storage to its allocator. Called exactly once, when `local_refs`
    // reaches zero.
    destroy_fn: unsafe fn(NonNull<LocalCounted>),
}

impl LocalCounted {
    /// Registers one more owner.
    #[inline]
    pub(crate) fn add_ref(&self) {
        let Some(owners) = self.owners.get().checked_add(1) else {
            // Same policy as `Rc`: overflowing the count would lead to use-after-free.
            process::abort();
        };

        self.owners.set(owners);
    }

    /// Registers one more owner unless the resource has already been disposed of.
    #[inline]
    pub(crate) fn try_add_ref(&self) -> bool {
        if self.owners.get() == 0 {
            return false;
        }

        self.add_ref();
        true
    }

    /// The exact number of owners.
    #[inline]
    pub(crate) fn local_use_count(&self) -> usize {
        self.owners.get()
    }

    #[inline]
    pub(crate) fn add_local_ref(&self) {
        let Some(local_refs) = self.local_refs.get().checked_add(1) else {
            process::abort();
        };

        self.local_refs.set(local_refs);
    }

    /// Gives up one owner reference, disposing of the resource if it was the last one.
    ///
    /// # Safety
    ///
    /// The caller must hold one of the owner references counted by the block and must not use
    /// that reference afterwards.
    pub(crate) unsafe fn release(this: NonNull<Self>) {
        let dispose_fn = {
            // SAFETY: The caller holds an owner reference, so the block is alive.
            let counts = unsafe { this.as_ref() };

            let owners = counts.owners.get();
            debug_assert!(owners > 0, "released a control block that has no owners");

            let remaining = owners.wrapping_sub(1);
            counts.owners.set(remaining);

            if remaining != 0 {
                return;
            }

            counts.dispose_fn
        };

        trace!(block = ?this, "last owner released, disposing guarded resource");

        // SAFETY: The owner count only reaches zero once, so the cleanup object is still intact
        // and no handle can reach the resource anymore.
        unsafe {
            dispose_fn(this);
        }

        // SAFETY: The owners collectively hold one local reference, which we now give up.
        unsafe {
            Self::release_local(this);
        }
    }

    /// Gives up one local reference, freeing the block storage if it was the last one.
    ///
    /// # Safety
    ///
    /// The caller must hold one of the local references counted by the block and must not use
    /// that reference afterwards.
    pub(crate) unsafe fn release_local(this: NonNull<Self>) {
        let destroy_fn = {
            // SAFETY: The caller holds a local reference, so the block storage is alive.
            let counts = unsafe { this.as_ref() };

            let local_refs = counts.local_refs.get();
            debug_assert!(local_refs > 0, "released a control block that has no local references");

            let remaining = local_refs.wrapping_sub(1);
            counts.local_refs.set(remaining);

            if remaining != 0 {
                return;
            }

            counts.destroy_fn
        };

        // SAFETY: That was the last reference of any kind, nothing can observe the block anymore.
        unsafe {
            destroy_fn(this);
        }
    }
}

/// The concrete layout of a control block holding cleanup object `C` allocated by `A`.
#[repr(C)]
struct LocalCountedImpl<C, A> {
    // Must stay the first field so a pointer to the block is also a pointer to the header.
    header: LocalCounted,
    alloc: ManuallyDrop<A>,
    cleanup: ManuallyDrop<C>,
}

impl<C, A: GlobalAlloc> LocalCountedImpl<C, A> {
    /// Moves `cleanup` into a new control block allocated from `alloc`.
    ///
    /// Returns the header pointer (holding one owner reference) and a pointer to the cleanup
    /// object inside the block. If the allocation fails, `cleanup` is dropped before the error is
    /// returned.
    fn try_allocate(cleanup: C, alloc: A) -> Result<(NonNull<LocalCounted>, NonNull<C>)> {
        let layout = Layout::new::<Self>();

        // SAFETY: The layout is never zero-sized, the header alone has four fields.
        let raw = unsafe { alloc.alloc(layout) };

        let Some(raw) = NonNull::new(raw) else {
            debug!(
                size = layout.size(),
                align = layout.align(),
                "control block allocation failed, releasing the adopted resource"
            );

            drop(cleanup);
            return Err(Error::AllocationFailed { layout });
        };

        let block = raw.cast::<Self>();

        // SAFETY: The allocator handed us memory that fits `Self`, which we now initialize.
        unsafe {
            block.write(Self {
                header: LocalCounted {
                    owners: Cell::new(1),
                    local_refs: Cell::new(1),
                    dispose_fn: Self::dispose,
                    destroy_fn: Self::destroy,
                },
                alloc: ManuallyDrop::new(alloc),
                cleanup: ManuallyDrop::new(cleanup),
            });
        }

        trace!(block = ?block, size = layout.size(), "allocated control block");

        // SAFETY: `block` points to an initialized `Self`, we only compute a field address.
        let cleanup_field = unsafe { ptr::addr_of_mut!((*block.as_ptr()).cleanup) };

        // SAFETY: A field of a non-null allocation is itself non-null.
        let cleanup_ptr = unsafe { NonNull::new_unchecked(cleanup_field) };

        // `ManuallyDrop<C>` is `repr(transparent)`, so the cast keeps pointing at a valid `C`.
        Ok((block.cast::<LocalCounted>(), cleanup_ptr.cast::<C>()))
    }

    /// # Safety
    ///
    /// `header` must point to a live `Self` whose cleanup object has not been disposed of yet.
    unsafe fn dispose(header: NonNull<LocalCounted>) {
        let block = header.cast::<Self>();

        // SAFETY: Forwarding the caller's guarantee that the block is alive.
        let cleanup_field = unsafe { ptr::addr_of_mut!((*block.as_ptr()).cleanup) };

        // SAFETY: The cleanup object is still initialized and this is the only place that drops
        // it. `ManuallyDrop<C>` has the same layout as `C`.
        unsafe {
            ptr::drop_in_place(cleanup_field.cast::<C>());
        }
    }

    /// # Safety
    ///
    /// `header` must point to a live `Self` that nothing else references anymore.
    unsafe fn destroy(header: NonNull<LocalCounted>) {
        let block = header.cast::<Self>();

        // SAFETY: Forwarding the caller's guarantee that the block is alive.
        let alloc_field = unsafe { ptr::addr_of!((*block.as_ptr()).alloc) };

        // SAFETY: The allocator is initialized and is moved out exactly once, right before the
        // storage that holds it goes away.
        let alloc = ManuallyDrop::into_inner(unsafe { ptr::read(alloc_field) });

        // SAFETY: The block was allocated by this allocator with this exact layout.
        unsafe {
            alloc.dealloc(block.as_ptr().cast::<u8>(), Layout::new::<Self>());
        }

        trace!(block = ?block, "freed control block");
    }
}

/// One owner's share of a control block. Dropping it releases that share.
pub(crate) struct SharedCount {
    block: NonNull<LocalCounted>,
}

impl SharedCount {
    /// Creates a new control block that owns `cleanup`, allocated from `alloc`.
    ///
    /// Returns the share of the first owner and the address of the cleanup object inside the
    /// block, which stays stable until the last owner is gone.
    pub(crate) fn try_new<C, A: GlobalAlloc>(cleanup: C, alloc: A) -> Result<(Self, NonNull<C>)> {
        let (block, cleanup) = LocalCountedImpl::try_allocate(cleanup, alloc)?;
        Ok((Self { block }, cleanup))
    }

    #[inline]
    fn counts(&self) -> &LocalCounted {
        // SAFETY: We hold an owner reference, so the block is alive for at least as long as
        // `self` is borrowed.
        unsafe { self.block.as_ref() }
    }

    #[inline]
    pub(crate) fn local_use_count(&self) -> usize {
        self.counts().local_use_count()
    }

    /// Creates a local reference to the same control block.
    #[inline]
    pub(crate) fn downgrade(&self) -> LocalCount {
        self.counts().add_local_ref();

        LocalCount { block: self.block }
    }

    /// The identity of the ownership group.
    #[inline]
    pub(crate) fn block(&self) -> NonNull<LocalCounted> {
        self.block
    }
}

impl Clone for SharedCount {
    #[inline]
    fn clone(&self) -> Self {
        self.counts().add_ref();

        Self { block: self.block }
    }
}

impl Drop for SharedCount {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: Every `SharedCount` holds exactly one owner reference, which we give up here.
        unsafe {
            LocalCounted::release(self.block);
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl fmt::Debug for SharedCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCount")
            .field("block", &self.block)
            .field("owners", &self.local_use_count())
            .finish()
    }
}

/// One local reference to a control block. Keeps the block storage alive but not the resource.
pub(crate) struct LocalCount {
    block: NonNull<LocalCounted>,
}

impl LocalCount {
    #[inline]
    fn counts(&self) -> &LocalCounted {
        // SAFETY: We hold a local reference, so the block storage is alive for at least as long
        // as `self` is borrowed. Only the header is ever read through this reference.
        unsafe { self.block.as_ref() }
    }

    /// Number of owners still alive. Zero once the resource has been disposed of.
    #[inline]
    pub(crate) fn local_use_count(&self) -> usize {
        self.counts().local_use_count()
    }

    /// Becomes an owner again, if any owner is still alive.
    #[inline]
    pub(crate) fn upgrade(&self) -> Option<SharedCount> {
        self.counts()
            .try_add_ref()
            .then(|| SharedCount { block: self.block })
    }

    #[inline]
    pub(crate) fn block(&self) -> NonNull<LocalCounted> {
        self.block
    }
}

impl Clone for LocalCount {
    #[inline]
    fn clone(&self) -> Self {
        self.counts().add_local_ref();

        Self { block: self.block }
    }
}

impl Drop for LocalCount {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: Every `LocalCount` holds exactly one local reference, which we give up here.
        unsafe {
            LocalCounted::release_local(self.block);
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl fmt::Debug for LocalCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCount")
            .field("block", &self.block)
            .field("owners", &self.local_use_count())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::Global;

    assert_not_impl_any!(SharedCount: Send, Sync);
    assert_not_impl_any!(LocalCount: Send, Sync);

    /// Counts how many times it has been dropped.
    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get().wrapping_add(1));
        }
    }

    #[derive(Clone, Default)]
    struct CountingAlloc {
        allocs: Rc<Cell<usize>>,
        deallocs: Rc<Cell<usize>>,
    }

    // SAFETY: Forwards to `Global`, only adding bookkeeping.
    unsafe impl GlobalAlloc for CountingAlloc {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            self.allocs.set(self.allocs.get().wrapping_add(1));
            // SAFETY: Forwarding the caller's guarantees.
            unsafe { Global.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            self.deallocs.set(self.deallocs.get().wrapping_add(1));
            // SAFETY: Forwarding the caller's guarantees.
            unsafe { Global.dealloc(ptr, layout) }
        }
    }

    struct FailingAlloc;

    // SAFETY: Never hands out memory, so there is nothing to get wrong.
    unsafe impl GlobalAlloc for FailingAlloc {
        unsafe fn alloc(&self, _layout: Layout) -> *mut u8 {
            ptr::null_mut()
        }

        unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
            unreachable!("nothing was ever allocated");
        }
    }

    #[test]
    fn new_block_has_one_owner() {
        let (count, _) = SharedCount::try_new(5_u32, Global).unwrap();

        assert_eq!(count.local_use_count(), 1);
    }

    #[test]
    fn cleanup_pointer_addresses_stored_value() {
        let (_count, value) = SharedCount::try_new(1234_u64, Global).unwrap();

        // SAFETY: The block is alive while `_count` exists.
        assert_eq!(unsafe { value.read() }, 1234);
    }

    #[test]
    fn clone_and_drop_track_owners() {
        let drops = Rc::new(Cell::new(0));
        let (first, _) = SharedCount::try_new(DropCounter(Rc::clone(&drops)), Global).unwrap();

        let second = first.clone();
        assert_eq!(first.local_use_count(), 2);
        assert_eq!(second.local_use_count(), 2);

        drop(first);
        assert_eq!(second.local_use_count(), 1);
        assert_eq!(drops.get(), 0);

        drop(second);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn local_reference_outlives_resource() {
        let drops = Rc::new(Cell::new(0));
        let alloc = CountingAlloc::default();

        let (owner, _) =
            SharedCount::try_new(DropCounter(Rc::clone(&drops)), alloc.clone()).unwrap();
        let local = owner.downgrade();

        drop(owner);

        // Resource is gone, storage is not.
        assert_eq!(drops.get(), 1);
        assert_eq!(alloc.deallocs.get(), 0);
        assert_eq!(local.local_use_count(), 0);
        assert!(local.upgrade().is_none());

        drop(local);

        assert_eq!(alloc.allocs.get(), 1);
        assert_eq!(alloc.deallocs.get(), 1);
    }

    #[test]
    fn upgrade_adds_owner_while_alive() {
        let (owner, _) = SharedCount::try_new((), Global).unwrap();
        let local = owner.downgrade();

        let upgraded = local.upgrade().unwrap();
        assert_eq!(owner.local_use_count(), 2);
        assert_eq!(upgraded.block(), local.block());
    }

    #[test]
    fn cloned_local_reference_keeps_storage() {
        let alloc = CountingAlloc::default();
        let (owner, _) = SharedCount::try_new(7_u8, alloc.clone()).unwrap();

        let local = owner.downgrade();
        let local_clone = local.clone();

        drop(owner);
        drop(local);
        assert_eq!(alloc.deallocs.get(), 0);

        drop(local_clone);
        assert_eq!(alloc.deallocs.get(), 1);
    }

    #[test]
    fn allocation_failure_releases_cleanup() {
        let drops = Rc::new(Cell::new(0));

        let result = SharedCount::try_new(DropCounter(Rc::clone(&drops)), FailingAlloc);

        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
        assert_eq!(drops.get(), 1);
    }
}
