//! Cleanup objects for resources adopted through raw addresses.
//!
//! A control block can hold any value as its cleanup object: dropping that value is what
//! releases the guarded resource. Values and `Arc`s are their own cleanup objects, the types here
//! cover the remaining ways a resource can be handed over.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// Releases an address obtained from [`Box::into_raw`] by turning it back into a `Box`.
pub(crate) struct AdoptedBox<T: ?Sized> {
    ptr: NonNull<T>,
}

impl<T: ?Sized> AdoptedBox<T> {
    /// # Safety
    ///
    /// `ptr` must come from [`Box::into_raw`] and must not be released by anything else.
    #[inline]
    pub(crate) unsafe fn new(ptr: NonNull<T>) -> Self {
        Self { ptr }
    }
}

impl<T: ?Sized> Drop for AdoptedBox<T> {
    fn drop(&mut self) {
        // SAFETY: `new()` requires the address to come from `Box::into_raw` and to be
        // exclusively ours to release.
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: ?Sized> fmt::Debug for AdoptedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdoptedBox").field("ptr", &self.ptr).finish()
    }
}

/// Releases an address by handing it to a caller-provided deleter, exactly once.
pub(crate) struct RawDeleter<T, D>
where
    T: ?Sized,
    D: FnOnce(NonNull<T>),
{
    ptr: NonNull<T>,
    deleter: ManuallyDrop<D>,
}

impl<T, D> RawDeleter<T, D>
where
    T: ?Sized,
    D: FnOnce(NonNull<T>),
{
    #[inline]
    pub(crate) fn new(ptr: NonNull<T>, deleter: D) -> Self {
        Self {
            ptr,
            deleter: ManuallyDrop::new(deleter),
        }
    }
}

impl<T, D> Drop for RawDeleter<T, D>
where
    T: ?Sized,
    D: FnOnce(NonNull<T>),
{
    fn drop(&mut self) {
        // SAFETY: The deleter is only taken here and `drop()` runs at most once.
        let deleter = unsafe { ManuallyDrop::take(&mut self.deleter) };

        deleter(self.ptr);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T, D> fmt::Debug for RawDeleter<T, D>
where
    T: ?Sized,
    D: FnOnce(NonNull<T>),
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDeleter")
            .field("ptr", &self.ptr)
            .finish_non_exhaustive()
    }
}
