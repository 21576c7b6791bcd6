use std::alloc::{GlobalAlloc, handle_alloc_error};
use std::any::type_name;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, Index};
use std::ptr::{self, NonNull};
use std::slice::SliceIndex;

use crate::cleanup::{AdoptedBox, RawDeleter};
use crate::control_block::{LocalCounted, SharedCount};
use crate::owner::OwnerHandlePrivate;
use crate::{Error, Global, LocalWeak, OwnerHandle, Result};

/// A single-threaded reference-counting pointer.
///
/// Every `LocalShared<T>` is a pair of an element address and a share in a control block. All
/// handles that share a control block form an ownership group: the guarded resource is released
/// when the last handle of the group is dropped, regardless of which element address each handle
/// carries. This is what makes aliasing possible - a handle may point at a field of the guarded
/// object, at one element of a guarded array or at a trait object view of it, and still keep the
/// whole object alive.
///
/// Reference counts are updated without synchronization. In exchange, the type is neither
/// [`Send`] nor [`Sync`]. When ownership has to cross threads, keep it in an
/// [`Arc`](std::sync::Arc) and check it out into a `LocalShared<T>` for the duration of the
/// single-threaded work (see [`try_from_arc()`](Self::try_from_arc)).
///
/// # Equality
///
/// Two handles are equal when they point at the same address, even if they belong to different
/// ownership groups. Two handles of the same group that point at different sub-objects are not
/// equal. Use [`owner_eq()`](Self::owner_eq) and [`owner_before()`](Self::owner_before) to compare
/// ownership groups instead.
///
/// # Example
///
/// ```rust
/// use local_shared::LocalShared;
///
/// let first = LocalShared::new(String::from("hello"));
/// let second = first.clone();
///
/// assert_eq!(first.local_use_count(), 2);
/// assert_eq!(*second, "hello");
///
/// drop(first);
/// assert_eq!(second.local_use_count(), 1);
/// ```
pub struct LocalShared<T: ?Sized> {
    ptr: Option<NonNull<T>>,

    // Absent for empty handles and for aliases created from empty handles.
    count: Option<SharedCount>,

    // We may own a `T` and drop it when the last handle goes away.
    _owns: PhantomData<T>,
}

impl<T> LocalShared<T> {
    /// Moves `value` into a new ownership group.
    ///
    /// The value is stored inside the control block, so this performs a single allocation.
    ///
    /// # Panics
    ///
    /// Aborts via [`handle_alloc_error`] if the control block cannot be allocated. Use
    /// [`try_new()`](Self::try_new) to handle allocation failure.
    #[must_use]
    pub fn new(value: T) -> Self {
        infallible(Self::try_new(value))
    }

    /// Moves `value` into a new ownership group, reporting allocation failure to the caller.
    ///
    /// If the control block cannot be allocated, `value` is dropped before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the control block cannot be allocated.
    pub fn try_new(value: T) -> Result<Self> {
        Self::try_new_in(value, Global)
    }

    /// Moves `value` into a new ownership group whose control block comes from `alloc`.
    ///
    /// # Panics
    ///
    /// Aborts via [`handle_alloc_error`] if the control block cannot be allocated.
    #[must_use]
    pub fn new_in<A>(value: T, alloc: A) -> Self
    where
        A: GlobalAlloc + 'static,
    {
        infallible(Self::try_new_in(value, alloc))
    }

    /// Moves `value` into a new ownership group whose control block comes from `alloc`,
    /// reporting allocation failure to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if `alloc` cannot provide the control block. `value`
    /// has been dropped by then.
    pub fn try_new_in<A>(value: T, alloc: A) -> Result<Self>
    where
        A: GlobalAlloc + 'static,
    {
        let (count, value) = SharedCount::try_new(value, alloc)?;

        Ok(Self::from_parts(Some(value), Some(count)))
    }
}

impl<T: ?Sized> LocalShared<T> {
    /// Creates a handle that owns nothing and points at nothing.
    #[must_use]
    #[inline]
    pub const fn empty() -> Self {
        Self {
            ptr: None,
            count: None,
            _owns: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn from_parts(ptr: Option<NonNull<T>>, count: Option<SharedCount>) -> Self {
        Self {
            ptr,
            count,
            _owns: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn into_parts(self) -> (Option<NonNull<T>>, Option<SharedCount>) {
        (self.ptr, self.count)
    }

    #[inline]
    pub(crate) fn count(&self) -> Option<&SharedCount> {
        self.count.as_ref()
    }

    /// Adopts an address obtained from [`Box::into_raw`].
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by [`Box::into_raw`] (with the global
    /// allocator) and that nothing else will release or adopt it.
    ///
    /// # Panics
    ///
    /// Aborts via [`handle_alloc_error`] if the control block cannot be allocated. The boxed
    /// value is dropped first.
    #[must_use]
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        // SAFETY: Forwarding the caller's guarantees.
        infallible(unsafe { Self::try_from_raw(ptr) })
    }

    /// Adopts an address obtained from [`Box::into_raw`], reporting allocation failure to the
    /// caller.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw()`](Self::from_raw).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the control block cannot be allocated. The boxed
    /// value has been dropped by then.
    pub unsafe fn try_from_raw(ptr: NonNull<T>) -> Result<Self> {
        // SAFETY: Forwarding the caller's guarantees.
        let adopted = unsafe { AdoptedBox::new(ptr) };

        let (count, _) = SharedCount::try_new(adopted, Global)?;

        Ok(Self::from_parts(Some(ptr), Some(count)))
    }

    /// Adopts an address that `deleter` will release once the last owner is gone.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` is valid for shared access until `deleter` is called
    /// and that nothing else will release or adopt it.
    ///
    /// # Panics
    ///
    /// Aborts via [`handle_alloc_error`] if the control block cannot be allocated. The deleter
    /// is called first.
    #[must_use]
    pub unsafe fn from_raw_with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: FnOnce(NonNull<T>) + 'static,
    {
        // SAFETY: Forwarding the caller's guarantees.
        infallible(unsafe { Self::try_from_raw_in(ptr, deleter, Global) })
    }

    /// Adopts an address that `deleter` will release once the last owner is gone, reporting
    /// allocation failure to the caller.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with_deleter()`](Self::from_raw_with_deleter).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the control block cannot be allocated. The deleter
    /// has been called with `ptr` by then.
    pub unsafe fn try_from_raw_with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Result<Self>
    where
        D: FnOnce(NonNull<T>) + 'static,
    {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe { Self::try_from_raw_in(ptr, deleter, Global) }
    }

    /// Adopts an address that `deleter` will release once the last owner is gone, placing the
    /// control block in `alloc`.
    ///
    /// When the last owner is gone, `deleter` is called first. The control block is returned to
    /// `alloc` once no [`LocalWeak`] refers to it anymore.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with_deleter()`](Self::from_raw_with_deleter).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if `alloc` cannot provide the control block. The
    /// deleter has been called with `ptr` by then.
    pub unsafe fn try_from_raw_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<Self>
    where
        D: FnOnce(NonNull<T>) + 'static,
        A: GlobalAlloc + 'static,
    {
        let (count, _) = SharedCount::try_new(RawDeleter::new(ptr, deleter), alloc)?;

        Ok(Self::from_parts(Some(ptr), Some(count)))
    }

    /// Moves a boxed value into a new ownership group without moving the value itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the control block cannot be allocated. The boxed
    /// value has been dropped by then.
    pub fn try_from_box(boxed: Box<T>) -> Result<Self> {
        let ptr = NonNull::from(Box::leak(boxed));

        // SAFETY: The address was just released from a `Box` and nothing else knows about it.
        unsafe { Self::try_from_raw(ptr) }
    }

    /// Returns the element address.
    #[must_use]
    #[inline]
    #[cfg_attr(test, mutants::skip)] // All mutations unviable - save some time.
    pub fn ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Returns a reference to the element, or `None` if the handle points at nothing.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: The element address is valid for shared access for as long as the ownership
        // group is alive, which it is while `self` is borrowed. For addresses supplied through
        // the unsafe aliasing and adoption functions, their callers guaranteed this.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Whether the handle points at nothing.
    ///
    /// An aliasing handle may point at nothing while still keeping an ownership group alive.
    #[must_use]
    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// The number of handles in the ownership group, or zero if the handle owns nothing.
    ///
    /// The count is exact: nothing else can modify it while the caller is looking.
    #[must_use]
    #[inline]
    pub fn local_use_count(&self) -> usize {
        self.count
            .as_ref()
            .map_or(0, SharedCount::local_use_count)
    }

    /// Exchanges the contents of two handles without touching any reference count.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
        mem::swap(&mut self.count, &mut other.count);
    }

    /// Moves the contents out of this handle, leaving it empty.
    #[must_use]
    #[inline]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Releases this handle's share and leaves it empty.
    #[inline]
    pub fn reset(&mut self) {
        self.replace_with(Self::empty());
    }

    /// Replaces the contents with a newly adopted [`Box::into_raw`] address.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw()`](Self::from_raw).
    pub unsafe fn reset_raw(&mut self, ptr: NonNull<T>) {
        // SAFETY: Forwarding the caller's guarantees.
        let replacement = unsafe { Self::from_raw(ptr) };

        self.replace_with(replacement);
    }

    /// Replaces the contents with a newly adopted address and deleter.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with_deleter()`](Self::from_raw_with_deleter).
    pub unsafe fn reset_raw_with_deleter<D>(&mut self, ptr: NonNull<T>, deleter: D)
    where
        D: FnOnce(NonNull<T>) + 'static,
    {
        // SAFETY: Forwarding the caller's guarantees.
        let replacement = unsafe { Self::from_raw_with_deleter(ptr, deleter) };

        self.replace_with(replacement);
    }

    /// Replaces the contents with a newly adopted address, deleter and control block allocator.
    ///
    /// On failure the handle keeps its previous contents.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with_deleter()`](Self::from_raw_with_deleter).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if `alloc` cannot provide the control block. The
    /// deleter has been called with `ptr` by then.
    pub unsafe fn try_reset_raw_in<D, A>(
        &mut self,
        ptr: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> Result<()>
    where
        D: FnOnce(NonNull<T>) + 'static,
        A: GlobalAlloc + 'static,
    {
        // SAFETY: Forwarding the caller's guarantees.
        let replacement = unsafe { Self::try_from_raw_in(ptr, deleter, alloc)? };

        self.replace_with(replacement);
        Ok(())
    }

    /// Replaces the contents with an alias: a share in `owner`'s group that points at `ptr`.
    ///
    /// # Safety
    ///
    /// Same as [`alias()`](Self::alias).
    pub unsafe fn reset_alias<Y: ?Sized>(
        &mut self,
        owner: &LocalShared<Y>,
        ptr: Option<NonNull<T>>,
    ) {
        // SAFETY: Forwarding the caller's guarantees.
        let replacement = unsafe { owner.alias(ptr) };

        self.replace_with(replacement);
    }

    // The replacement is fully built before we let go of the old contents, so a failure while
    // building it never costs us the old share, and the old share is released only after `self`
    // already holds the new one.
    #[inline]
    fn replace_with(&mut self, mut replacement: Self) {
        self.swap(&mut replacement);
    }

    /// Whether this handle's ownership group sorts before `other`'s.
    ///
    /// This is a strict weak ordering over ownership groups, independent of element addresses:
    /// two handles of the same group are equivalent under it even if they point at different
    /// sub-objects. Handles that own nothing sort before all others. `other` may be a
    /// [`LocalShared`] or a [`LocalWeak`].
    #[must_use]
    #[inline]
    pub fn owner_before<O: OwnerHandle + ?Sized>(&self, other: &O) -> bool {
        self.owner_cmp(other) == Ordering::Less
    }

    /// Compares ownership groups. See [`owner_before()`](Self::owner_before).
    #[must_use]
    #[inline]
    pub fn owner_cmp<O: OwnerHandle + ?Sized>(&self, other: &O) -> Ordering {
        self.owner_key().cmp(&other.owner_key())
    }

    /// Whether both handles belong to the same ownership group (or both own nothing).
    #[must_use]
    #[inline]
    pub fn owner_eq<O: OwnerHandle + ?Sized>(&self, other: &O) -> bool {
        self.owner_key() == other.owner_key()
    }

    #[inline]
    pub(crate) fn block(&self) -> Option<NonNull<LocalCounted>> {
        self.count.as_ref().map(SharedCount::block)
    }

    /// Creates a [`LocalWeak`] observer of this handle's ownership group.
    #[must_use]
    #[inline]
    pub fn downgrade(&self) -> LocalWeak<T> {
        LocalWeak::from_parts(self.ptr, self.count.as_ref().map(SharedCount::downgrade))
    }

    #[inline]
    fn address(&self) -> Option<NonNull<()>> {
        self.ptr.map(NonNull::cast)
    }
}

/// Panics if the handle points at nothing.
impl<T: ?Sized> Deref for LocalShared<T> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced a {} that points at nothing", type_name::<Self>()),
        }
    }
}

impl<T, I> Index<I> for LocalShared<[T]>
where
    I: SliceIndex<[T]>,
{
    type Output = I::Output;

    #[inline]
    #[track_caller]
    #[allow(clippy::indexing_slicing, reason = "out of bounds access panics, as with slices")]
    fn index(&self, index: I) -> &Self::Output {
        &(**self)[index]
    }
}

impl<T, I, const N: usize> Index<I> for LocalShared<[T; N]>
where
    [T]: Index<I>,
{
    type Output = <[T] as Index<I>>::Output;

    #[inline]
    #[track_caller]
    #[allow(clippy::indexing_slicing, reason = "out of bounds access panics, as with slices")]
    fn index(&self, index: I) -> &Self::Output {
        &(**self).as_slice()[index]
    }
}

impl<T: ?Sized> Clone for LocalShared<T> {
    /// Creates another handle in the same ownership group, pointing at the same address.
    #[inline]
    fn clone(&self) -> Self {
        Self::from_parts(self.ptr, self.count.clone())
    }

    /// Makes `self` a copy of `source`.
    ///
    /// The new share is acquired before the old one is released, so self-assignment is safe.
    #[inline]
    fn clone_from(&mut self, source: &Self) {
        self.replace_with(source.clone());
    }
}

impl<T: ?Sized> Default for LocalShared<T> {
    #[inline]
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<T> for LocalShared<T> {
    #[inline]
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for LocalShared<T> {
    /// # Panics
    ///
    /// Aborts via [`handle_alloc_error`] if the control block cannot be allocated.
    #[inline]
    fn from(boxed: Box<T>) -> Self {
        infallible(Self::try_from_box(boxed))
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<LocalShared<U>> for LocalShared<T> {
    #[inline]
    fn eq(&self, other: &LocalShared<U>) -> bool {
        self.address() == other.address()
    }
}

impl<T: ?Sized> Eq for LocalShared<T> {}

impl<T: ?Sized, U: ?Sized> PartialOrd<LocalShared<U>> for LocalShared<T> {
    #[inline]
    fn partial_cmp(&self, other: &LocalShared<U>) -> Option<Ordering> {
        Some(self.address().cmp(&other.address()))
    }
}

impl<T: ?Sized> Ord for LocalShared<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.address().cmp(&other.address())
    }
}

impl<T: ?Sized> Hash for LocalShared<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

/// Formats the element address.
impl<T: ?Sized> fmt::Pointer for LocalShared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address() {
            Some(address) => fmt::Pointer::fmt(&address, f),
            None => fmt::Pointer::fmt(&ptr::null::<()>(), f),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: ?Sized> fmt::Debug for LocalShared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("ptr", &self.address())
            .field("local_use_count", &self.local_use_count())
            .finish()
    }
}

/// Turns allocation failure into the standard allocation error handler.
pub(crate) fn infallible<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(Error::AllocationFailed { layout }) => handle_alloc_error(layout),
    }
}
