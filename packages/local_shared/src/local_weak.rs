use std::any::type_name;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::control_block::{LocalCount, LocalCounted};
use crate::owner::OwnerHandlePrivate;
use crate::{LocalShared, OwnerHandle};

/// Observes an ownership group without keeping its resource alive.
///
/// A `LocalWeak<T>` is created by [`LocalShared::downgrade()`]. It keeps the control block of its
/// group allocated, so it can always tell whether the group is still alive, and turns back into
/// an owner through [`upgrade()`](Self::upgrade) for as long as it is.
///
/// # Example
///
/// ```rust
/// use local_shared::LocalShared;
///
/// let owner = LocalShared::new(10_u32);
/// let weak = owner.downgrade();
///
/// assert_eq!(weak.upgrade().as_deref(), Some(&10));
///
/// drop(owner);
/// assert!(weak.expired());
/// assert!(weak.upgrade().is_none());
/// ```
pub struct LocalWeak<T: ?Sized> {
    ptr: Option<NonNull<T>>,
    count: Option<LocalCount>,

    _marker: PhantomData<T>,
}

impl<T: ?Sized> LocalWeak<T> {
    /// Creates an observer of no ownership group. It is expired from the start.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            ptr: None,
            count: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn from_parts(ptr: Option<NonNull<T>>, count: Option<LocalCount>) -> Self {
        Self {
            ptr,
            count,
            _marker: PhantomData,
        }
    }

    /// Becomes an owner of the observed group, if any owner is still alive.
    ///
    /// The new handle points at the same address as the handle this observer was created from.
    #[must_use]
    #[inline]
    pub fn upgrade(&self) -> Option<LocalShared<T>> {
        let count = self.count.as_ref()?.upgrade()?;

        Some(LocalShared::from_parts(self.ptr, Some(count)))
    }

    /// Whether the observed group has no owners left.
    #[must_use]
    #[inline]
    pub fn expired(&self) -> bool {
        self.local_use_count() == 0
    }

    /// The number of owners in the observed group.
    #[must_use]
    #[inline]
    pub fn local_use_count(&self) -> usize {
        self.count.as_ref().map_or(0, LocalCount::local_use_count)
    }

    /// Whether the observed group sorts before `other`'s group.
    ///
    /// Uses the same ordering as [`LocalShared::owner_before()`], which stays meaningful after
    /// the group has expired. `other` may be a [`LocalShared`] or another `LocalWeak`.
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

    /// Whether both handles belong to the same ownership group (or both observe nothing).
    #[must_use]
    #[inline]
    pub fn owner_eq<O: OwnerHandle + ?Sized>(&self, other: &O) -> bool {
        self.owner_key() == other.owner_key()
    }

    #[inline]
    pub(crate) fn block(&self) -> Option<NonNull<LocalCounted>> {
        self.count.as_ref().map(LocalCount::block)
    }
}

impl<T: ?Sized> Clone for LocalWeak<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self::from_parts(self.ptr, self.count.clone())
    }
}

impl<T: ?Sized> Default for LocalWeak<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: ?Sized> fmt::Debug for LocalWeak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("ptr", &self.ptr.map(NonNull::cast::<()>))
            .field("local_use_count", &self.local_use_count())
            .finish()
    }
}
