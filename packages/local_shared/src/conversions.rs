//! Checking ownership out of thread-safe [`Arc`]s.
//!
//! The resulting ownership group holds one `Arc` as its cleanup object, so the whole group counts
//! as a single strong reference on the `Arc` side. Cloning and dropping the local handles never
//! touches the atomic counter.

use std::ptr::NonNull;
use std::sync::{self, Arc};

use tracing::trace;

use crate::control_block::SharedCount;
use crate::local_shared::infallible;
use crate::{Global, LocalShared, Result};

impl<T: ?Sized> LocalShared<T> {
    /// Moves a strong reference out of an `Arc` into a new ownership group.
    ///
    /// The handle points at the same address as the `Arc`. The `Arc` reference is released when
    /// the last handle of the new group is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the control block
    /// cannot be allocated. The `Arc` reference has been released by then.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use local_shared::LocalShared;
    ///
    /// let shared = Arc::new(42_u64);
    /// let local = LocalShared::try_from_arc(Arc::clone(&shared)).unwrap();
    /// let more_local = local.clone();
    ///
    /// assert_eq!(Arc::strong_count(&shared), 2);
    /// assert_eq!(more_local.local_use_count(), 2);
    /// assert_eq!(*local, 42);
    /// ```
    pub fn try_from_arc(arc: Arc<T>) -> Result<Self> {
        let ptr = NonNull::from(&*arc);

        trace!(strong_count = Arc::strong_count(&arc), "checking out shared ownership");

        let (count, _) = SharedCount::try_new(arc, Global)?;

        Ok(Self::from_parts(Some(ptr), Some(count)))
    }

    /// Adds a strong reference to an `Arc` and moves it into a new ownership group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the control block
    /// cannot be allocated. The strong count of `arc` is unchanged in that case.
    #[inline]
    pub fn try_from_arc_ref(arc: &Arc<T>) -> Result<Self> {
        Self::try_from_arc(Arc::clone(arc))
    }

    /// Creates a new ownership group from a thread-safe weak reference.
    ///
    /// Returns an empty handle if the referenced value is already gone.
    ///
    /// # Panics
    ///
    /// Aborts via [`handle_alloc_error`][std::alloc::handle_alloc_error] if the control block
    /// cannot be allocated.
    #[must_use]
    pub fn from_weak_arc(weak: &sync::Weak<T>) -> Self {
        weak.upgrade().map_or_else(Self::empty, Self::from)
    }
}

impl<T: ?Sized> From<Arc<T>> for LocalShared<T> {
    /// # Panics
    ///
    /// Aborts via [`handle_alloc_error`][std::alloc::handle_alloc_error] if the control block
    /// cannot be allocated.
    #[inline]
    fn from(arc: Arc<T>) -> Self {
        infallible(Self::try_from_arc(arc))
    }
}

impl<T: ?Sized> From<&Arc<T>> for LocalShared<T> {
    #[inline]
    fn from(arc: &Arc<T>) -> Self {
        infallible(Self::try_from_arc_ref(arc))
    }
}

impl<T: ?Sized> From<Option<Arc<T>>> for LocalShared<T> {
    /// `None` becomes an empty handle.
    #[inline]
    fn from(arc: Option<Arc<T>>) -> Self {
        arc.map_or_else(Self::empty, Self::from)
    }
}
