//! Aliasing and casting between element types.
//!
//! Every function here produces a handle in the same ownership group as its source, pointing at
//! a different address or at the same address under a different type. Each comes in a form that
//! borrows the source (adding an owner) and a form that consumes it (keeping the owner count).

use std::any::Any;
use std::ptr::NonNull;

use crate::LocalShared;

impl<T: ?Sized> LocalShared<T> {
    /// Creates a handle in this ownership group that points at whatever `f` selects.
    ///
    /// This covers both conversions the compiler can check (such as unsizing to a trait object
    /// with `|x| x as &dyn Trait`) and projections to sub-objects (`|x| &x.field`). The group
    /// stays alive for as long as the new handle does, even if this one is dropped.
    ///
    /// If this handle points at nothing, `f` is not called and the new handle points at nothing
    /// as well, while still sharing ownership.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::fmt::Display;
    ///
    /// use local_shared::LocalShared;
    ///
    /// struct Pair {
    ///     left: u32,
    ///     right: String,
    /// }
    ///
    /// let pair = LocalShared::new(Pair {
    ///     left: 1,
    ///     right: "two".to_string(),
    /// });
    ///
    /// let right = pair.map(|p| &p.right);
    /// let display: LocalShared<dyn Display> = pair.map(|p| &p.left as &dyn Display);
    ///
    /// drop(pair);
    ///
    /// assert_eq!(*right, "two");
    /// assert_eq!(display.to_string(), "1");
    /// assert_eq!(right.local_use_count(), 2);
    /// ```
    #[must_use]
    #[inline]
    pub fn map<U, F>(&self, f: F) -> LocalShared<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        self.clone().into_map(f)
    }

    /// Consuming form of [`map()`](Self::map). Does not change the owner count.
    #[must_use]
    #[inline]
    pub fn into_map<U, F>(self, f: F) -> LocalShared<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let ptr = self.get().map(|value| NonNull::from(f(value)));
        let (_, count) = self.into_parts();

        LocalShared::from_parts(ptr, count)
    }

    /// Creates a handle in this ownership group for the view `f` finds at runtime.
    ///
    /// If this handle points at nothing or `f` returns `None`, the result is an empty handle
    /// that does not share ownership. This handle is not affected either way.
    #[must_use]
    #[inline]
    pub fn dynamic_cast<U, F>(&self, f: F) -> LocalShared<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> Option<&U>,
    {
        match self.get().and_then(f) {
            Some(target) => {
                LocalShared::from_parts(Some(NonNull::from(target)), self.count().cloned())
            }
            None => LocalShared::empty(),
        }
    }

    /// Consuming form of [`dynamic_cast()`](Self::dynamic_cast).
    ///
    /// If the cast fails, this handle's share is released and an empty handle is returned.
    #[must_use]
    #[inline]
    pub fn into_dynamic_cast<U, F>(self, f: F) -> LocalShared<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> Option<&U>,
    {
        let Some(ptr) = self.get().and_then(f).map(NonNull::from) else {
            return LocalShared::empty();
        };

        let (_, count) = self.into_parts();
        LocalShared::from_parts(Some(ptr), count)
    }

    /// Creates a handle in this ownership group that treats the element address as a `U`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the element address is valid for shared access as a `U`
    /// for as long as the ownership group is alive.
    #[must_use]
    #[inline]
    pub unsafe fn reinterpret_cast<U>(&self) -> LocalShared<U> {
        LocalShared::from_parts(self.ptr().map(NonNull::cast), self.count().cloned())
    }

    /// Consuming form of [`reinterpret_cast()`](Self::reinterpret_cast).
    ///
    /// # Safety
    ///
    /// Same as [`reinterpret_cast()`](Self::reinterpret_cast).
    #[must_use]
    #[inline]
    pub unsafe fn into_reinterpret_cast<U>(self) -> LocalShared<U> {
        let (ptr, count) = self.into_parts();

        LocalShared::from_parts(ptr.map(NonNull::cast), count)
    }

    /// Creates a handle in this ownership group that points at `ptr`.
    ///
    /// This is the unchecked form of [`map()`](Self::map), for addresses that cannot be reached
    /// through a reference to the element, or to keep a group alive through a handle that points
    /// at nothing. Aliasing an empty handle yields a handle that points at `ptr` but owns nothing.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr`, if present, stays valid for shared access for as
    /// long as the ownership group is alive (or, for an empty source, for as long as the new
    /// handle or any handle derived from it exists).
    #[must_use]
    #[inline]
    pub unsafe fn alias<U: ?Sized>(&self, ptr: Option<NonNull<U>>) -> LocalShared<U> {
        LocalShared::from_parts(ptr, self.count().cloned())
    }

    /// Consuming form of [`alias()`](Self::alias).
    ///
    /// # Safety
    ///
    /// Same as [`alias()`](Self::alias).
    #[must_use]
    #[inline]
    pub unsafe fn into_alias<U: ?Sized>(self, ptr: Option<NonNull<U>>) -> LocalShared<U> {
        let (_, count) = self.into_parts();

        LocalShared::from_parts(ptr, count)
    }
}

impl LocalShared<dyn Any> {
    /// Creates a handle in this ownership group for the concrete type `U`, if that is what the
    /// element is.
    ///
    /// Returns an empty handle if the element is not a `U`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::any::Any;
    ///
    /// use local_shared::LocalShared;
    ///
    /// let any: LocalShared<dyn Any> = LocalShared::new(5_u32).map(|x| x as &dyn Any);
    ///
    /// assert_eq!(*any.downcast::<u32>(), 5);
    /// assert!(any.downcast::<i64>().is_null());
    /// ```
    #[must_use]
    #[inline]
    pub fn downcast<U: Any>(&self) -> LocalShared<U> {
        self.dynamic_cast(|value| value.downcast_ref::<U>())
    }

    /// Consuming form of [`downcast()`](Self::downcast).
    ///
    /// If the element is not a `U`, this handle's share is released and an empty handle is
    /// returned.
    #[must_use]
    #[inline]
    pub fn into_downcast<U: Any>(self) -> LocalShared<U> {
        self.into_dynamic_cast(|value| value.downcast_ref::<U>())
    }
}
