use std::ptr::NonNull;

use crate::control_block::LocalCounted;
use crate::{LocalShared, LocalWeak};

/// A handle that identifies an ownership group, either [`LocalShared`] or [`LocalWeak`].
///
/// The owner-based comparisons accept any `OwnerHandle`, so owners and observers can be ordered
/// against each other.
///
/// This is a sealed trait. User code never needs to implement it.
#[expect(private_bounds, reason = "intentional - sealed trait")]
pub trait OwnerHandle: OwnerHandlePrivate {}

pub(crate) trait OwnerHandlePrivate {
    /// The control block of the ownership group, `None` for handles that own nothing.
    fn owner_key(&self) -> Option<NonNull<LocalCounted>>;
}

impl<T: ?Sized> OwnerHandlePrivate for LocalShared<T> {
    #[inline]
    fn owner_key(&self) -> Option<NonNull<LocalCounted>> {
        self.block()
    }
}
impl<T: ?Sized> OwnerHandle for LocalShared<T> {}

impl<T: ?Sized> OwnerHandlePrivate for LocalWeak<T> {
    #[inline]
    fn owner_key(&self) -> Option<NonNull<LocalCounted>> {
        self.block()
    }
}
impl<T: ?Sized> OwnerHandle for LocalWeak<T> {}
