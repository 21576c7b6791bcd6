use std::alloc::Layout;

use thiserror::Error;

/// Errors that can occur when creating a new ownership group.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The allocator could not provide memory for a new control block.
    ///
    /// By the time the caller sees this error, the resource that was about to be adopted has
    /// already been released (its value dropped, its deleter called or its `Arc` released).
    #[error("failed to allocate control block with layout {layout:?}")]
    AllocationFailed {
        /// The layout of the control block that could not be allocated.
        layout: Layout,
    },
}

/// A specialized `Result` type for `local_shared` operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn allocation_failed_mentions_layout() {
        let error = Error::AllocationFailed {
            layout: Layout::new::<u64>(),
        };

        let message = error.to_string();
        assert!(message.starts_with("failed to allocate control block"));
        assert!(message.contains("size: 8"));
    }
}
