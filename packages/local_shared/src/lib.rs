#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A single-threaded reference-counted pointer with aliasing, casting and [`Arc`] interop.
//!
//! [`LocalShared<T>`] is a shared-ownership handle whose reference counts are plain integers. It
//! fills the gap between [`Rc`], which can only own values it allocated itself, and [`Arc`], which
//! pays for atomic counting on every clone:
//!
//! - **Any resource**: owns an inline value, a [`Box`], an address released by a caller-supplied
//!   deleter or a strong reference checked out of an [`Arc`].
//! - **Aliasing**: a handle can point at a field, an element or a trait object view of the owned
//!   resource while keeping the whole resource alive.
//! - **Casting**: checked downcasts through [`Any`](std::any::Any), custom runtime casts and
//!   unchecked reinterpretation, all within the same ownership group.
//! - **Custom allocators**: the control block can be placed in any [`GlobalAlloc`] via the
//!   `*_in` constructors, with [`Global`] as the default.
//! - **Fallible construction**: every allocating operation has a `try_` form that returns
//!   [`Error::AllocationFailed`] after releasing the resource it was given.
//! - **Observers**: [`LocalWeak<T>`] tracks whether a group is still alive without keeping it
//!   alive.
//!
//! Handles are neither [`Send`] nor [`Sync`], so the unsynchronized counts can never be touched
//! from two threads at once.
//!
//! # Example
//!
//! ```rust
//! use std::fmt::Display;
//! use std::sync::Arc;
//!
//! use local_shared::LocalShared;
//!
//! struct Widget {
//!     name: String,
//!     size: u32,
//! }
//!
//! let widget = LocalShared::new(Widget {
//!     name: "knob".to_string(),
//!     size: 3,
//! });
//!
//! // A handle to one field keeps the whole widget alive.
//! let name = widget.map(|w| &w.name);
//! let size: LocalShared<dyn Display> = widget.map(|w| &w.size as &dyn Display);
//! drop(widget);
//!
//! assert_eq!(*name, "knob");
//! assert_eq!(size.to_string(), "3");
//! assert_eq!(name.local_use_count(), 2);
//!
//! // Thread-safe ownership can be checked out for single-threaded work.
//! let shared = Arc::new(vec![1, 2, 3]);
//! let local = LocalShared::<Vec<i32>>::from(&shared);
//! let local_copy = local.clone();
//!
//! assert_eq!(local_copy.len(), 3);
//! assert_eq!(Arc::strong_count(&shared), 2);
//! ```
//!
//! [`Rc`]: std::rc::Rc
//! [`Arc`]: std::sync::Arc
//! [`GlobalAlloc`]: std::alloc::GlobalAlloc

mod casts;
mod cleanup;
mod control_block;
mod conversions;
mod error;
mod global;
mod local_shared;
mod local_weak;
mod owner;

pub use error::*;
pub use global::*;
pub use local_shared::*;
pub use local_weak::*;
pub use owner::OwnerHandle;
