//! Integration tests for the public `local_shared` API.

use std::alloc::{GlobalAlloc, Layout, System};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashSet};
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::sync::Arc;

use local_shared::{Error, LocalShared};

#[derive(Debug, Default)]
struct Log {
    destroyed: Cell<usize>,
    deleted: RefCell<Vec<usize>>,
}

struct Widget {
    id: u32,
    parts: [u16; 4],
    log: Rc<Log>,
}

impl Drop for Widget {
    fn drop(&mut self) {
        self.log
            .destroyed
            .set(self.log.destroyed.get().wrapping_add(1));
    }
}

fn widget(log: &Rc<Log>) -> Widget {
    Widget {
        id: 1,
        parts: [10, 20, 30, 40],
        log: Rc::clone(log),
    }
}

fn raw_widget(log: &Rc<Log>) -> NonNull<Widget> {
    NonNull::from(Box::leak(Box::new(widget(log))))
}

fn recording_deleter(log: &Rc<Log>) -> impl FnOnce(NonNull<Widget>) + 'static {
    let log = Rc::clone(log);

    move |ptr: NonNull<Widget>| {
        log.deleted.borrow_mut().push(ptr.as_ptr() as usize);
        // SAFETY: Every address handed to this deleter came from `Box::leak`.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

#[test]
fn widget_destroyed_exactly_once_with_last_handle() {
    let log = Rc::new(Log::default());
    let raw = Box::into_raw(Box::new(widget(&log)));

    // SAFETY: The address came from `Box::into_raw` and nothing else adopts it.
    let first = unsafe { LocalShared::from_raw(NonNull::new(raw).unwrap()) };
    assert_eq!(first.local_use_count(), 1);

    let second = first.clone();
    assert_eq!(first.local_use_count(), 2);
    assert_eq!(second.local_use_count(), 2);

    drop(first);
    assert_eq!(second.local_use_count(), 1);
    assert_eq!(log.destroyed.get(), 0);

    drop(second);
    assert_eq!(log.destroyed.get(), 1);
}

#[test]
fn copy_survives_original() {
    let log = Rc::new(Log::default());
    let original = LocalShared::new(widget(&log));
    let address = original.ptr();

    let copy = original.clone();
    drop(original);

    assert_eq!(copy.ptr(), address);
    assert_eq!(copy.id, 1);
    assert_eq!(log.destroyed.get(), 0);
}

#[test]
fn count_matches_live_handles() {
    let first = LocalShared::new(0_u8);
    let mut handles = vec![first.clone(), first.clone(), first.clone()];

    for handle in &handles {
        assert_eq!(handle.local_use_count(), 4);
    }

    handles.pop();
    assert_eq!(first.local_use_count(), 3);

    handles.clear();
    assert_eq!(first.local_use_count(), 1);
}

#[test]
fn deleter_invoked_once_with_adopted_address() {
    let log = Rc::new(Log::default());
    let raw = raw_widget(&log);

    // SAFETY: The deleter releases the address the same way it was acquired.
    let first = unsafe { LocalShared::from_raw_with_deleter(raw, recording_deleter(&log)) };
    let second = first.clone();

    drop(first);
    assert!(log.deleted.borrow().is_empty());

    drop(second);
    assert_eq!(*log.deleted.borrow(), vec![raw.as_ptr() as usize]);
    assert_eq!(log.destroyed.get(), 1);
}

#[test]
fn alias_keeps_whole_object_alive() {
    let log = Rc::new(Log::default());
    let raw = raw_widget(&log);

    // SAFETY: The deleter releases the address the same way it was acquired.
    let mut owner = unsafe { LocalShared::from_raw_with_deleter(raw, recording_deleter(&log)) };
    let count_before = owner.local_use_count();

    let third_part = NonNull::from(&owner.parts[2]);
    // SAFETY: The part lives inside the guarded widget, which lives as long as the group.
    let part = unsafe { owner.alias(Some(third_part)) };

    assert_eq!(part.ptr(), Some(third_part));
    assert_eq!(part.local_use_count(), count_before + 1);
    assert_eq!(*part, 30);

    owner.reset();
    assert!(log.deleted.borrow().is_empty());
    assert_eq!(*part, 30);

    drop(part);
    assert_eq!(log.deleted.borrow().len(), 1);
}

#[test]
fn reset_alias_joins_other_group() {
    let owner = LocalShared::new([1_u64, 2, 3]);
    let mut handle = LocalShared::new(0_u64);

    let last = NonNull::from(&owner[2]);
    // SAFETY: The element lives inside the guarded array.
    unsafe {
        handle.reset_alias(&owner, Some(last));
    }

    assert_eq!(*handle, 3);
    assert!(handle.owner_eq(&owner));
    assert_eq!(owner.local_use_count(), 2);
}

#[test]
fn dynamic_cast_to_unrelated_type_is_empty() {
    let log = Rc::new(Log::default());
    let source: LocalShared<dyn Any> = LocalShared::new(widget(&log)).into_map(|w| w as &dyn Any);

    let target = source.downcast::<String>();

    assert!(target.is_null());
    assert_eq!(target.local_use_count(), 0);
    assert_eq!(source.local_use_count(), 1);
    assert_eq!(log.destroyed.get(), 0);

    let concrete = source.downcast::<Widget>();
    assert_eq!(concrete.id, 1);
    assert_eq!(source.local_use_count(), 2);
}

#[test]
fn arc_round_trip_keeps_address_and_resource() {
    let arc = Arc::new(String::from("round trip"));
    let address = Arc::as_ptr(&arc);

    let local = LocalShared::<String>::from(Arc::clone(&arc));
    assert_eq!(local.ptr().map(|p| p.as_ptr().cast_const()), Some(address));

    let weak = Arc::downgrade(&arc);
    drop(arc);
    assert!(weak.upgrade().is_some());
    assert_eq!(*local, "round trip");

    drop(local);
    assert!(weak.upgrade().is_none());
}

#[test]
fn aliases_are_unequal_but_owner_equivalent() {
    let owner = LocalShared::new((1_u32, 2_u32));

    let left = owner.map(|pair| &pair.0);
    let right = owner.map(|pair| &pair.1);

    assert_ne!(left, right);
    assert!(!left.owner_before(&right));
    assert!(!right.owner_before(&left));
}

#[test]
fn handles_work_as_set_keys() {
    let a = LocalShared::new(1_u32);
    let b = LocalShared::new(1_u32);

    let hashed: HashSet<_> = [a.clone(), b.clone(), a.clone()].into_iter().collect();
    let ordered: BTreeSet<_> = [b.clone(), a.clone(), b].into_iter().collect();

    assert_eq!(hashed.len(), 2);
    assert_eq!(ordered.len(), 2);
    assert!(hashed.contains(&a));
}

#[test]
fn weak_observer_outlives_resource() {
    let log = Rc::new(Log::default());
    let owner = LocalShared::new(widget(&log));
    let weak = owner.downgrade();

    assert_eq!(weak.upgrade().map(|w| w.id), Some(1));

    drop(owner);

    assert_eq!(log.destroyed.get(), 1);
    assert!(weak.expired());
    assert!(weak.upgrade().is_none());
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
fn allocation_failure_runs_deleter_once() {
    let log = Rc::new(Log::default());
    let raw = raw_widget(&log);

    // SAFETY: The deleter releases the address the same way it was acquired.
    let result =
        unsafe { LocalShared::try_from_raw_in(raw, recording_deleter(&log), FailingAlloc) };

    assert!(matches!(result, Err(Error::AllocationFailed { .. })));
    assert_eq!(*log.deleted.borrow(), vec![raw.as_ptr() as usize]);
    assert_eq!(log.destroyed.get(), 1);
}

#[derive(Clone, Default)]
struct CountingAlloc {
    allocs: Rc<Cell<usize>>,
    deallocs: Rc<Cell<usize>>,
}

// SAFETY: Forwards to the system allocator, only counting calls on the way.
unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocs.set(self.allocs.get().wrapping_add(1));

        // SAFETY: Forwarding the caller's guarantees.
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.deallocs.set(self.deallocs.get().wrapping_add(1));

        // SAFETY: Forwarding the caller's guarantees.
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[test]
fn custom_allocator_sees_one_block() {
    let alloc = CountingAlloc::default();

    let first = LocalShared::new_in(String::from("counted"), alloc.clone());
    let second = first.clone();
    let weak = second.downgrade();

    assert_eq!(alloc.allocs.get(), 1);

    drop(first);
    drop(second);
    assert_eq!(alloc.deallocs.get(), 0);

    drop(weak);
    assert_eq!(alloc.allocs.get(), 1);
    assert_eq!(alloc.deallocs.get(), 1);
}
