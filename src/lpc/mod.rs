//! Intrusive deferred-call ("lpc") queues.
//!
//! An [`Lpc`] is a heap node that carries exactly one link field plus a
//! type-erased callable. The same link field threads the node through either
//! queue flavour:
//!
//! - [`IntrusiveQueue`]: single-threaded; producer and consumer are the same
//!   logical owner. O(1) push/pop with no synchronization.
//! - [`MpscQueue`]: any thread may enqueue while the single consumer drains.
//!
//! Both share the contract `enqueue(item)`, `dequeue() -> item`,
//! `burst(max_n, visitor) -> count` and `is_empty()`.
//!
//! A node is owned by exactly one place at a time: the caller before it is
//! enqueued, a queue while linked, and the executing thread after dequeue.
//! Dropping an `Lpc` without executing it cancels it (its closure is dropped).
//!
//! This is the only module in the crate that uses `unsafe`: the links are raw
//! pointers produced by `Box::into_raw` and reclaimed with `Box::from_raw`.

#![allow(unsafe_code)]

pub mod intrusive;
pub mod mpsc;

pub use intrusive::IntrusiveQueue;
pub use mpsc::MpscQueue;

use core::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A deferred callback, queued for later execution on a persona.
pub struct Lpc {
    /// Intrusive link shared by every queue flavour.
    next: AtomicPtr<Lpc>,
    work: Box<dyn FnOnce() + Send>,
}

impl Lpc {
    /// Wraps `f` in a fresh, unlinked node.
    #[must_use]
    pub fn new<F>(f: F) -> Box<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Box::new(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            work: Box::new(f),
        })
    }

    /// Runs the callback, consuming the node.
    pub fn execute(self: Box<Self>) {
        let Self { work, .. } = *self;
        work();
    }

    /// Drops the callback without running it.
    pub fn cancel(self: Box<Self>) {
        drop(self);
    }

    #[inline]
    pub(crate) fn link(&self) -> &AtomicPtr<Self> {
        &self.next
    }

    /// Converts an owned node into a raw queue link, clearing its next field.
    #[inline]
    pub(crate) fn into_link(self: Box<Self>) -> *mut Self {
        self.next.store(ptr::null_mut(), Ordering::Relaxed);
        Box::into_raw(self)
    }

    /// Reclaims ownership of a node previously produced by [`Self::into_link`].
    ///
    /// # Safety
    ///
    /// `raw` must come from `into_link`, must not be reachable from any queue
    /// any more, and must not have been reclaimed already.
    #[inline]
    pub(crate) unsafe fn from_link(raw: *mut Self) -> Box<Self> {
        let node = Box::from_raw(raw);
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        node
    }
}

impl fmt::Debug for Lpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lpc")
            .field("linked", &!self.next.load(Ordering::Relaxed).is_null())
            .finish_non_exhaustive()
    }
}
