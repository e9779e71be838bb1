//! Single-threaded intrusive lpc queue.
//!
//! The queue stores only a head pointer, a tail pointer derived from the last
//! push, and a length. The links themselves live in the [`Lpc`] nodes, so
//! push and pop perform no allocation.
//!
//! # Invariants
//!
//! - If `head` is null, then `tail` is null and `len == 0`
//! - If `head` is non-null, then `tail` is non-null and `len > 0`
//! - Following `next` from `head` reaches `tail` after `len - 1` hops
//! - `tail.next` is null

use super::Lpc;
use std::ptr;
use std::sync::atomic::Ordering;

/// A FIFO of lpcs owned by a single logical thread.
#[derive(Debug)]
pub struct IntrusiveQueue {
    head: *mut Lpc,
    tail: *mut Lpc,
    len: usize,
}

// SAFETY: the queue uniquely owns every linked node, and every node's payload
// is `Send`. Moving the queue moves ownership of the whole chain.
unsafe impl Send for IntrusiveQueue {}

impl IntrusiveQueue {
    /// Creates a new empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
        }
    }

    /// Returns the number of queued lpcs.
    #[must_use]
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the queue is empty.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Appends an lpc at the back.
    ///
    /// O(1) time, O(0) allocations.
    pub fn enqueue(&mut self, lpc: Box<Lpc>) {
        let raw = lpc.into_link();
        if self.tail.is_null() {
            self.head = raw;
        } else {
            // SAFETY: a non-null tail is a live node owned by this queue.
            unsafe { (*self.tail).link().store(raw, Ordering::Relaxed) };
        }
        self.tail = raw;
        self.len += 1;
    }

    /// Removes the lpc at the front.
    ///
    /// O(1) time, O(0) allocations.
    #[must_use]
    pub fn dequeue(&mut self) -> Option<Box<Lpc>> {
        if self.head.is_null() {
            return None;
        }
        let raw = self.head;
        // SAFETY: a non-null head is a live node owned by this queue.
        let next = unsafe { (*raw).link().load(Ordering::Relaxed) };
        self.head = next;
        if next.is_null() {
            self.tail = ptr::null_mut();
        }
        self.len -= 1;
        // SAFETY: `raw` has just been unlinked and is reachable from nowhere else.
        Some(unsafe { Lpc::from_link(raw) })
    }

    /// Dequeues up to `max_n` lpcs in FIFO order, handing each to `visitor`.
    ///
    /// Returns the number visited. Callers that need a snapshot of the current
    /// contents should [`detach`](Self::detach) first.
    pub fn burst<F>(&mut self, max_n: usize, mut visitor: F) -> usize
    where
        F: FnMut(Box<Lpc>),
    {
        let mut count = 0;
        while count < max_n {
            let Some(lpc) = self.dequeue() else {
                break;
            };
            visitor(lpc);
            count += 1;
        }
        count
    }

    /// Splits off the first `max_n` lpcs into a new queue, preserving order.
    #[must_use]
    pub fn detach(&mut self, max_n: usize) -> Self {
        if max_n >= self.len {
            return std::mem::take(self);
        }
        let mut front = Self::new();
        for _ in 0..max_n {
            match self.dequeue() {
                Some(lpc) => front.enqueue(lpc),
                None => break,
            }
        }
        front
    }

    /// Moves every lpc of `other` to the back of `self` in O(1).
    pub fn append(&mut self, mut other: Self) {
        if other.head.is_null() {
            return;
        }
        if self.tail.is_null() {
            self.head = other.head;
        } else {
            // SAFETY: a non-null tail is a live node owned by this queue.
            unsafe { (*self.tail).link().store(other.head, Ordering::Relaxed) };
        }
        self.tail = other.tail;
        self.len += other.len;
        other.head = ptr::null_mut();
        other.tail = ptr::null_mut();
        other.len = 0;
    }

    /// Drops every queued lpc without running it.
    pub fn clear(&mut self) {
        while let Some(lpc) = self.dequeue() {
            lpc.cancel();
        }
    }
}

impl Default for IntrusiveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrusiveQueue {
    fn drop(&mut self) {
        self.clear();
    }
}
