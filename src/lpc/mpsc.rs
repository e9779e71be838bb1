//! Multi-producer/single-consumer intrusive lpc queue.
//!
//! Producers append by atomically swapping themselves in as the new tail and
//! then linking the previous tail's `next` to their node. The link into a
//! node is therefore written by the *following* producer, not by the node's
//! own producer.
//!
//! # The last-node race
//!
//! Between a producer's tail swap and its link store there is a window in
//! which the consumer sees a head whose `next` is null while the tail has
//! already moved on. The consumer must not treat that as "one item left":
//! it detects the case (its CAS of the tail back to null fails) and waits for
//! the in-flight producer to finish linking. The wait is a spin followed by
//! `yield_now`, which is only sound because producer critical sections are
//! two atomic operations long and never block.

use super::Lpc;
use crate::error::{usage_violation, UsageViolation};
use crate::tracing_compat::warn;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Spins on the last-node race before falling back to `yield_now`.
pub const DEFAULT_SPIN_BEFORE_YIELD: u32 = 128;

/// A lock-free MPSC FIFO of lpcs.
#[derive(Debug)]
pub struct MpscQueue {
    /// Consumer-side front. Producers write it only when the queue was empty.
    head: AtomicPtr<Lpc>,
    /// Most recently enqueued node; null when empty.
    tail: AtomicPtr<Lpc>,
    /// Set while a consumer is inside `dequeue`.
    consuming: AtomicBool,
    spin_before_yield: u32,
}

// SAFETY: linked nodes are owned by the queue and carry `Send` payloads.
// Producers only touch `tail`, `head` (when it was empty) and the `next`
// field of the node they displaced; the consumer side is serialized by the
// `consuming` flag.
unsafe impl Send for MpscQueue {}
// SAFETY: see above; all shared fields are atomics.
unsafe impl Sync for MpscQueue {}

/// Clears the consumer flag on drop.
struct ConsumerGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl MpscQueue {
    /// Creates a new empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_spin_limit(DEFAULT_SPIN_BEFORE_YIELD)
    }

    /// Creates a queue whose consumer spins `spins` times on the last-node
    /// race before yielding its time slice.
    #[must_use]
    pub const fn with_spin_limit(spins: u32) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            consuming: AtomicBool::new(false),
            spin_before_yield: spins,
        }
    }

    /// Returns true if nothing is queued or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire).is_null()
    }

    /// Appends an lpc. Safe to call from any thread.
    pub fn enqueue(&self, lpc: Box<Lpc>) {
        let (prev, raw) = self.swap_tail(lpc);
        self.link_after(prev, raw);
    }

    /// First half of an enqueue: publish `lpc` as the new tail.
    fn swap_tail(&self, lpc: Box<Lpc>) -> (*mut Lpc, *mut Lpc) {
        let raw = lpc.into_link();
        (self.tail.swap(raw, Ordering::AcqRel), raw)
    }

    /// Second half of an enqueue: make `raw` reachable from the head side.
    fn link_after(&self, prev: *mut Lpc, raw: *mut Lpc) {
        if prev.is_null() {
            self.head.store(raw, Ordering::Release);
        } else {
            // SAFETY: `prev` stays alive until its `next` is linked: the
            // consumer only frees a node after observing a non-null `next` or
            // after winning the CAS of the tail away from it, and we just
            // displaced it from the tail.
            unsafe { (*prev).link().store(raw, Ordering::Release) };
        }
    }

    /// Removes the lpc at the front.
    ///
    /// Only one thread may consume at a time; a second concurrent consumer is
    /// a usage violation.
    #[must_use]
    pub fn dequeue(&self) -> Option<Box<Lpc>> {
        let _guard = self.enter_consumer();

        let head = self.head.load(Ordering::Acquire);
        if head.is_null() {
            return None;
        }

        // SAFETY: `head` is live; only the consumer frees nodes.
        let next = unsafe { (*head).link().load(Ordering::Acquire) };
        if next.is_null() {
            self.head.store(ptr::null_mut(), Ordering::Relaxed);
            if self
                .tail
                .compare_exchange(head, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // A producer displaced `head` from the tail but has not
                // linked it yet.
                let next = self.wait_for_link(head);
                self.head.store(next, Ordering::Relaxed);
            }
        } else {
            self.head.store(next, Ordering::Relaxed);
        }

        // SAFETY: `head` is unlinked: either its successor became the new
        // head, or the queue was reset to empty.
        Some(unsafe { Lpc::from_link(head) })
    }

    /// Dequeues up to `max_n` lpcs in FIFO order, handing each to `visitor`.
    ///
    /// The visitor runs outside the consumer section, so it may enqueue into
    /// this queue or drain it recursively.
    pub fn burst<F>(&self, max_n: usize, mut visitor: F) -> usize
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

    fn enter_consumer(&self) -> ConsumerGuard<'_> {
        if self.consuming.swap(true, Ordering::Acquire) {
            usage_violation(
                UsageViolation::ConcurrentConsumer,
                "mpsc lpc queue already has an active consumer",
            );
        }
        ConsumerGuard {
            flag: &self.consuming,
        }
    }

    fn wait_for_link(&self, node: *mut Lpc) -> *mut Lpc {
        let mut spins: u32 = 0;
        loop {
            // SAFETY: `node` is live until we return it to the caller.
            let next = unsafe { (*node).link().load(Ordering::Acquire) };
            if !next.is_null() {
                return next;
            }
            if spins < self.spin_before_yield {
                std::hint::spin_loop();
            } else {
                if spins == self.spin_before_yield {
                    warn!(spins, "mpsc consumer waiting on an in-flight producer");
                }
                std::thread::yield_now();
            }
            spins = spins.saturating_add(1);
        }
    }
}

impl Default for MpscQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MpscQueue {
    fn drop(&mut self) {
        while let Some(lpc) = self.dequeue() {
            lpc.cancel();
        }
    }
}
