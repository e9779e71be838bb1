//! Personas: exclusively-owned execution contexts with deferred-work inboxes.
//!
//! A [`Persona`] owns four lpc inboxes, one per (self, peer) × (internal,
//! user) pair. Work enqueued by the owning thread lands in the self inbox,
//! which only the owner touches; work from any other thread goes to the
//! lock-free peer inbox. Only the owner drains, and it does so inside
//! [`progress`].
//!
//! At most one thread owns a persona at a time. A thread takes ownership by
//! pushing the persona on its persona stack ([`Persona::acquire`]) and gives
//! it back when the last of its nested [`PersonaScope`]s drops.
//!
//! Every thread lazily gets a *default persona* at the bottom of its stack,
//! so a freshly spawned thread can enqueue, wait and make progress without
//! any setup.

pub(crate) mod context;
pub mod progress;
pub mod scope;

pub use context::{current_persona, default_persona};
pub use progress::{discharge, progress, progress_required};
pub use scope::{LockedPersonaScope, PersonaScope};

use crate::error::{usage_violation, Error, ErrorKind, Result, UsageViolation};
use crate::lpc::{IntrusiveQueue, Lpc, MpscQueue};
use crate::tracing_compat::{debug, trace};
use context::ThreadToken;
use core::fmt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Priority class of deferred work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgressLevel {
    /// Runtime-internal work. Always permitted, drained first.
    Internal,
    /// Application-visible callbacks. Never re-entered on one thread.
    User,
}

/// Process-unique persona identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersonaId(u64);

impl PersonaId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "persona#{}", self.0)
    }
}

/// Inboxes for one progress level.
#[derive(Debug)]
struct Inbox {
    /// Touched only by the owning thread.
    local: Mutex<IntrusiveQueue>,
    /// Any thread may enqueue; only the owner drains.
    peer: MpscQueue,
}

impl Inbox {
    fn new(spin_before_yield: u32) -> Self {
        Self {
            local: Mutex::new(IntrusiveQueue::new()),
            peer: MpscQueue::with_spin_limit(spin_before_yield),
        }
    }

    fn is_empty(&self) -> bool {
        self.local.lock().is_empty() && self.peer.is_empty()
    }

    /// Runs up to `max_n` lpcs from each inbox, self first.
    fn burst(&self, max_n: usize) -> usize {
        // Detach before running so callbacks may enqueue here again.
        let mut batch = self.local.lock().detach(max_n);
        let mut ran = batch.burst(usize::MAX, Lpc::execute);
        ran += self.peer.burst(max_n, Lpc::execute);
        ran
    }
}

pub(crate) struct PersonaInner {
    id: PersonaId,
    /// Token of the owning thread, zero when unowned.
    owner: AtomicU64,
    /// Nesting depth of the owner's activations. Owner-only.
    activations: AtomicUsize,
    internal: Inbox,
    user: Inbox,
}

/// A schedulable execution context. Cloning yields another handle to the
/// same persona.
#[derive(Clone)]
pub struct Persona {
    inner: Arc<PersonaInner>,
}

impl Persona {
    /// Creates a new, unowned persona.
    #[must_use]
    pub fn new() -> Self {
        Self::build(0, 0)
    }

    /// Creates a persona already held once by `owner`.
    pub(crate) fn new_owned_by(owner: ThreadToken) -> Self {
        Self::build(owner.get(), 1)
    }

    fn build(owner: u64, activations: usize) -> Self {
        let spins = crate::runtime::tuning().spin_before_yield;
        let inner = PersonaInner {
            id: PersonaId::next(),
            owner: AtomicU64::new(owner),
            activations: AtomicUsize::new(activations),
            internal: Inbox::new(spins),
            user: Inbox::new(spins),
        };
        trace!(persona = %inner.id, owner, "persona created");
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns this persona's id.
    #[must_use]
    pub fn id(&self) -> PersonaId {
        self.inner.id
    }

    /// Returns true if some thread currently owns this persona.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.inner.owner.load(Ordering::Acquire) != 0
    }

    /// Returns true if the calling thread owns this persona.
    #[must_use]
    pub fn active_with_caller(&self) -> bool {
        self.inner.owner.load(Ordering::Acquire) == ThreadToken::current().get()
    }

    /// Returns true if any inbox holds work.
    #[must_use]
    pub fn has_queued_work(&self) -> bool {
        !self.inner.internal.is_empty() || !self.inner.user.is_empty()
    }

    /// Pushes this persona on the calling thread's stack.
    ///
    /// Re-acquiring a persona the caller already holds is a cheap nested
    /// push. Acquiring one that another thread owns is a usage violation;
    /// use [`try_acquire`](Self::try_acquire) to get an error instead.
    #[must_use = "the persona is released when the scope is dropped"]
    #[track_caller]
    pub fn acquire(&self) -> PersonaScope {
        match self.try_acquire() {
            Ok(scope) => scope,
            Err(err) => usage_violation(UsageViolation::PersonaOwnedElsewhere, err),
        }
    }

    /// Pushes this persona on the calling thread's stack, failing if another
    /// thread owns it.
    pub fn try_acquire(&self) -> Result<PersonaScope> {
        self.activate(ThreadToken::current())?;
        Ok(PersonaScope::push(self.clone()))
    }

    /// Acquires `lock`, then this persona. Both are released when the
    /// returned scope drops, the persona first.
    ///
    /// Threads that share a persona serialize on `lock` instead of racing on
    /// [`acquire`](Self::acquire).
    #[must_use = "the persona is released when the scope is dropped"]
    pub fn acquire_with_lock<'a>(&self, lock: &'a Mutex<()>) -> LockedPersonaScope<'a> {
        let guard = lock.lock();
        LockedPersonaScope::new(self.acquire(), guard)
    }

    /// Queues `lpc` at `level`.
    ///
    /// The owning thread's work goes to the self inbox; everyone else's goes
    /// to the thread-safe peer inbox.
    pub fn enqueue(&self, level: ProgressLevel, lpc: Box<Lpc>) {
        let inbox = self.inbox(level);
        if self.active_with_caller() {
            trace!(persona = %self.inner.id, ?level, "lpc enqueued (self)");
            inbox.local.lock().enqueue(lpc);
        } else {
            trace!(persona = %self.inner.id, ?level, "lpc enqueued (peer)");
            inbox.peer.enqueue(lpc);
        }
    }

    /// Queues `f` at `level`.
    pub fn enqueue_fn<F>(&self, level: ProgressLevel, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(level, Lpc::new(f));
    }

    /// Runs `f` immediately when the caller owns this persona, otherwise
    /// queues it at `level`.
    ///
    /// This is how state that belongs to a persona (promise counters, future
    /// headers created on it) keeps a single writer.
    pub fn run_or_defer<F>(&self, level: ProgressLevel, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.active_with_caller() {
            f();
        } else {
            self.enqueue_fn(level, f);
        }
    }

    fn inbox(&self, level: ProgressLevel) -> &Inbox {
        match level {
            ProgressLevel::Internal => &self.inner.internal,
            ProgressLevel::User => &self.inner.user,
        }
    }

    /// Drains up to `max_n` lpcs per inbox at `level`. Owner only.
    pub(crate) fn burst(&self, level: ProgressLevel, max_n: usize) -> usize {
        debug_assert!(self.active_with_caller(), "burst on a persona the caller does not own");
        let ran = self.inbox(level).burst(max_n);
        if ran > 0 {
            trace!(persona = %self.inner.id, ?level, ran, "burst");
        }
        ran
    }

    fn activate(&self, me: ThreadToken) -> Result<()> {
        let me = me.get();
        let owner = self.inner.owner.load(Ordering::Acquire);
        if owner == me {
            self.inner.activations.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        match self
            .inner
            .owner
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.inner.activations.store(1, Ordering::Relaxed);
                debug!(persona = %self.inner.id, thread = me, "persona acquired");
                Ok(())
            }
            Err(other) => Err(Error::new(ErrorKind::PersonaOwned).with_message(format!(
                "{} is owned by thread {other}",
                self.inner.id
            ))),
        }
    }

    /// Pops one activation; clears ownership on the last.
    fn deactivate(&self) {
        if self.inner.activations.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.inner.owner.store(0, Ordering::Release);
            debug!(persona = %self.inner.id, "persona released");
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Persona {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Persona {}

impl fmt::Debug for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persona")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn new_persona_is_unowned() {
        init_test("new_persona_is_unowned");
        let persona = Persona::new();
        assert!(!persona.is_owned());
        assert!(!persona.active_with_caller());
        assert!(!persona.has_queued_work());
        crate::test_complete!("new_persona_is_unowned");
    }

    #[test]
    fn acquire_and_release_ownership() {
        init_test("acquire_and_release_ownership");
        let persona = Persona::new();
        {
            let _scope = persona.acquire();
            assert!(persona.active_with_caller());
            {
                let _nested = persona.acquire();
                assert!(persona.active_with_caller());
            }
            assert!(persona.active_with_caller());
        }
        assert!(!persona.is_owned());
        crate::test_complete!("acquire_and_release_ownership");
    }

    #[test]
    fn enqueue_routes_by_ownership() {
        init_test("enqueue_routes_by_ownership");
        let persona = Persona::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        persona.enqueue_fn(ProgressLevel::User, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!persona.inner.user.peer.is_empty());
        assert!(persona.inner.user.local.lock().is_empty());

        let _scope = persona.acquire();
        let h = Arc::clone(&hits);
        persona.enqueue_fn(ProgressLevel::User, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(persona.inner.user.local.lock().len(), 1);

        assert_eq!(persona.burst(ProgressLevel::User, 16), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!persona.has_queued_work());
        crate::test_complete!("enqueue_routes_by_ownership");
    }

    #[test]
    fn run_or_defer_inline_for_owner() {
        init_test("run_or_defer_inline_for_owner");
        let persona = Persona::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _scope = persona.acquire();
        let h = Arc::clone(&hits);
        persona.run_or_defer(ProgressLevel::User, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!persona.has_queued_work());
        crate::test_complete!("run_or_defer_inline_for_owner");
    }

    #[test]
    fn run_or_defer_queues_for_others() {
        init_test("run_or_defer_queues_for_others");
        let persona = Persona::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        persona.run_or_defer(ProgressLevel::Internal, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(persona.has_queued_work());
        crate::test_complete!("run_or_defer_queues_for_others");
    }

    #[test]
    fn try_acquire_fails_when_owned_elsewhere() {
        init_test("try_acquire_fails_when_owned_elsewhere");
        let persona = Persona::new();
        let held = Arc::new(Barrier::new(2));
        let done = Arc::new(Barrier::new(2));

        let p = persona.clone();
        let (h, d) = (Arc::clone(&held), Arc::clone(&done));
        let owner = thread::spawn(move || {
            let _scope = p.acquire();
            h.wait();
            d.wait();
        });

        held.wait();
        let err = persona.try_acquire().expect_err("persona is held elsewhere");
        assert_eq!(err.kind(), ErrorKind::PersonaOwned);
        done.wait();
        owner.join().expect("owner thread panicked");

        assert!(persona.try_acquire().is_ok());
        crate::test_complete!("try_acquire_fails_when_owned_elsewhere");
    }

    #[test]
    fn acquire_with_lock_serializes_threads() {
        init_test("acquire_with_lock_serializes_threads");
        let persona = Persona::new();
        let lock = Arc::new(Mutex::new(()));
        let hits = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (p, l, h) = (persona.clone(), Arc::clone(&lock), Arc::clone(&hits));
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _scope = p.acquire_with_lock(&l);
                        assert!(p.active_with_caller());
                        h.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 200);
        assert!(!persona.is_owned());
        crate::test_complete!("acquire_with_lock_serializes_threads");
    }
}
