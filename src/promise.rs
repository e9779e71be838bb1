//! Promises: contribution-counting producers of futures.
//!
//! A [`Promise`] tracks an outstanding-contribution counter. Producers
//! register work with [`require_anonymous`](Promise::require_anonymous) and
//! retire it with [`fulfill_anonymous`](Promise::fulfill_anonymous); the
//! owner closes registration with [`finalize`](Promise::finalize). The
//! promise's future becomes ready when the counter is zero *and* the promise
//! is finalized.
//!
//! ```text
//! collecting --require(n)--> collecting (pending += n)
//! collecting --fulfill(k)--> collecting (pending -= k)
//! collecting --finalize()--> closed
//! closed, pending == 0  ---> future ready
//! ```
//!
//! The readiness transition always happens on the promise's *home* persona
//! (the caller's current persona at construction). Fulfillments from any
//! other thread are accumulated and applied by a single lpc queued on the
//! home persona; at most one such lpc is queued at a time.
//!
//! A `Promise<()>` carries its unit value from the start. A `Promise<T>` for
//! any other `T` must receive [`fulfill_result`](Promise::fulfill_result)
//! before it becomes ready.

use crate::error::{usage_violation, Result, UsageViolation};
use crate::future::header::Header;
use crate::future::{Future, Value};
use crate::persona::{current_persona, Persona, ProgressLevel};
use crate::tracing_compat::{debug, trace};
use core::fmt;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct State<T> {
    pending: usize,
    finalized: bool,
    readied: bool,
    value: Option<T>,
    result_set: bool,
}

struct Cell<T> {
    header: Arc<Header<T>>,
    home: Persona,
    state: Mutex<State<T>>,
    /// Fulfillments posted by threads that do not own `home`.
    deferred: AtomicUsize,
    /// Set while an lpc applying `deferred` sits in `home`'s queue.
    enqueued: AtomicBool,
    unit: bool,
}

/// A producer-side handle that readies a [`Future`] once every registered
/// contribution has been fulfilled and the promise is finalized.
pub struct Promise<T: Value = ()> {
    cell: Arc<Cell<T>>,
}

/// The unit value, if `T` is `()`.
fn unit_value<T: 'static>() -> Option<T> {
    let unit: Box<dyn Any> = Box::new(());
    unit.downcast::<T>().ok().map(|boxed| *boxed)
}

impl<T: Value> Promise<T> {
    /// Creates a promise homed on the caller's current persona.
    ///
    /// Exhausting the live-header budget here is a usage violation; use
    /// [`try_new`](Self::try_new) to get an error instead.
    #[must_use]
    #[track_caller]
    pub fn new() -> Self {
        let header = Header::pending();
        Self::with_header(header)
    }

    /// Creates a promise, failing if the live-header budget is spent.
    pub fn try_new() -> Result<Self> {
        Ok(Self::with_header(Header::try_pending()?))
    }

    fn with_header(header: Arc<Header<T>>) -> Self {
        let value = unit_value::<T>();
        let unit = value.is_some();
        Self {
            cell: Arc::new(Cell {
                header,
                home: current_persona(),
                state: Mutex::new(State {
                    pending: 0,
                    finalized: false,
                    readied: false,
                    value,
                    result_set: false,
                }),
                deferred: AtomicUsize::new(0),
                enqueued: AtomicBool::new(false),
                unit,
            }),
        }
    }

    /// The future this promise will ready.
    #[must_use]
    pub fn get_future(&self) -> Future<T> {
        Future::from_header(Arc::clone(&self.cell.header))
    }

    /// The persona on which readiness is applied.
    #[must_use]
    pub fn home(&self) -> &Persona {
        &self.cell.home
    }

    /// Outstanding contributions as seen by the home persona.
    ///
    /// Fulfillments from other threads are deferred until the home persona
    /// makes progress, and count as outstanding until then.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.cell.state.lock().pending
    }

    /// Returns true once [`finalize`](Self::finalize) has been called.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.cell.state.lock().finalized
    }

    /// Registers `n` more outstanding contributions.
    ///
    /// Takes effect immediately on any thread. Registering after the
    /// promise became ready is a usage violation.
    #[track_caller]
    pub fn require_anonymous(&self, n: usize) {
        let mut state = self.cell.state.lock();
        if state.readied {
            drop(state);
            usage_violation(
                UsageViolation::PromiseOverFulfilled,
                "require_anonymous on a ready promise",
            );
        }
        state.pending += n;
        trace!(n, pending = state.pending, "promise require");
    }

    /// Retires `k` contributions.
    ///
    /// On the home persona's owner this applies immediately and may ready
    /// the future inline; anywhere else it is deferred to the home persona.
    #[track_caller]
    pub fn fulfill_anonymous(&self, k: usize) {
        if k > 0 {
            self.settle(k);
        }
    }

    /// Supplies the value the future will carry.
    ///
    /// Calling this twice on a non-unit promise is a usage violation. On a
    /// `Promise<()>` it may be called any number of times.
    #[track_caller]
    pub fn fulfill_result(&self, value: T) {
        let mut state = self.cell.state.lock();
        if !self.cell.unit && (state.result_set || state.readied) {
            drop(state);
            usage_violation(UsageViolation::ResultAlreadySet, "Promise::fulfill_result");
        }
        if !state.readied {
            state.value = Some(value);
        }
        state.result_set = true;
    }

    /// Closes registration and returns the future.
    ///
    /// Calling this twice is a usage violation.
    #[track_caller]
    pub fn finalize(&self) -> Future<T> {
        {
            let mut state = self.cell.state.lock();
            if state.finalized {
                drop(state);
                usage_violation(UsageViolation::PromiseFinalizedTwice, "Promise::finalize");
            }
            state.finalized = true;
            debug!(pending = state.pending, "promise finalized");
        }
        self.settle(0);
        self.get_future()
    }

    /// Applies `k` fulfillments on the home persona, inline if possible.
    #[track_caller]
    fn settle(&self, k: usize) {
        if self.cell.home.active_with_caller() {
            self.cell.apply(k);
            return;
        }
        self.cell.deferred.fetch_add(k, Ordering::AcqRel);
        if !self.cell.enqueued.swap(true, Ordering::AcqRel) {
            let cell = Arc::clone(&self.cell);
            trace!(home = %self.cell.home.id(), "promise settle deferred");
            self.cell
                .home
                .enqueue_fn(ProgressLevel::User, move || cell.drain_deferred());
        }
    }
}

impl<T: Value> Cell<T> {
    fn drain_deferred(&self) {
        self.enqueued.store(false, Ordering::Release);
        let k = self.deferred.swap(0, Ordering::AcqRel);
        self.apply(k);
    }

    #[track_caller]
    fn apply(&self, k: usize) {
        let value = {
            let mut state = self.state.lock();
            if k > state.pending {
                let detail = format!("fulfilled {k} with {} pending", state.pending);
                drop(state);
                usage_violation(UsageViolation::PromiseOverFulfilled, detail);
            }
            state.pending -= k;
            if state.pending > 0 || !state.finalized || state.readied {
                return;
            }
            state.readied = true;
            state.value.take()
        };
        match value {
            Some(value) => {
                debug!("promise ready");
                self.header.enter_ready(value);
            }
            None => usage_violation(
                UsageViolation::ResultNotReady,
                "promise completed without fulfill_result",
            ),
        }
    }
}

impl<T: Value> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Value> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Value> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.state.lock();
        f.debug_struct("Promise")
            .field("home", &self.cell.home.id())
            .field("pending", &state.pending)
            .field("finalized", &state.finalized)
            .field("ready", &state.readied)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::FutureStatus;
    use crate::persona::progress;
    use crate::test_utils::{init_test_logging, progress_until_ready};
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn finalize_with_nothing_pending_is_ready_inline() {
        init_test("finalize_with_nothing_pending_is_ready_inline");
        let p = Promise::<()>::new();
        let f = p.finalize();
        assert!(f.is_ready());
        f.wait();
        crate::test_complete!("finalize_with_nothing_pending_is_ready_inline");
    }

    #[test]
    fn ready_after_all_contributions() {
        init_test("ready_after_all_contributions");
        let p = Promise::<()>::new();
        p.require_anonymous(3);
        p.fulfill_anonymous(1);
        let f = p.finalize();
        assert!(!f.is_ready());
        p.fulfill_anonymous(2);
        assert!(f.is_ready());
        assert_eq!(p.pending(), 0);
        crate::test_complete!("ready_after_all_contributions");
    }

    #[test]
    fn fulfillment_before_finalize_does_not_ready() {
        init_test("fulfillment_before_finalize_does_not_ready");
        let p = Promise::<()>::new();
        p.require_anonymous(1);
        p.fulfill_anonymous(1);
        assert_eq!(p.get_future().status(), FutureStatus::NotReady);
        assert!(p.finalize().is_ready());
        crate::test_complete!("fulfillment_before_finalize_does_not_ready");
    }

    #[test]
    fn too_few_fulfillments_never_ready() {
        init_test("too_few_fulfillments_never_ready");
        let p = Promise::<()>::new();
        p.require_anonymous(4);
        p.fulfill_anonymous(3);
        let f = p.finalize();
        assert!(!progress_until_ready(&f, 200));
        crate::test_complete!("too_few_fulfillments_never_ready");
    }

    #[test]
    fn value_promise_carries_result() {
        init_test("value_promise_carries_result");
        let p = Promise::<String>::new();
        p.require_anonymous(1);
        let f = p.finalize();
        p.fulfill_result("hello".to_string());
        assert!(!f.is_ready());
        p.fulfill_anonymous(1);
        assert_eq!(f.wait(), "hello");
        crate::test_complete!("value_promise_carries_result");
    }

    #[test]
    fn unit_promise_accepts_repeated_results() {
        init_test("unit_promise_accepts_repeated_results");
        let p = Promise::<()>::new();
        p.fulfill_result(());
        p.fulfill_result(());
        assert!(p.finalize().is_ready());
        crate::test_complete!("unit_promise_accepts_repeated_results");
    }

    #[test]
    fn remote_fulfillment_is_deferred_to_home() {
        init_test("remote_fulfillment_is_deferred_to_home");
        let p = Promise::<()>::new();
        p.require_anonymous(2);
        let f = p.finalize();

        crate::test_section!("fulfill from another thread");
        let remote = p.clone();
        thread::spawn(move || remote.fulfill_anonymous(2))
            .join()
            .expect("fulfiller panicked");

        assert!(!f.is_ready());
        assert_eq!(p.pending(), 2);
        assert!(p.home().has_queued_work());

        crate::test_section!("apply on the home persona");
        progress(ProgressLevel::User);
        assert_eq!(p.pending(), 0);
        assert!(f.is_ready());
        crate::test_complete!("remote_fulfillment_is_deferred_to_home");
    }

    #[test]
    fn many_remote_fulfillments_share_one_lpc() {
        init_test("many_remote_fulfillments_share_one_lpc");
        let p = Promise::<()>::new();
        p.require_anonymous(8);
        let f = p.finalize();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = p.clone();
                thread::spawn(move || p.fulfill_anonymous(1))
            })
            .collect();
        for handle in handles {
            handle.join().expect("fulfiller panicked");
        }
        assert!(progress(ProgressLevel::User) <= 8);
        assert!(progress_until_ready(&f, 10));
        crate::test_complete!("many_remote_fulfillments_share_one_lpc");
    }

    #[test]
    #[should_panic(expected = "promise finalized twice")]
    fn double_finalize_is_a_violation() {
        init_test("double_finalize_is_a_violation");
        let p = Promise::<()>::new();
        p.require_anonymous(1);
        let _ = p.finalize();
        let _ = p.finalize();
    }

    #[test]
    #[should_panic(expected = "promise fulfilled past zero")]
    fn over_fulfillment_is_a_violation() {
        init_test("over_fulfillment_is_a_violation");
        let p = Promise::<()>::new();
        p.require_anonymous(1);
        p.fulfill_anonymous(2);
    }

    #[test]
    #[should_panic(expected = "result read before ready")]
    fn value_promise_without_result_is_a_violation() {
        init_test("value_promise_without_result_is_a_violation");
        let p = Promise::<u32>::new();
        let _ = p.finalize();
    }

    #[test]
    fn try_new_respects_header_budget() {
        init_test("try_new_respects_header_budget");
        assert!(Promise::<u8>::try_new().is_ok());
        crate::test_complete!("try_new_respects_header_budget");
    }
}
