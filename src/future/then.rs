//! Continuations on futures.

use super::header::Header;
use super::{Future, Repr, Value};
use crate::persona::{current_persona, ProgressLevel};

impl<T: Value> Future<T> {
    /// Chains `f` onto this future.
    ///
    /// If the value is already available `f` runs right now, on the
    /// caller's stack, and the result is trivially ready. Otherwise `f` runs
    /// on whichever thread readies this future.
    #[must_use]
    pub fn then<U, F>(self, f: F) -> Future<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self.repr {
            Repr::Ready(value) => Future::ready(f(value)),
            Repr::Shared(header) => match header.get() {
                Some(value) => Future::ready(f(value.clone())),
                None => {
                    let out = Header::<U>::pending();
                    let target = out.clone();
                    header.on_ready(Box::new(move |value: &T| {
                        target.enter_ready(f(value.clone()));
                    }));
                    Future::from_header(out)
                }
            },
        }
    }

    /// Chains `f`, which itself returns a future, and flattens the result.
    #[must_use]
    pub fn then_future<U, F>(self, f: F) -> Future<U>
    where
        U: Value,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        match self.try_result() {
            Some(value) => f(value),
            None => {
                let out = Header::<U>::pending();
                let target = out.clone();
                self.on_value(move |value| f(value).forward_into(target));
                Future::from_header(out)
            }
        }
    }

    /// Chains `f` as a user-level lpc on the caller's current persona.
    ///
    /// Unlike [`then`](Self::then), `f` never runs on the caller's stack or
    /// on the readying thread: once the value is available the call is
    /// queued and runs during a later user-level progress call by the
    /// persona's owner.
    #[must_use]
    pub fn then_lazy<U, F>(self, f: F) -> Future<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let persona = current_persona();
        let out = Header::<U>::pending();
        let target = out.clone();
        self.on_value(move |value| {
            persona.enqueue_fn(ProgressLevel::User, move || target.enter_ready(f(value)));
        });
        Future::from_header(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::{make_future, stats, FutureStatus};
    use crate::persona::progress;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn pending<T: Value>() -> (std::sync::Arc<Header<T>>, Future<T>) {
        let header = Header::<T>::pending();
        let future = Future::from_header(header.clone());
        (header, future)
    }

    #[test]
    fn then_on_ready_runs_inline_without_allocating() {
        init_test("then_on_ready_runs_inline_without_allocating");
        let before = stats::header_allocations();
        let f = make_future(20).then(|x| x + 1).then(|x| x * 2);
        assert!(f.is_trivially_ready());
        assert_eq!(f.result(), 42);
        assert_eq!(stats::header_allocations(), before);
        crate::test_complete!("then_on_ready_runs_inline_without_allocating");
    }

    #[test]
    fn then_identity_round_trip() {
        init_test("then_identity_round_trip");
        let v = vec![1u8, 2, 3];
        assert_eq!(make_future(v.clone()).then(|x| x).wait(), v);
        crate::test_complete!("then_identity_round_trip");
    }

    #[test]
    fn then_on_pending_runs_when_readied() {
        init_test("then_on_pending_runs_when_readied");
        let (header, f) = pending::<u32>();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let g = f.then(move |x| {
            c.fetch_add(1, Ordering::SeqCst);
            x.to_string()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(g.status(), FutureStatus::NotReady);
        header.enter_ready(7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(g.result(), "7");
        crate::test_complete!("then_on_pending_runs_when_readied");
    }

    #[test]
    fn then_future_flattens() {
        init_test("then_future_flattens");
        let (outer, f) = pending::<u32>();
        let (inner, g) = pending::<u32>();
        let inner_future = g.clone();
        let h = f.then_future(move |x| inner_future.then(move |y| x + y));
        outer.enter_ready(1);
        assert!(!h.is_ready());
        inner.enter_ready(2);
        assert_eq!(h.result(), 3);

        assert_eq!(make_future(4).then_future(|x| make_future(x * 10)).wait(), 40);
        crate::test_complete!("then_future_flattens");
    }

    #[test]
    fn then_lazy_never_runs_on_callers_stack() {
        init_test("then_lazy_never_runs_on_callers_stack");
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let f = make_future(5).then_lazy(move |x| {
            c.fetch_add(1, Ordering::SeqCst);
            x + 1
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!f.is_ready());
        progress(ProgressLevel::User);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.result(), 6);
        crate::test_complete!("then_lazy_never_runs_on_callers_stack");
    }

    #[test]
    fn then_lazy_waits_for_input() {
        init_test("then_lazy_waits_for_input");
        let (header, f) = pending::<u32>();
        let g = f.then_lazy(|x| x * 3);
        progress(ProgressLevel::User);
        assert!(!g.is_ready());
        header.enter_ready(3);
        assert!(!g.is_ready());
        assert_eq!(g.wait(), 9);
        crate::test_complete!("then_lazy_waits_for_input");
    }
}
