//! Conjunction of futures.
//!
//! `when_all((a, b, c))` yields a future of `(A, B, C)` that is ready once
//! every input is. Inputs that are already ready contribute their value
//! directly and never allocate; when every input is ready the result is
//! trivially ready and no header is allocated at all.
//!
//! When some inputs are pending, one result header plus a join slot is
//! allocated. Each pending input registers a continuation that deposits its
//! value; the last one to arrive assembles the tuple and readies the header.

use super::header::Header;
use super::{Future, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Collections of futures that [`when_all`] can join.
///
/// Implemented for tuples of up to six futures, including the empty tuple.
pub trait WhenAll {
    /// The joined value.
    type Output: Value;

    /// Joins every future in `self`.
    fn join_all(self) -> Future<Self::Output>;
}

/// Returns a future of every input's value, ready once all inputs are.
#[must_use]
pub fn when_all<W: WhenAll>(futures: W) -> Future<W::Output> {
    futures.join_all()
}

impl WhenAll for () {
    type Output = ();

    fn join_all(self) -> Future<()> {
        Future::ready(())
    }
}

struct Join<S> {
    slots: Mutex<S>,
    remaining: AtomicUsize,
}

impl<S> Join<S> {
    fn new(slots: S, remaining: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(slots),
            remaining: AtomicUsize::new(remaining),
        })
    }

    /// Records one arrival. Returns true for the last one.
    fn arrive(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

macro_rules! impl_when_all {
    ($($T:ident $v:ident $idx:tt),+) => {
        impl<$($T: Value),+> WhenAll for ($(Future<$T>,)+) {
            type Output = ($($T,)+);

            fn join_all(self) -> Future<Self::Output> {
                if $(self.$idx.is_ready())&&+ {
                    return Future::ready(($(self.$idx.into_ready_value(),)+));
                }

                // Inputs may become ready concurrently; decide from one snapshot.
                let slots = ($(self.$idx.try_result(),)+);
                let waiting = ($(slots.$idx.is_none(),)+);
                let pending = 0 $(+ usize::from(waiting.$idx))+;
                let assemble = |slots: ($(Option<$T>,)+)| match slots {
                    ($(Some($v),)+) => Some(($($v,)+)),
                    _ => None,
                };
                if pending == 0 {
                    match assemble(slots) {
                        Some(values) => return Future::ready(values),
                        None => unreachable!("when_all snapshot lost a value"),
                    }
                }
                let out = Header::<Self::Output>::pending();
                let join = Join::new(slots, pending);
                $(
                    if waiting.$idx {
                        let join = Arc::clone(&join);
                        let out = Arc::clone(&out);
                        self.$idx.on_value(move |value| {
                            join.slots.lock().$idx = Some(value);
                            if join.arrive() {
                                let slots = std::mem::take(&mut *join.slots.lock());
                                match assemble(slots) {
                                    Some(values) => out.enter_ready(values),
                                    None => unreachable!("when_all completed with an empty slot"),
                                }
                            }
                        });
                    }
                )+
                Future::from_header(out)
            }
        }
    };
}

impl_when_all!(A a 0);
impl_when_all!(A a 0, B b 1);
impl_when_all!(A a 0, B b 1, C c 2);
impl_when_all!(A a 0, B b 1, C c 2, D d 3);
impl_when_all!(A a 0, B b 1, C c 2, D d 3, E e 4);
impl_when_all!(A a 0, B b 1, C c 2, D d 3, E e 4, F f 5);

/// Joins a homogeneous list of futures, preserving order.
#[must_use]
pub fn when_all_vec<T: Value>(futures: Vec<Future<T>>) -> Future<Vec<T>> {
    if futures.iter().all(Future::is_ready) {
        return Future::ready(futures.into_iter().map(Future::into_ready_value).collect());
    }

    let slots: Vec<Option<T>> = futures.iter().map(Future::try_result).collect();
    let waiting: Vec<bool> = slots.iter().map(Option::is_none).collect();
    let pending = waiting.iter().filter(|w| **w).count();
    if pending == 0 {
        return Future::ready(slots.into_iter().flatten().collect());
    }
    let out = Header::<Vec<T>>::pending();
    let join = Join::new(slots, pending);
    for ((index, future), waiting) in futures.into_iter().enumerate().zip(waiting) {
        if !waiting {
            continue;
        }
        let join = Arc::clone(&join);
        let out = Arc::clone(&out);
        future.on_value(move |value| {
            join.slots.lock()[index] = Some(value);
            if join.arrive() {
                let slots = std::mem::take(&mut *join.slots.lock());
                let values: Option<Vec<T>> = slots.into_iter().collect();
                match values {
                    Some(values) => out.enter_ready(values),
                    None => unreachable!("when_all_vec completed with an empty slot"),
                }
            }
        });
    }
    Future::from_header(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::{make_future, stats};
    use crate::test_utils::init_test_logging;
    use proptest::prelude::*;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn pending<T: Value>() -> (Arc<Header<T>>, Future<T>) {
        let header = Header::<T>::pending();
        (Arc::clone(&header), Future::from_header(header))
    }

    #[test]
    fn all_ready_is_trivially_ready_without_allocation() {
        init_test("all_ready_is_trivially_ready_without_allocation");
        let before = stats::header_allocations();
        let f = when_all((make_future(5), make_future(7)));
        assert!(f.is_trivially_ready());
        assert_eq!(f.wait(), (5, 7));
        assert_eq!(stats::header_allocations(), before);
        crate::test_complete!("all_ready_is_trivially_ready_without_allocation");
    }

    #[test]
    fn empty_and_single() {
        init_test("empty_and_single");
        assert!(when_all(()).is_trivially_ready());
        assert_eq!(when_all((make_future("a"),)).wait(), ("a",));
        crate::test_complete!("empty_and_single");
    }

    #[test]
    fn readies_after_last_input() {
        init_test("readies_after_last_input");
        let (ha, a) = pending::<u32>();
        let (hc, c) = pending::<String>();
        let joined = when_all((a, make_future(2u8), c));
        assert!(!joined.is_ready());
        hc.enter_ready("c".to_string());
        assert!(!joined.is_ready());
        ha.enter_ready(1);
        assert_eq!(joined.result(), (1, 2u8, "c".to_string()));
        crate::test_complete!("readies_after_last_input");
    }

    #[test]
    fn six_way_join() {
        init_test("six_way_join");
        let (h, late) = pending::<u8>();
        let joined = when_all((
            make_future(1u8),
            make_future(2u16),
            make_future(3u32),
            make_future(4u64),
            make_future('e'),
            late,
        ));
        h.enter_ready(6);
        assert_eq!(joined.result(), (1, 2, 3, 4, 'e', 6));
        crate::test_complete!("six_way_join");
    }

    #[test]
    fn vec_join_preserves_order() {
        init_test("vec_join_preserves_order");
        let (h1, f1) = pending::<i32>();
        let (h3, f3) = pending::<i32>();
        let joined = when_all_vec(vec![make_future(0), f1, make_future(2), f3]);
        h3.enter_ready(3);
        assert!(!joined.is_ready());
        h1.enter_ready(1);
        assert_eq!(joined.result(), vec![0, 1, 2, 3]);
        crate::test_complete!("vec_join_preserves_order");
    }

    #[test]
    fn vec_join_empty_and_ready() {
        init_test("vec_join_empty_and_ready");
        let before = stats::header_allocations();
        assert_eq!(when_all_vec(Vec::<Future<u8>>::new()).wait(), Vec::<u8>::new());
        assert_eq!(when_all_vec(vec![make_future(1), make_future(2)]).wait(), vec![1, 2]);
        assert_eq!(stats::header_allocations(), before);
        crate::test_complete!("vec_join_empty_and_ready");
    }

    proptest! {
        #[test]
        fn vec_join_concatenates_in_input_order(
            inputs in proptest::collection::vec((any::<i64>(), any::<bool>()), 0..24),
        ) {
            let mut headers = Vec::new();
            let futures: Vec<Future<i64>> = inputs
                .iter()
                .map(|&(value, ready)| {
                    if ready {
                        make_future(value)
                    } else {
                        let (h, f) = pending::<i64>();
                        headers.push((h, value));
                        f
                    }
                })
                .collect();
            let joined = when_all_vec(futures);
            for (h, value) in headers.into_iter().rev() {
                prop_assert!(!joined.is_ready());
                h.enter_ready(value);
            }
            let expected: Vec<i64> = inputs.iter().map(|&(v, _)| v).collect();
            prop_assert_eq!(joined.result(), expected);
        }
    }
}
