//! Shared-header accounting.
//!
//! Every shared header holds a [`HeaderTicket`] for its whole life. Taking a
//! ticket bumps the calling thread's allocation counter and the process-wide
//! live count; the live count is checked against the configured budget.

use crate::error::{Error, Result};
use crate::runtime;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

thread_local! {
    static ALLOCATED: Cell<u64> = const { Cell::new(0) };
}

static LIVE: AtomicUsize = AtomicUsize::new(0);

/// Number of shared headers allocated by the calling thread so far.
///
/// Trivially-ready futures never allocate and are not counted.
#[must_use]
pub fn header_allocations() -> u64 {
    ALLOCATED.with(Cell::get)
}

/// Number of shared headers currently alive in the process.
#[must_use]
pub fn live_headers() -> usize {
    LIVE.load(Ordering::Relaxed)
}

/// Proof of one live-header reservation. Released on drop.
#[derive(Debug)]
pub(crate) struct HeaderTicket {
    _private: (),
}

impl HeaderTicket {
    pub(crate) fn take() -> Result<Self> {
        let live = LIVE.fetch_add(1, Ordering::AcqRel);
        if let Some(max) = runtime::tuning().max_live_headers {
            if live >= max {
                LIVE.fetch_sub(1, Ordering::AcqRel);
                return Err(Error::header_exhausted(live, max));
            }
        }
        ALLOCATED.with(|count| count.set(count.get() + 1));
        Ok(Self { _private: () })
    }
}

impl Drop for HeaderTicket {
    fn drop(&mut self) {
        LIVE.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_counts_per_thread_and_live() {
        let before = header_allocations();
        let ticket = HeaderTicket::take().unwrap();
        assert_eq!(header_allocations(), before + 1);
        assert!(live_headers() >= 1);
        drop(ticket);
        assert_eq!(header_allocations(), before + 1);
    }

    #[test]
    fn other_threads_do_not_touch_this_counter() {
        let before = header_allocations();
        std::thread::spawn(|| {
            let _t = HeaderTicket::take().unwrap();
        })
        .join()
        .expect("thread panicked");
        assert_eq!(header_allocations(), before);
    }
}
