//! Shared result header.
//!
//! A header is the rendezvous between whoever produces a value and every
//! future handle waiting for it. Its status only moves forward:
//!
//! ```text
//! NotReady --first continuation--> Active --enter_ready--> Ready
//! NotReady ----------------------enter_ready-------------> Ready
//! ```
//!
//! The value is written exactly once, on the transition into `Ready`, and
//! is immutable afterwards. Continuations registered before that moment run
//! in registration order on the thread that makes the header ready;
//! continuations registered after it run immediately on the registering
//! thread.

use super::stats::HeaderTicket;
use super::Value;
use crate::error::{usage_violation, Result, UsageViolation};
use crate::tracing_compat::trace;
use core::fmt;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// Observable state of a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FutureStatus {
    /// No value, nobody waiting.
    NotReady = 0,
    /// No value yet, at least one continuation registered.
    Active = 1,
    /// The value is available.
    Ready = 2,
}

impl FutureStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotReady,
            1 => Self::Active,
            _ => Self::Ready,
        }
    }
}

pub(crate) type Continuation<T> = Box<dyn FnOnce(&T) + Send>;

pub(crate) struct Header<T> {
    status: AtomicU8,
    value: OnceLock<T>,
    waiters: Mutex<SmallVec<[Continuation<T>; 1]>>,
    _ticket: HeaderTicket,
}

impl<T: Value> Header<T> {
    /// Allocates a not-ready header, failing when the live-header budget is
    /// spent.
    pub(crate) fn try_pending() -> Result<Arc<Self>> {
        let ticket = HeaderTicket::take()?;
        trace!("header allocated");
        Ok(Arc::new(Self {
            status: AtomicU8::new(FutureStatus::NotReady as u8),
            value: OnceLock::new(),
            waiters: Mutex::new(SmallVec::new()),
            _ticket: ticket,
        }))
    }

    /// Allocates a not-ready header. Budget exhaustion is a usage violation.
    #[track_caller]
    pub(crate) fn pending() -> Arc<Self> {
        match Self::try_pending() {
            Ok(header) => header,
            Err(err) => usage_violation(UsageViolation::HeaderBudget, err),
        }
    }

    pub(crate) fn status(&self) -> FutureStatus {
        FutureStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// Runs `f` with the value once ready: now, if it already is.
    pub(crate) fn on_ready(&self, f: Continuation<T>) {
        {
            let mut waiters = self.waiters.lock();
            if self.status() != FutureStatus::Ready {
                waiters.push(f);
                self.status
                    .store(FutureStatus::Active as u8, Ordering::Release);
                return;
            }
        }
        if let Some(value) = self.value.get() {
            f(value);
        }
    }

    /// Stores the value and runs every registered continuation.
    ///
    /// Readying a header twice is a usage violation.
    #[track_caller]
    pub(crate) fn enter_ready(&self, value: T) {
        if self.value.set(value).is_err() {
            usage_violation(UsageViolation::ResultAlreadySet, "header made ready twice");
        }
        let waiters = {
            let mut waiters = self.waiters.lock();
            self.status.store(FutureStatus::Ready as u8, Ordering::Release);
            std::mem::take(&mut *waiters)
        };
        trace!(continuations = waiters.len(), "header ready");
        if let Some(value) = self.value.get() {
            for f in waiters {
                f(value);
            }
        }
    }

    /// Moves the value out when this is the last handle.
    pub(crate) fn into_value(self) -> Option<T> {
        self.value.into_inner()
    }
}

impl<T> fmt::Debug for Header<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field(
                "status",
                &FutureStatus::from_u8(self.status.load(Ordering::Relaxed)),
            )
            .finish_non_exhaustive()
    }
}
