//! Futures: handles to values that may not exist yet.
//!
//! A [`Future`] is either *trivially ready* (the value lives inline and no
//! shared header was ever allocated) or a handle to a shared
//! [`Header`](header) that some producer will make ready. Cloning a future
//! shares the header; readiness is observed by every clone.
//!
//! Futures are not Rust `async` futures. Nothing polls them: values arrive
//! because a producer (a promise, a completion, an lpc) readies the header,
//! and [`Future::wait`] drives [`progress`](crate::persona::progress) until
//! that happens.
//!
//! Composition:
//!
//! - [`Future::then`] / [`Future::then_future`] / [`Future::then_lazy`]
//! - [`when_all`] over tuples of futures, [`when_all_vec`] over a `Vec`

pub(crate) mod header;
pub mod stats;
mod then;
pub mod when_all;

pub use header::FutureStatus;
pub use when_all::{when_all, when_all_vec, WhenAll};

use crate::error::{usage_violation, UsageViolation};
use crate::persona::context;
use crate::persona::progress::blocking_progress;
use crate::persona::ProgressLevel;
use core::fmt;
use header::Header;
use std::sync::Arc;

/// Values that can flow through futures.
///
/// A ready value is shared by every handle and may be read from any thread,
/// so it must be `Clone + Send + Sync`.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

enum Repr<T> {
    Ready(T),
    Shared(Arc<Header<T>>),
}

/// A handle to a value that becomes available at most once.
pub struct Future<T> {
    repr: Repr<T>,
}

/// Returns a trivially-ready future holding `value`. Does not allocate.
#[must_use]
pub fn make_future<T: Value>(value: T) -> Future<T> {
    Future::ready(value)
}

/// Alias of [`make_future`].
#[must_use]
pub fn to_future<T: Value>(value: T) -> Future<T> {
    Future::ready(value)
}

impl<T: Value> Future<T> {
    /// Returns a trivially-ready future holding `value`.
    #[must_use]
    pub const fn ready(value: T) -> Self {
        Self {
            repr: Repr::Ready(value),
        }
    }

    pub(crate) fn from_header(header: Arc<Header<T>>) -> Self {
        Self {
            repr: Repr::Shared(header),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> FutureStatus {
        match &self.repr {
            Repr::Ready(_) => FutureStatus::Ready,
            Repr::Shared(header) => header.status(),
        }
    }

    /// Returns true once the value is available.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status() == FutureStatus::Ready
    }

    /// Returns true if this future never had a shared header.
    #[must_use]
    pub fn is_trivially_ready(&self) -> bool {
        matches!(self.repr, Repr::Ready(_))
    }

    /// Returns a clone of the value, or `None` if not ready.
    #[must_use]
    pub fn try_result(&self) -> Option<T> {
        match &self.repr {
            Repr::Ready(value) => Some(value.clone()),
            Repr::Shared(header) => header.get().cloned(),
        }
    }

    /// Returns a clone of the value.
    ///
    /// Reading a future that is not ready is a usage violation.
    #[must_use]
    #[track_caller]
    pub fn result(&self) -> T {
        match self.try_result() {
            Some(value) => value,
            None => usage_violation(UsageViolation::ResultNotReady, "Future::result"),
        }
    }

    /// Runs user-level progress until the value is available, then returns
    /// it.
    ///
    /// This spins; it never parks the thread. Waiting on a not-ready future
    /// from inside a user-level callback is a usage violation, since the
    /// callback's own persona could never drain.
    #[track_caller]
    pub fn wait(self) -> T {
        if !self.is_ready() {
            if context::user_depth() > 0 {
                usage_violation(
                    UsageViolation::ReentrantWait,
                    "Future::wait on a not-ready future inside a user-level callback",
                );
            }
            while !self.is_ready() {
                blocking_progress(ProgressLevel::User);
            }
        }
        self.into_ready_value()
    }

    /// Moves the value out of a ready future, cloning only if the header is
    /// still shared.
    pub(crate) fn into_ready_value(self) -> T {
        match self.repr {
            Repr::Ready(value) => value,
            Repr::Shared(header) => match Arc::try_unwrap(header) {
                Ok(header) => match header.into_value() {
                    Some(value) => value,
                    None => usage_violation(UsageViolation::ResultNotReady, "future consumed"),
                },
                Err(shared) => match shared.get() {
                    Some(value) => value.clone(),
                    None => usage_violation(UsageViolation::ResultNotReady, "future consumed"),
                },
            },
        }
    }

    /// Runs `f` with the value once ready: now, if it already is.
    pub(crate) fn on_value<F>(self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        match self.repr {
            Repr::Ready(value) => f(value),
            Repr::Shared(header) => header.on_ready(Box::new(move |value: &T| f(value.clone()))),
        }
    }

    /// Readies `target` with this future's value once available.
    pub(crate) fn forward_into(self, target: Arc<Header<T>>) {
        self.on_value(move |value| target.enter_ready(value));
    }
}

impl<T: Value> Clone for Future<T> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Ready(value) => Repr::Ready(value.clone()),
            Repr::Shared(header) => Repr::Shared(Arc::clone(header)),
        };
        Self { repr }
    }
}

impl<T: Value> From<T> for Future<T> {
    fn from(value: T) -> Self {
        Self::ready(value)
    }
}

impl<T: Value + fmt::Debug> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Ready(value) => f.debug_tuple("Future::Ready").field(value).finish(),
            Repr::Shared(header) => f
                .debug_struct("Future")
                .field("status", &header.status())
                .field("value", &header.get())
                .finish(),
        }
    }
}
