//! Delivery kinds: where a fired completion event goes.
//!
//! Each kind implements [`Deliver`] for the events it supports. Binding a
//! kind yields two halves: a *pending* value the initiator hands back to the
//! caller (a future, or nothing) and a *state* that the primitive carries
//! until the event fires. The state implements [`Fire`].
//!
//! | kind | events | caller gets | on fire |
//! |------|--------|-------------|---------|
//! | [`NoCx`] | any | `()` | nothing |
//! | [`AsFuture`] | operation, source | `Future<T>` | readies it on the binding persona |
//! | [`AsPromise`] | operation, source | `()` | fulfills one contribution |
//! | [`AsLpc`] | operation, source | `()` | queues `f(value)` on a persona |
//! | [`AsCallback`] | operation, source | `()` | runs `f(value)` inline |
//! | [`AsBlocking`] | operation | `T` | the initiating call waits for it |
//! | [`AsRpc`] | remote | `()` | runs `f()` on the target |

use super::{Event, LocalEvent, OperationEvent, RemoteEvent};
use crate::error::Result;
use crate::future::header::Header;
use crate::future::{Future, Value};
use crate::persona::{current_persona, Persona, ProgressLevel};
use crate::promise::Promise;
use core::fmt;
use std::sync::Arc;

/// Binding of one completion event to a concrete delivery.
pub trait Deliver<E: Event, T: Value>: Send + 'static {
    /// False only for [`NoCx`]: firing an unrequested event is a no-op.
    const REQUESTED: bool = true;

    /// Held by the initiator until the call returns.
    type Pending;
    /// What the caller receives for this event.
    type Output;
    /// Carried by the primitive until the event fires.
    type State: Fire<T>;

    /// Allocates whatever the delivery needs.
    fn bind(self) -> Result<(Self::Pending, Self::State)>;

    /// Turns the pending half into the caller's output.
    fn finish(pending: Self::Pending) -> Self::Output;
}

/// Bound state that can be abandoned before its event fires.
pub trait Unwind: Send + 'static {
    /// Releases the state without delivering, returning anything taken at
    /// bind time.
    fn unwind(self);
}

/// Bound state that delivers a value of type `T`.
pub trait Fire<T>: Unwind {
    /// Delivers `value`.
    fn fire(self, value: T);
}

/// No delivery requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCx;

impl<E: Event, T: Value> Deliver<E, T> for NoCx {
    const REQUESTED: bool = false;
    type Pending = ();
    type Output = ();
    type State = Self;

    fn bind(self) -> Result<((), Self)> {
        Ok(((), self))
    }

    fn finish((): ()) {}
}

impl Unwind for NoCx {
    fn unwind(self) {}
}

impl<T> Fire<T> for NoCx {
    fn fire(self, _value: T) {}
}

/// Header readied on the persona that bound it.
pub struct FutureState<T> {
    header: Arc<Header<T>>,
    home: Persona,
}

impl<T: Value> FutureState<T> {
    fn bind() -> Result<(Future<T>, Self)> {
        let header = Header::try_pending()?;
        let future = Future::from_header(Arc::clone(&header));
        Ok((
            future,
            Self {
                header,
                home: current_persona(),
            },
        ))
    }
}

impl<T: Value> Unwind for FutureState<T> {
    fn unwind(self) {}
}

impl<T: Value> Fire<T> for FutureState<T> {
    fn fire(self, value: T) {
        let header = self.header;
        self.home
            .run_or_defer(ProgressLevel::User, move || header.enter_ready(value));
    }
}

impl<T> fmt::Debug for FutureState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureState")
            .field("home", &self.home.id())
            .finish_non_exhaustive()
    }
}

/// Deliver the event as a [`Future`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AsFuture;

impl<E: LocalEvent, T: Value> Deliver<E, T> for AsFuture {
    type Pending = Future<T>;
    type Output = Future<T>;
    type State = FutureState<T>;

    fn bind(self) -> Result<(Future<T>, FutureState<T>)> {
        FutureState::bind()
    }

    fn finish(pending: Future<T>) -> Future<T> {
        pending
    }
}

/// Block the initiating call until the operation completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsBlocking;

impl<T: Value> Deliver<OperationEvent, T> for AsBlocking {
    type Pending = Future<T>;
    type Output = T;
    type State = FutureState<T>;

    fn bind(self) -> Result<(Future<T>, FutureState<T>)> {
        FutureState::bind()
    }

    fn finish(pending: Future<T>) -> T {
        pending.wait()
    }
}

/// Fulfill one contribution of a caller-supplied promise.
///
/// Binding registers the contribution; firing stores the value and retires
/// it; unwinding only retires it.
#[derive(Debug)]
pub struct AsPromise<T: Value> {
    promise: Promise<T>,
}

impl<E: LocalEvent, T: Value> Deliver<E, T> for AsPromise<T> {
    type Pending = ();
    type Output = ();
    type State = Self;

    fn bind(self) -> Result<((), Self)> {
        self.promise.require_anonymous(1);
        Ok(((), self))
    }

    fn finish((): ()) {}
}

impl<T: Value> Unwind for AsPromise<T> {
    fn unwind(self) {
        self.promise.fulfill_anonymous(1);
    }
}

impl<T: Value> Fire<T> for AsPromise<T> {
    fn fire(self, value: T) {
        self.promise.fulfill_result(value);
        self.promise.fulfill_anonymous(1);
    }
}

/// Queue `f(value)` as a user-level lpc on a persona.
pub struct AsLpc<F> {
    persona: Persona,
    f: F,
}

impl<E, T, F> Deliver<E, T> for AsLpc<F>
where
    E: LocalEvent,
    T: Value,
    F: FnOnce(T) + Send + 'static,
{
    type Pending = ();
    type Output = ();
    type State = Self;

    fn bind(self) -> Result<((), Self)> {
        Ok(((), self))
    }

    fn finish((): ()) {}
}

impl<F: Send + 'static> Unwind for AsLpc<F> {
    fn unwind(self) {}
}

impl<T, F> Fire<T> for AsLpc<F>
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    fn fire(self, value: T) {
        let f = self.f;
        self.persona
            .enqueue_fn(ProgressLevel::User, move || f(value));
    }
}

impl<F> fmt::Debug for AsLpc<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsLpc")
            .field("persona", &self.persona.id())
            .finish_non_exhaustive()
    }
}

/// Run `f(value)` inline on whichever thread fires the event.
pub struct AsCallback<F>(F);

impl<E, T, F> Deliver<E, T> for AsCallback<F>
where
    E: LocalEvent,
    T: Value,
    F: FnOnce(T) + Send + 'static,
{
    type Pending = ();
    type Output = ();
    type State = Self;

    fn bind(self) -> Result<((), Self)> {
        Ok(((), self))
    }

    fn finish((): ()) {}
}

impl<F: Send + 'static> Unwind for AsCallback<F> {
    fn unwind(self) {}
}

impl<T, F> Fire<T> for AsCallback<F>
where
    F: FnOnce(T) + Send + 'static,
{
    fn fire(self, value: T) {
        (self.0)(value);
    }
}

impl<F> fmt::Debug for AsCallback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsCallback(..)")
    }
}

/// Run `f()` on the target process once it has observed the effect.
pub struct AsRpc<F>(F);

impl<F> Deliver<RemoteEvent, ()> for AsRpc<F>
where
    F: FnOnce() + Send + 'static,
{
    type Pending = ();
    type Output = ();
    type State = Self;

    fn bind(self) -> Result<((), Self)> {
        Ok(((), self))
    }

    fn finish((): ()) {}
}

impl<F: Send + 'static> Unwind for AsRpc<F> {
    fn unwind(self) {}
}

impl<F> Fire<()> for AsRpc<F>
where
    F: FnOnce() + Send + 'static,
{
    fn fire(self, (): ()) {
        (self.0)();
    }
}

impl<F> fmt::Debug for AsRpc<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsRpc(..)")
    }
}

/// Deliver as a future readied on the caller's current persona.
#[must_use]
pub fn as_future() -> AsFuture {
    AsFuture
}

/// Deliver by fulfilling `promise`.
#[must_use]
pub fn as_promise<T: Value>(promise: &Promise<T>) -> AsPromise<T> {
    AsPromise {
        promise: promise.clone(),
    }
}

/// Deliver by queueing `f` on `persona`.
#[must_use]
pub fn as_lpc<F>(persona: &Persona, f: F) -> AsLpc<F> {
    AsLpc {
        persona: persona.clone(),
        f,
    }
}

/// Deliver by calling `f` inline.
#[must_use]
pub fn as_callback<F>(f: F) -> AsCallback<F> {
    AsCallback(f)
}

/// Block the initiating call until the operation completes.
#[must_use]
pub fn as_blocking() -> AsBlocking {
    AsBlocking
}

/// Run `f` on the target.
#[must_use]
pub fn as_rpc<F>(f: F) -> AsRpc<F>
where
    F: FnOnce() + Send + 'static,
{
    AsRpc(f)
}
