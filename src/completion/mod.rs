//! Completion events.
//!
//! Every asynchronous primitive reports progress through up to three
//! independent events:
//!
//! - **operation**: the operation is done and its result is available
//! - **source**: the caller's source data may be reused (may fire first)
//! - **remote**: the target process has observed the effect
//!
//! The caller picks a delivery per event with a [`Completions`] builder:
//!
//! ```ignore
//! let cxs = Completions::new()
//!     .operation(as_future())
//!     .source(as_promise(&sent))
//!     .remote(as_rpc(|| tally()));
//! let out = pgasync::rpc(target, || 7, cxs)?;
//! let seven = out.operation.wait();
//! ```
//!
//! The choice is resolved statically: each slot's type picks its
//! [`Deliver`] implementation, so an event nobody asked for costs nothing
//! and firing it is a no-op.
//!
//! A primitive calls [`Completions::bind`] before injecting anything. That
//! yields an [`Initiation`] (what the caller gets back once the primitive
//! returns) and a [`CompletionState`] (what the primitive fires later). If
//! injection fails, [`CompletionState::unwind`] releases every bound
//! delivery without firing it. Once anything has left the process, every
//! requested event must eventually fire.

pub mod deliver;

pub use deliver::{
    as_blocking, as_callback, as_future, as_lpc, as_promise, as_rpc, AsBlocking, AsCallback,
    AsFuture, AsLpc, AsPromise, AsRpc, Deliver, Fire, FutureState, NoCx, Unwind,
};

use crate::error::{usage_violation, Result, UsageViolation};
use crate::future::Value;
use crate::tracing_compat::trace;
use core::fmt;
use core::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// One of the three completion events.
pub trait Event: sealed::Sealed + Send + 'static {
    /// Name used in diagnostics.
    const NAME: &'static str;
}

/// Events delivered on the initiating process.
pub trait LocalEvent: Event {}

/// The operation finished; carries its result.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationEvent;

/// The source data may be reused.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceEvent;

/// The target has observed the effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteEvent;

impl sealed::Sealed for OperationEvent {}
impl sealed::Sealed for SourceEvent {}
impl sealed::Sealed for RemoteEvent {}

impl Event for OperationEvent {
    const NAME: &'static str = "operation";
}
impl Event for SourceEvent {
    const NAME: &'static str = "source";
}
impl Event for RemoteEvent {
    const NAME: &'static str = "remote";
}

impl LocalEvent for OperationEvent {}
impl LocalEvent for SourceEvent {}

/// Per-event delivery choices.
#[derive(Debug, Clone, Copy)]
pub struct Completions<O = NoCx, S = NoCx, R = NoCx> {
    operation: O,
    source: S,
    remote: R,
}

impl Completions {
    /// No deliveries requested.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            operation: NoCx,
            source: NoCx,
            remote: NoCx,
        }
    }
}

impl Default for Completions {
    fn default() -> Self {
        Self::new()
    }
}

/// Outputs of the bound operation and source deliveries for a result type
/// `T`.
pub type BindOutputs<O, S, T> = CxOutputs<
    <O as Deliver<OperationEvent, T>>::Output,
    <S as Deliver<SourceEvent, ()>>::Output,
>;

/// Result of binding a [`Completions`] for a result type `T`.
pub type Bound<O, S, R, T> = (
    Initiation<O, S, T>,
    CompletionState<
        <O as Deliver<OperationEvent, T>>::State,
        <S as Deliver<SourceEvent, ()>>::State,
        <R as Deliver<RemoteEvent, ()>>::State,
    >,
);

impl<O, S, R> Completions<O, S, R> {
    /// Sets the operation delivery.
    #[must_use]
    pub fn operation<D>(self, delivery: D) -> Completions<D, S, R> {
        Completions {
            operation: delivery,
            source: self.source,
            remote: self.remote,
        }
    }

    /// Sets the source delivery.
    #[must_use]
    pub fn source<D>(self, delivery: D) -> Completions<O, D, R> {
        Completions {
            operation: self.operation,
            source: delivery,
            remote: self.remote,
        }
    }

    /// Sets the remote delivery.
    #[must_use]
    pub fn remote<D>(self, delivery: D) -> Completions<O, S, D> {
        Completions {
            operation: self.operation,
            source: self.source,
            remote: delivery,
        }
    }

    /// Binds every delivery for an operation producing `T`.
    ///
    /// If any delivery fails to bind, those already bound are unwound and
    /// the error is returned.
    pub fn try_bind<T: Value>(self) -> Result<Bound<O, S, R, T>>
    where
        O: Deliver<OperationEvent, T>,
        S: Deliver<SourceEvent, ()>,
        R: Deliver<RemoteEvent, ()>,
    {
        let (op_pending, op_state) = self.operation.bind()?;
        let (src_pending, src_state) = match self.source.bind() {
            Ok(bound) => bound,
            Err(err) => {
                op_state.unwind();
                return Err(err);
            }
        };
        let remote_state = match self.remote.bind() {
            Ok((_, state)) => state,
            Err(err) => {
                op_state.unwind();
                src_state.unwind();
                return Err(err);
            }
        };
        trace!(
            operation = O::REQUESTED,
            source = S::REQUESTED,
            remote = R::REQUESTED,
            "completions bound"
        );
        Ok((
            Initiation {
                operation: op_pending,
                source: src_pending,
                _marker: PhantomData,
            },
            CompletionState {
                operation: Slot::new(op_state, O::REQUESTED, OperationEvent::NAME),
                source: Slot::new(src_state, S::REQUESTED, SourceEvent::NAME),
                remote: Slot::new(remote_state, R::REQUESTED, RemoteEvent::NAME),
            },
        ))
    }

    /// Binds every delivery for an operation producing `T`.
    ///
    /// Exhausting the live-header budget is a usage violation; use
    /// [`try_bind`](Self::try_bind) to get an error instead.
    #[track_caller]
    pub fn bind<T: Value>(self) -> Bound<O, S, R, T>
    where
        O: Deliver<OperationEvent, T>,
        S: Deliver<SourceEvent, ()>,
        R: Deliver<RemoteEvent, ()>,
    {
        match self.try_bind() {
            Ok(bound) => bound,
            Err(err) => usage_violation(UsageViolation::HeaderBudget, err),
        }
    }
}

/// What the caller gets back from a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CxOutputs<Op, Src> {
    /// Output of the operation delivery.
    pub operation: Op,
    /// Output of the source delivery.
    pub source: Src,
}

/// Caller-side half of a binding.
pub struct Initiation<O, S, T>
where
    O: Deliver<OperationEvent, T>,
    S: Deliver<SourceEvent, ()>,
    T: Value,
{
    operation: O::Pending,
    source: S::Pending,
    _marker: PhantomData<fn() -> (O, S, T)>,
}

impl<O, S, T> Initiation<O, S, T>
where
    O: Deliver<OperationEvent, T>,
    S: Deliver<SourceEvent, ()>,
    T: Value,
{
    /// Produces the caller's outputs.
    ///
    /// With [`AsBlocking`] this waits for the operation, so primitives call
    /// it last.
    #[track_caller]
    pub fn finish(self) -> BindOutputs<O, S, T> {
        CxOutputs {
            operation: O::finish(self.operation),
            source: S::finish(self.source),
        }
    }
}

impl<O, S, T> fmt::Debug for Initiation<O, S, T>
where
    O: Deliver<OperationEvent, T>,
    S: Deliver<SourceEvent, ()>,
    T: Value,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initiation").finish_non_exhaustive()
    }
}

struct Slot<St> {
    state: Option<St>,
    requested: bool,
    event: &'static str,
}

impl<St> Slot<St> {
    fn new(state: St, requested: bool, event: &'static str) -> Self {
        Self {
            state: Some(state),
            requested,
            event,
        }
    }

    /// Takes the state. Taking a requested event twice is a usage
    /// violation; an unrequested one just yields nothing.
    #[track_caller]
    fn take(&mut self) -> Option<St> {
        match self.state.take() {
            Some(state) => Some(state),
            None if self.requested => {
                usage_violation(UsageViolation::EventFiredTwice, self.event)
            }
            None => None,
        }
    }

    fn is_pending(&self) -> bool {
        self.requested && self.state.is_some()
    }
}

/// Primitive-side half of a binding: the deliveries still to fire.
pub struct CompletionState<OS, SS, RS> {
    operation: Slot<OS>,
    source: Slot<SS>,
    remote: Slot<RS>,
}

impl<OS, SS, RS> CompletionState<OS, SS, RS>
where
    OS: Unwind,
    SS: Unwind,
    RS: Unwind,
{
    /// Fires the operation event with `value`.
    #[track_caller]
    pub fn fire_operation<T>(&mut self, value: T)
    where
        OS: Fire<T>,
    {
        if let Some(state) = self.operation.take() {
            state.fire(value);
        }
    }

    /// Fires the source event.
    #[track_caller]
    pub fn fire_source(&mut self)
    where
        SS: Fire<()>,
    {
        if let Some(state) = self.source.take() {
            state.fire(());
        }
    }

    /// Fires the remote event. Primitives call this on the target.
    #[track_caller]
    pub fn fire_remote(&mut self)
    where
        RS: Fire<()>,
    {
        if let Some(state) = self.remote.take() {
            state.fire(());
        }
    }

    /// Moves the operation state out, e.g. into a reply message.
    #[track_caller]
    pub fn take_operation(&mut self) -> Option<OS> {
        self.operation.take()
    }

    /// Moves the source state out.
    #[track_caller]
    pub fn take_source(&mut self) -> Option<SS> {
        self.source.take()
    }

    /// Moves the remote state out, e.g. into the outgoing message.
    #[track_caller]
    pub fn take_remote(&mut self) -> Option<RS> {
        self.remote.take()
    }

    /// Returns true while a requested event has neither fired nor been
    /// taken.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.operation.is_pending() || self.source.is_pending() || self.remote.is_pending()
    }

    /// Releases every state still held without firing it.
    ///
    /// Only valid before anything has left the process.
    pub fn unwind(mut self) {
        trace!("completions unwound");
        if let Some(state) = self.operation.state.take() {
            state.unwind();
        }
        if let Some(state) = self.source.state.take() {
            state.unwind();
        }
        if let Some(state) = self.remote.state.take() {
            state.unwind();
        }
    }
}

impl<OS, SS, RS> fmt::Debug for CompletionState<OS, SS, RS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionState")
            .field("operation", &self.operation.state.is_some())
            .field("source", &self.source.state.is_some())
            .field("remote", &self.remote.state.is_some())
            .finish()
    }
}
