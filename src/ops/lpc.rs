//! Local procedure calls between personas.

use crate::completion::{as_future, BindOutputs, Completions, Deliver, Fire, NoCx, OperationEvent};
use crate::future::{Future, Value};
use crate::persona::{Persona, ProgressLevel};

/// Runs `f` on `target` at user level and returns a future of its result.
///
/// The future is readied on the caller's current persona, so the caller
/// observes it through its own progress.
#[must_use]
pub fn lpc<U, F>(target: &Persona, f: F) -> Future<U>
where
    U: Value,
    F: FnOnce() -> U + Send + 'static,
{
    lpc_with(target, f, Completions::new().operation(as_future())).operation
}

/// Runs `f` on `target` at user level, delivering its result through
/// `completions`.
#[track_caller]
pub fn lpc_with<U, F, O>(target: &Persona, f: F, completions: Completions<O>) -> BindOutputs<O, NoCx, U>
where
    U: Value,
    F: FnOnce() -> U + Send + 'static,
    O: Deliver<OperationEvent, U>,
{
    let (init, mut state) = completions.bind::<U>();
    let operation = state.take_operation();
    target.enqueue_fn(ProgressLevel::User, move || {
        let value = f();
        if let Some(operation) = operation {
            operation.fire(value);
        }
    });
    init.finish()
}

/// Runs `f` on `target` at user level, with no completion.
pub fn lpc_ff<F>(target: &Persona, f: F)
where
    F: FnOnce() + Send + 'static,
{
    target.enqueue_fn(ProgressLevel::User, f);
}
