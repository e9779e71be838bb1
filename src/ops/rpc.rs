//! Remote procedure calls over the installed transport.
//!
//! ```text
//! origin                                   target
//!   bind completions
//!   inject(request) ---------------------> world persona, user level:
//!   fire source                              value = f()
//!                                            fire remote
//!   world persona, user level: <---------- inject(reply)   (only if the
//!     fire operation(value)                                  operation was
//!                                                            requested)
//! ```
//!
//! Both messages run on the world persona, so some thread must hold it and
//! make progress for an rpc to complete. Once the request is injected the
//! operation always fires: a reply the transport refuses is retried at
//! internal level on the world persona.

use crate::completion::{
    BindOutputs, Completions, Deliver, Fire, NoCx, OperationEvent, RemoteEvent, SourceEvent, Unwind,
};
use crate::error::{usage_violation, Error, ErrorKind, Result, UsageViolation};
use crate::future::Value;
use crate::persona::ProgressLevel;
use crate::runtime;
use crate::tracing_compat::{debug, trace, warn};
use crate::transport::{ActiveMessage, Rank};
use parking_lot::Mutex;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Carried state
// ---------------------------------------------------------------------------

/// Completion state travelling with the request.
struct Carried<OS, RS> {
    operation: Option<OS>,
    remote: Option<RS>,
}

impl<OS: Unwind, RS: Unwind> Carried<OS, RS> {
    fn unwind(self) {
        if let Some(operation) = self.operation {
            operation.unwind();
        }
        if let Some(remote) = self.remote {
            remote.unwind();
        }
    }
}

/// Request slot shared with the message so a refused injection can take the
/// state back.
type Shared<T> = Arc<Mutex<Option<T>>>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Runs `f` on the world persona of `target` and reports through
/// `completions`.
///
/// - operation: fires with `f`'s return value once the reply arrives
/// - source: fires as soon as the request is injected
/// - remote: runs on the target right after `f`
///
/// # Errors
///
/// - [`ErrorKind::NotInitialized`] without a runtime
/// - [`ErrorKind::HeaderExhausted`] if a future delivery cannot be allocated
/// - [`ErrorKind::InvalidRank`] or [`ErrorKind::InjectionFailed`] from the
///   transport
///
/// On error every bound completion has been unwound and nothing has left
/// the process.
pub fn rpc<U, F, O, S, R>(
    target: Rank,
    f: F,
    completions: Completions<O, S, R>,
) -> Result<BindOutputs<O, S, U>>
where
    U: Value,
    F: FnOnce() -> U + Send + 'static,
    O: Deliver<OperationEvent, U>,
    S: Deliver<SourceEvent, ()>,
    R: Deliver<RemoteEvent, ()>,
{
    let runtime = runtime::current()
        .ok_or_else(|| Error::new(ErrorKind::NotInitialized).with_message("rpc"))?;
    let (init, mut state) = completions.try_bind::<U>()?;

    let rank_n = runtime.rank_n();
    if target >= rank_n {
        state.unwind();
        return Err(Error::invalid_rank(target, rank_n));
    }
    let origin = runtime.rank_me();
    let reply_wanted = O::REQUESTED;

    let slot: Shared<Carried<_, _>> = Arc::new(Mutex::new(Some(Carried {
        operation: state.take_operation(),
        remote: state.take_remote(),
    })));
    let request_slot = Arc::clone(&slot);
    let request = ActiveMessage::new(ProgressLevel::User, move || {
        let Some(carried) = request_slot.lock().take() else {
            return;
        };
        let value = f();
        if let Some(remote) = carried.remote {
            remote.fire(());
        }
        if let Some(operation) = carried.operation {
            if reply_wanted {
                reply(origin, operation, value);
            }
        }
    });

    if let Err(err) = runtime.transport().inject(target, request) {
        warn!(target, error = %err, "rpc injection failed; unwinding completions");
        if let Some(carried) = slot.lock().take() {
            carried.unwind();
        }
        state.unwind();
        return Err(err);
    }
    trace!(origin, target, "rpc injected");
    state.fire_source();
    drop(runtime);
    Ok(init.finish())
}

/// Runs `f` on the world persona of `target` without an operation
/// completion.
///
/// # Errors
///
/// As [`rpc`].
pub fn rpc_ff<F, S, R>(
    target: Rank,
    f: F,
    completions: Completions<NoCx, S, R>,
) -> Result<BindOutputs<NoCx, S, ()>>
where
    F: FnOnce() + Send + 'static,
    S: Deliver<SourceEvent, ()>,
    R: Deliver<RemoteEvent, ()>,
{
    rpc(target, f, completions)
}

/// Sends `value` back to `origin`, where it fires `operation`.
///
/// The request has already run, so the operation is never unwound from
/// here: a refused reply is retried from the world persona until the
/// transport takes it.
fn reply<OS, U>(origin: Rank, operation: OS, value: U)
where
    OS: Fire<U>,
    U: Send + 'static,
{
    let slot: Shared<(OS, U)> = Arc::new(Mutex::new(Some((operation, value))));
    send_reply(origin, slot, 0);
}

fn send_reply<OS, U>(origin: Rank, slot: Shared<(OS, U)>, attempt: u64)
where
    OS: Fire<U>,
    U: Send + 'static,
{
    let Some(runtime) = runtime::current() else {
        // Finalize drops queued work; the operation goes with it.
        warn!(origin, attempt, "rpc reply dropped: runtime finalized");
        return;
    };
    let reply_slot = Arc::clone(&slot);
    let message = ActiveMessage::new(ProgressLevel::User, move || {
        if let Some((operation, value)) = reply_slot.lock().take() {
            operation.fire(value);
        }
    });
    match runtime.transport().inject(origin, message) {
        Ok(()) => {
            trace!(origin, attempt, "rpc reply injected");
        }
        Err(err) if err.is_retryable() => {
            debug!(origin, attempt, error = %err, "rpc reply refused; retrying");
            runtime
                .world_persona()
                .enqueue_fn(ProgressLevel::Internal, move || {
                    send_reply(origin, slot, attempt + 1);
                });
        }
        Err(err) => usage_violation(
            UsageViolation::ReplyUndeliverable,
            format!("rpc reply to rank {origin}: {err}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{as_blocking, as_callback, as_future, as_promise, as_rpc};
    use crate::promise::Promise;
    use crate::runtime::RuntimeBuilder;
    use crate::test_utils::{init_test_logging, runtime_lock};
    use crate::transport::LoopbackTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn rpc_without_runtime_is_an_error() {
        init_test("rpc_without_runtime_is_an_error");
        let _guard = runtime_lock();
        let err = rpc(0, || 1u8, Completions::new().operation(as_future())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
        crate::test_complete!("rpc_without_runtime_is_an_error");
    }

    #[test]
    fn rpc_round_trip_fires_every_event() {
        init_test("rpc_round_trip_fires_every_event");
        let _guard = runtime_lock();
        let rt = crate::runtime::init().unwrap();
        let _world = rt.world_persona().acquire();

        let remote_hits = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&remote_hits);
        let out = rpc(
            0,
            || "pong".to_string(),
            Completions::new()
                .operation(as_future())
                .source(as_future())
                .remote(as_rpc(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                })),
        )
        .unwrap();
        assert!(out.source.is_ready());
        assert_eq!(out.operation.clone().wait(), "pong");
        assert_eq!(remote_hits.load(Ordering::SeqCst), 1);

        drop(_world);
        rt.finalize();
        crate::test_complete!("rpc_round_trip_fires_every_event");
    }

    #[test]
    fn blocking_rpc_returns_value() {
        init_test("blocking_rpc_returns_value");
        let _guard = runtime_lock();
        let rt = crate::runtime::init().unwrap();
        let _world = rt.world_persona().acquire();
        let out = rpc(0, || 6 * 7, Completions::new().operation(as_blocking())).unwrap();
        assert_eq!(out.operation, 42);
        drop(_world);
        rt.finalize();
        crate::test_complete!("blocking_rpc_returns_value");
    }

    #[test]
    fn invalid_rank_unwinds_promise() {
        init_test("invalid_rank_unwinds_promise");
        let _guard = runtime_lock();
        let rt = crate::runtime::init().unwrap();
        let p = Promise::<()>::new();
        let err = rpc(5, || (), Completions::new().operation(as_promise(&p))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRank);
        assert_eq!(p.pending(), 0);
        assert!(p.finalize().is_ready());
        rt.finalize();
        crate::test_complete!("invalid_rank_unwinds_promise");
    }

    #[test]
    fn refused_injection_unwinds_and_never_runs() {
        init_test("refused_injection_unwinds_and_never_runs");
        let _guard = runtime_lock();
        // Other threads' progress must not drain the loopback queue here.
        let rt = RuntimeBuilder::new()
            .transport(Arc::new(LoopbackTransport::with_limit(1)))
            .poll_transport_on_progress(false)
            .init()
            .unwrap();

        crate::test_section!("fill the transport");
        let ran = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&ran);
        rpc_ff(
            0,
            move || {
                first.fetch_add(1, Ordering::SeqCst);
            },
            Completions::new(),
        )
        .unwrap();

        crate::test_section!("refused request");
        let p = Promise::<()>::new();
        let second = Arc::clone(&ran);
        let callbacks = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&callbacks);
        let err = rpc_ff(
            0,
            move || {
                second.fetch_add(10, Ordering::SeqCst);
            },
            Completions::new()
                .source(as_promise(&p))
                .remote(as_rpc(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InjectionFailed);
        assert!(err.is_retryable());
        assert!(p.finalize().is_ready());

        crate::test_section!("only the accepted request runs");
        let delivered = rt
            .transport()
            .poll(&mut |message| message.into_lpc().execute());
        assert_eq!(delivered, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.load(Ordering::SeqCst), 0);

        rt.finalize();
        crate::test_complete!("refused_injection_unwinds_and_never_runs");
    }

    #[test]
    fn operation_callback_runs_on_reply() {
        init_test("operation_callback_runs_on_reply");
        let _guard = runtime_lock();
        let rt = crate::runtime::init().unwrap();
        let _world = rt.world_persona().acquire();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        rpc(
            0,
            || 9u64,
            Completions::new().operation(as_callback(move |v: u64| *s.lock() = Some(v))),
        )
        .unwrap();
        assert_eq!(*seen.lock(), None);
        while crate::persona::progress_required() {
            crate::persona::progress(ProgressLevel::User);
        }
        assert_eq!(*seen.lock(), Some(9));
        drop(_world);
        rt.finalize();
        crate::test_complete!("operation_callback_runs_on_reply");
    }
}
