//! pgasync: the completion and persona engine of a PGAS communication runtime.
//!
//! # Overview
//!
//! A partitioned-global-address-space runtime gives every process one-sided
//! puts, gets, atomics and RPCs against its peers. Each of those primitives
//! is asynchronous, and every one of them reports completion the same way.
//! This crate is that shared machinery:
//!
//! - deferred callbacks ("lpcs") held in intrusive queues
//! - personas, which decide which thread may run which lpc, and when
//! - futures and promises, the values lpcs produce
//! - completion events, the per-call choice of how a primitive reports back
//!
//! Scheduling is cooperative. No thread pool exists and nothing runs behind
//! the caller's back: queued work only runs inside [`progress`], on the
//! thread that owns the persona it was queued on.
//!
//! # Core Guarantees
//!
//! - **Exclusive personas**: at most one thread owns a persona at a time
//! - **FIFO inboxes**: work queued into one inbox runs in queue order
//! - **Internal first**: internal-level work drains before user-level work
//! - **Single assignment**: a future's value is written once and never changes
//! - **No surprise re-entry**: user-level progress never nests on one thread
//! - **No silent misuse**: contract violations panic with a diagnostic
//!
//! # Module Structure
//!
//! - [`lpc`]: intrusive single-threaded and MPSC lpc queues
//! - [`persona`]: personas, persona scopes, `progress`
//! - [`future`]: futures, `then`, `when_all`
//! - [`promise`]: contribution-counting promises
//! - [`completion`]: completion events and delivery kinds
//! - [`runtime`]: process-wide init/finalize, world persona, configuration
//! - [`transport`]: the active-message boundary and a loopback transport
//! - [`ops`]: `lpc` and `rpc` built on the completion framework
//! - [`error`]: error types and usage violations
//!
//! # Example
//!
//! ```ignore
//! use pgasync::{as_future, rpc, Completions};
//!
//! let rt = pgasync::init()?;
//! let _world = rt.world_persona().acquire();
//! let out = rpc(0, || 6 * 7, Completions::new().operation(as_future()))?;
//! assert_eq!(out.operation.wait(), 42);
//! drop(_world);
//! rt.finalize();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::type_complexity)]

pub mod completion;
pub mod error;
pub mod future;
pub mod lpc;
pub mod ops;
pub mod persona;
pub mod promise;
pub mod runtime;
pub mod tracing_compat;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use completion::{
    as_blocking, as_callback, as_future, as_lpc, as_promise, as_rpc, Completions, CxOutputs,
    NoCx, OperationEvent, RemoteEvent, SourceEvent,
};
pub use error::{Error, ErrorCategory, ErrorKind, Result, UsageViolation};
pub use future::{make_future, to_future, when_all, when_all_vec, Future, FutureStatus, Value};
pub use ops::{lpc_ff, lpc_with, rpc, rpc_ff};
pub use persona::{
    current_persona, default_persona, discharge, progress, progress_required, Persona,
    PersonaId, PersonaScope, ProgressLevel,
};
pub use promise::Promise;
pub use runtime::{finalize, init, Runtime, RuntimeBuilder, RuntimeConfig};
pub use transport::{LoopbackTransport, Rank, Transport};

