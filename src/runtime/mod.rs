//! Process-wide runtime state.
//!
//! - [`config`]: runtime configuration types
//! - [`env_config`]: `PGASYNC_*` environment overrides and TOML files
//! - [`builder`]: runtime builder and handle
//!
//! The runtime is reference counted: every successful [`init`] must be
//! paired with a [`finalize`]. The first `init` installs the transport and
//! creates the world persona; the last `finalize` tears both down, dropping
//! any lpcs still queued on the world persona without running them.
//!
//! Personas, futures and promises work without a runtime. Until `init`, the
//! scheduler runs with [`RuntimeConfig::default`] and progress skips the
//! transport poll.
//!
//! # Quick Start
//!
//! ```ignore
//! let rt = pgasync::RuntimeBuilder::new().burst_limit(32).init()?;
//! let _world = rt.world_persona().acquire();
//! // ... communicate ...
//! rt.finalize();
//! ```

pub mod builder;
pub mod config;
pub mod env_config;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::RuntimeConfig;
pub use env_config::ConfigError;

use crate::error::{usage_violation, Result, UsageViolation};
use crate::persona::Persona;
use crate::tracing_compat::debug;
use crate::transport::{Rank, Transport};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

struct Installed {
    runtime: Runtime,
    refs: usize,
}

static INSTALLED: RwLock<Option<Installed>> = parking_lot::const_rwlock(None);

// Hot-path copies of the installed config.
static BURST_LIMIT: AtomicUsize = AtomicUsize::new(config::DEFAULT_BURST_LIMIT);
static SPIN_BEFORE_YIELD: AtomicU32 =
    AtomicU32::new(crate::lpc::mpsc::DEFAULT_SPIN_BEFORE_YIELD);
static MAX_LIVE_HEADERS: AtomicUsize = AtomicUsize::new(usize::MAX);
static POLL_TRANSPORT: AtomicBool = AtomicBool::new(true);
static DISCHARGE_SPIN_LIMIT: AtomicU64 = AtomicU64::new(u64::MAX);

/// Scheduler settings in effect right now.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tuning {
    pub(crate) burst_limit: usize,
    pub(crate) spin_before_yield: u32,
    pub(crate) max_live_headers: Option<usize>,
    pub(crate) poll_transport: bool,
    pub(crate) discharge_spin_limit: Option<u64>,
}

pub(crate) fn tuning() -> Tuning {
    let max = MAX_LIVE_HEADERS.load(Ordering::Relaxed);
    let discharge = DISCHARGE_SPIN_LIMIT.load(Ordering::Relaxed);
    Tuning {
        burst_limit: BURST_LIMIT.load(Ordering::Relaxed),
        spin_before_yield: SPIN_BEFORE_YIELD.load(Ordering::Relaxed),
        max_live_headers: (max != usize::MAX).then_some(max),
        poll_transport: POLL_TRANSPORT.load(Ordering::Relaxed),
        discharge_spin_limit: (discharge != u64::MAX).then_some(discharge),
    }
}

fn store_tuning(config: &RuntimeConfig) {
    BURST_LIMIT.store(config.burst_limit, Ordering::Relaxed);
    SPIN_BEFORE_YIELD.store(config.spin_before_yield, Ordering::Relaxed);
    MAX_LIVE_HEADERS.store(config.max_live_headers.unwrap_or(usize::MAX), Ordering::Relaxed);
    POLL_TRANSPORT.store(config.poll_transport_on_progress, Ordering::Relaxed);
    DISCHARGE_SPIN_LIMIT.store(config.discharge_spin_limit.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Installs a runtime, or bumps the count of the one already installed.
///
/// `build` runs only for the first reference.
fn install_or_share<F>(build: F) -> Result<Runtime>
where
    F: FnOnce() -> Result<(RuntimeConfig, Arc<dyn Transport>)>,
{
    let mut slot = INSTALLED.write();
    if let Some(installed) = slot.as_mut() {
        installed.refs += 1;
        debug!(refs = installed.refs, "runtime init (shared)");
        return Ok(installed.runtime.clone());
    }
    let (config, transport) = build()?;
    store_tuning(&config);
    let runtime = Runtime::assemble(config, Persona::new(), transport);
    debug!(
        rank_me = runtime.rank_me(),
        rank_n = runtime.rank_n(),
        world = %runtime.world_persona().id(),
        "runtime initialized"
    );
    *slot = Some(Installed {
        runtime: runtime.clone(),
        refs: 1,
    });
    Ok(runtime)
}

/// Initializes the runtime with defaults and `PGASYNC_*` overrides.
pub fn init() -> Result<Runtime> {
    RuntimeBuilder::new().init()
}

/// Drops one runtime reference. Returns true if this call tore it down.
///
/// Finalizing without a matching `init` is a usage violation.
#[track_caller]
pub fn finalize() -> bool {
    let torn_down = {
        let mut slot = INSTALLED.write();
        let Some(installed) = slot.as_mut() else {
            usage_violation(UsageViolation::RuntimeNotInitialized, "finalize without init");
        };
        installed.refs -= 1;
        if installed.refs > 0 {
            debug!(refs = installed.refs, "runtime finalize (shared)");
            return false;
        }
        store_tuning(&RuntimeConfig::default());
        slot.take()
    };
    // Queued lpcs may touch the runtime while dropping; the lock is released.
    drop(torn_down);
    debug!("runtime finalized");
    true
}

/// Returns true between the first `init` and the last `finalize`.
#[must_use]
pub fn is_initialized() -> bool {
    INSTALLED.read().is_some()
}

/// Returns a handle to the installed runtime, if any.
#[must_use]
pub fn current() -> Option<Runtime> {
    INSTALLED
        .read()
        .as_ref()
        .map(|installed| installed.runtime.clone())
}

#[track_caller]
fn expect_runtime(what: &str) -> Runtime {
    match current() {
        Some(runtime) => runtime,
        None => usage_violation(UsageViolation::RuntimeNotInitialized, what),
    }
}

/// The world persona of the installed runtime.
#[must_use]
#[track_caller]
pub fn world_persona() -> Persona {
    expect_runtime("world_persona").world_persona().clone()
}

/// This process's rank.
#[must_use]
#[track_caller]
pub fn rank_me() -> Rank {
    expect_runtime("rank_me").rank_me()
}

/// Number of ranks in the job.
#[must_use]
#[track_caller]
pub fn rank_n() -> Rank {
    expect_runtime("rank_n").rank_n()
}

/// Moves arrived transport messages onto the world persona.
pub(crate) fn poll_transport() -> usize {
    let Some(runtime) = current() else {
        return 0;
    };
    let world = runtime.world_persona().clone();
    runtime.transport().poll(&mut |message| {
        let level = message.level();
        world.enqueue(level, message.into_lpc());
    })
}

/// Messages injected by this process not yet handed to their target.
pub(crate) fn in_flight() -> usize {
    current().map_or(0, |runtime| runtime.transport().in_flight())
}
