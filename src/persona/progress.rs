//! The progress engine.
//!
//! [`progress`] is the only place deferred work runs. One call:
//!
//! 1. polls the transport (when a runtime is installed and
//!    `poll_transport_on_progress` is set), handing arrived messages to the
//!    world persona;
//! 2. drains internal-level inboxes of every persona the thread holds, top
//!    of stack first;
//! 3. at [`ProgressLevel::User`], drains the user-level inboxes in the same
//!    order.
//!
//! Each inbox runs at most `burst_limit` lpcs per call, so a callback that
//! keeps re-enqueueing itself cannot starve the caller. Work enqueued during a
//! call is picked up by the next one.
//!
//! Blocking waits ([`discharge`], `Future::wait`) always poll, whatever the
//! knob says; it only governs explicit calls to [`progress`].

use super::context::{self, UserSection};
use super::ProgressLevel;
use crate::error::{usage_violation, UsageViolation};
use crate::runtime;
use crate::tracing_compat::{trace, warn};

/// Runs one round of deferred work at `level`. Returns the number of lpcs
/// executed on this thread's personas; delivered transport messages are not
/// counted until they run.
///
/// User-level progress from inside a user-level callback is a usage
/// violation.
#[track_caller]
pub fn progress(level: ProgressLevel) -> usize {
    if level == ProgressLevel::User && context::user_depth() > 0 {
        usage_violation(
            UsageViolation::ReentrantUserProgress,
            "progress(User) called from a user-level callback",
        );
    }

    let tuning = runtime::tuning();
    run_round(level, tuning.poll_transport, tuning.burst_limit)
}

/// One progress round on behalf of a blocking wait. The transport is polled
/// unconditionally so the wait cannot stall on undelivered messages.
pub(crate) fn blocking_progress(level: ProgressLevel) -> usize {
    run_round(level, true, runtime::tuning().burst_limit)
}

fn run_round(level: ProgressLevel, poll: bool, burst_limit: usize) -> usize {
    if poll {
        runtime::poll_transport();
    }

    let mut ran = 0;

    let personas = context::active_personas();
    for persona in &personas {
        ran += persona.burst(ProgressLevel::Internal, burst_limit);
    }

    if level == ProgressLevel::User {
        let _section = UserSection::enter();
        for persona in &personas {
            ran += persona.burst(ProgressLevel::User, burst_limit);
        }
    }

    if ran > 0 {
        trace!(?level, ran, "progress");
    }
    ran
}

/// Returns true if a call to [`progress`] would find work: queued lpcs on a
/// persona this thread holds, or undelivered transport messages.
#[must_use]
pub fn progress_required() -> bool {
    context::active_personas()
        .iter()
        .any(super::Persona::has_queued_work)
        || runtime::in_flight() > 0
}

/// Runs internal-level progress until every message this process injected
/// has been handed to its target.
///
/// With `discharge_spin_limit` configured, gives up after that many rounds
/// and returns false.
pub fn discharge() -> bool {
    let tuning = runtime::tuning();
    let mut rounds: u64 = 0;
    while runtime::in_flight() > 0 {
        blocking_progress(ProgressLevel::Internal);
        rounds += 1;
        if let Some(limit) = tuning.discharge_spin_limit {
            if rounds >= limit {
                warn!(rounds, in_flight = runtime::in_flight(), "discharge gave up");
                return false;
            }
        }
        if rounds > u64::from(tuning.spin_before_yield) {
            std::thread::yield_now();
        }
    }
    true
}
