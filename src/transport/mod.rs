//! Boundary to the active-message layer.
//!
//! The completion engine never encodes or sends bytes itself. A
//! [`Transport`] accepts type-erased [`ActiveMessage`]s addressed to a rank
//! and, when polled, hands messages that arrived for this process back to
//! the runtime, which queues them on the world persona at the message's
//! progress level.
//!
//! [`LoopbackTransport`] is the in-process implementation used for
//! single-rank jobs and tests.

pub mod loopback;

pub use loopback::LoopbackTransport;

use crate::error::Result;
use crate::lpc::Lpc;
use crate::persona::ProgressLevel;
use core::fmt;

/// Index of a process in the job.
pub type Rank = u32;

/// A message whose arrival runs a callback on the target's world persona.
pub struct ActiveMessage {
    level: ProgressLevel,
    body: Box<Lpc>,
}

impl ActiveMessage {
    /// Wraps `f` to run at `level` on arrival.
    pub fn new<F>(level: ProgressLevel, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            level,
            body: Lpc::new(f),
        }
    }

    /// Progress level the body runs at.
    #[must_use]
    pub fn level(&self) -> ProgressLevel {
        self.level
    }

    /// Unwraps the body for queueing.
    #[must_use]
    pub fn into_lpc(self) -> Box<Lpc> {
        self.body
    }
}

impl fmt::Debug for ActiveMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveMessage")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// An active-message transport.
///
/// Implementations must be callable from any thread.
pub trait Transport: Send + Sync + fmt::Debug {
    /// This process's rank.
    fn rank_me(&self) -> Rank;

    /// Number of ranks in the job.
    fn rank_n(&self) -> Rank;

    /// Sends `message` to `target`.
    ///
    /// On error nothing has left the process and `message` has been
    /// dropped without running.
    fn inject(&self, target: Rank, message: ActiveMessage) -> Result<()>;

    /// Hands every message that has arrived to `deliver`. Returns the number
    /// delivered.
    fn poll(&self, deliver: &mut dyn FnMut(ActiveMessage)) -> usize;

    /// Messages injected by this process that have not yet been handed to
    /// their target.
    fn in_flight(&self) -> usize;
}
