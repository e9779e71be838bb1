//! Runtime configuration types.
//!
//! These types hold the concrete values that drive scheduling behavior. In
//! most cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder)
//! rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `burst_limit` | 64 |
//! | `spin_before_yield` | 128 |
//! | `max_live_headers` | `None` (unbounded) |
//! | `poll_transport_on_progress` | true |
//! | `discharge_spin_limit` | `None` |

use crate::lpc::mpsc::DEFAULT_SPIN_BEFORE_YIELD;

/// Default number of lpcs run per inbox per progress call.
pub const DEFAULT_BURST_LIMIT: usize = 64;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum lpcs executed per inbox in one progress call.
    pub burst_limit: usize,
    /// MPSC consumer spins on the last-node race before yielding.
    pub spin_before_yield: u32,
    /// Budget of live shared result headers (`None` = unbounded).
    pub max_live_headers: Option<usize>,
    /// Poll the transport at the start of every progress call.
    pub poll_transport_on_progress: bool,
    /// Maximum rounds `discharge` runs before giving up (`None` = no cap).
    pub discharge_spin_limit: Option<u64>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.burst_limit == 0 {
            self.burst_limit = 1;
        }
        if self.max_live_headers == Some(0) {
            self.max_live_headers = Some(1);
        }
        if self.discharge_spin_limit == Some(0) {
            self.discharge_spin_limit = Some(1);
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            burst_limit: DEFAULT_BURST_LIMIT,
            spin_before_yield: DEFAULT_SPIN_BEFORE_YIELD,
            max_live_headers: None,
            poll_transport_on_progress: true,
            discharge_spin_limit: None,
        }
    }
}
