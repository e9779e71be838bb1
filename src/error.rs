//! Error types and usage-violation reporting for pgasync.
//!
//! The completion engine distinguishes two failure classes:
//!
//! - **Recoverable errors** ([`Error`]): resource exhaustion at the point a
//!   header is allocated, transport injection failures, configuration
//!   problems. These are returned to the immediate caller.
//! - **Usage violations** ([`UsageViolation`]): wrong-thread persona access,
//!   double finalize of a promise, reading a result that is not ready,
//!   re-entrant blocking waits. Continuing past one of these would corrupt a
//!   queue or silently produce a wrong value, so they are reported through
//!   [`usage_violation`], which logs and panics.
//!
//! Nothing propagates through the queue or scheduler machinery itself: a
//! deferred callback that can fail encodes the failure in its own value.

use core::fmt;
use std::sync::Arc;

use crate::tracing_compat::error;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Usage ===
    /// The persona is owned by another thread.
    PersonaOwned,
    /// The process-wide runtime has not been initialized.
    NotInitialized,

    // === Resources ===
    /// The live-header budget is exhausted.
    HeaderExhausted,

    // === Transport ===
    /// The target rank does not exist.
    InvalidRank,
    /// The transport refused to inject a message.
    InjectionFailed,

    // === Configuration ===
    /// Invalid configuration value.
    Config,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::PersonaOwned | Self::NotInitialized => ErrorCategory::Usage,
            Self::HeaderExhausted => ErrorCategory::Resource,
            Self::InvalidRank | Self::InjectionFailed => ErrorCategory::Transport,
            Self::Config => ErrorCategory::Config,
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::HeaderExhausted | Self::InjectionFailed)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller misuse that could be reported without corrupting state.
    Usage,
    /// Allocation budget failures.
    Resource,
    /// Failures at the transport boundary.
    Transport,
    /// Configuration failures.
    Config,
}

/// The main error type for pgasync operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates a header exhaustion error.
    #[must_use]
    pub fn header_exhausted(live: usize, max: usize) -> Self {
        Self::new(ErrorKind::HeaderExhausted)
            .with_message(format!("{live} live headers, budget is {max}"))
    }

    /// Creates an invalid rank error.
    #[must_use]
    pub fn invalid_rank(rank: u32, rank_n: u32) -> Self {
        Self::new(ErrorKind::InvalidRank)
            .with_message(format!("rank {rank} out of range (rank_n = {rank_n})"))
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// A specialized Result type for pgasync operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Contract violations that abort the offending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageViolation {
    /// A persona was acquired while another thread owns it.
    PersonaOwnedElsewhere,
    /// Persona scopes were released out of stack order.
    ScopeOrder,
    /// `Promise::finalize` was called twice.
    PromiseFinalizedTwice,
    /// A promise was fulfilled past zero outstanding contributions.
    PromiseOverFulfilled,
    /// A result value was constructed twice.
    ResultAlreadySet,
    /// A result was read before the header became ready.
    ResultNotReady,
    /// User-level progress was requested from inside a user-level callback.
    ReentrantUserProgress,
    /// A blocking wait was requested from inside a user-level callback.
    ReentrantWait,
    /// A completion event was fired more than once.
    EventFiredTwice,
    /// Two threads tried to consume the same MPSC queue.
    ConcurrentConsumer,
    /// An operation that needs the runtime ran before `init`.
    RuntimeNotInitialized,
    /// The live-header budget was exhausted in an infallible constructor.
    HeaderBudget,
    /// An rpc reply was refused with an error that retrying cannot clear.
    ReplyUndeliverable,
}

impl UsageViolation {
    /// Short, stable description used as the panic message prefix.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::PersonaOwnedElsewhere => "persona is owned by another thread",
            Self::ScopeOrder => "persona scopes released out of order",
            Self::PromiseFinalizedTwice => "promise finalized twice",
            Self::PromiseOverFulfilled => "promise fulfilled past zero",
            Self::ResultAlreadySet => "result constructed twice",
            Self::ResultNotReady => "result read before ready",
            Self::ReentrantUserProgress => "re-entrant user-level progress",
            Self::ReentrantWait => "blocking wait inside a user-level callback",
            Self::EventFiredTwice => "completion event fired twice",
            Self::ConcurrentConsumer => "concurrent consumers on an mpsc queue",
            Self::RuntimeNotInitialized => "runtime not initialized",
            Self::HeaderBudget => "live-header budget exhausted",
            Self::ReplyUndeliverable => "rpc reply undeliverable",
        }
    }
}

impl fmt::Display for UsageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Reports a usage violation and never returns.
///
/// The violation is logged at error level and then raised as a panic with
/// the message `pgasync usage violation: <description>: <detail>`.
#[cold]
#[track_caller]
pub fn usage_violation(violation: UsageViolation, detail: impl fmt::Display) -> ! {
    let location = std::panic::Location::caller();
    error!(
        violation = ?violation,
        detail = %detail,
        location = %location,
        "usage violation"
    );
    panic!("pgasync usage violation: {violation}: {detail}");
}
