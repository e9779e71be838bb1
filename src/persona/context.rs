//! Per-thread persona context.
//!
//! Each thread carries a stack of the personas it currently holds. The
//! bottom entry is the thread's default persona, created on first use; the
//! top entry is the *current* persona, which receives work the thread queues
//! for itself. The same persona may appear more than once when scopes nest.

use super::Persona;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, never-reused identifier of an OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ThreadToken(u64);

impl ThreadToken {
    /// Returns the calling thread's token, assigning one on first use.
    pub(crate) fn current() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TOKEN.with(|slot| {
            let mut token = slot.get();
            if token == 0 {
                token = NEXT.fetch_add(1, Ordering::Relaxed);
                slot.set(token);
            }
            Self(token)
        })
    }

    pub(crate) const fn get(self) -> u64 {
        self.0
    }
}

struct ThreadContext {
    stack: Vec<Persona>,
    /// Number of user-level sections currently open on this thread.
    user_depth: u32,
}

impl ThreadContext {
    const fn new() -> Self {
        Self {
            stack: Vec::new(),
            user_depth: 0,
        }
    }

    fn ensure_default(&mut self) {
        if self.stack.is_empty() {
            self.stack.push(Persona::new_owned_by(ThreadToken::current()));
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        // Leaked scopes still hold their personas; hand them all back.
        while let Some(persona) = self.stack.pop() {
            persona.deactivate();
        }
    }
}

thread_local! {
    static TOKEN: Cell<u64> = const { Cell::new(0) };
    static CONTEXT: RefCell<ThreadContext> = const { RefCell::new(ThreadContext::new()) };
}

fn with_context<R>(f: impl FnOnce(&mut ThreadContext) -> R) -> R {
    CONTEXT.with(|cell| {
        let mut ctx = cell.borrow_mut();
        ctx.ensure_default();
        f(&mut ctx)
    })
}

/// Returns the persona on top of the calling thread's stack.
#[must_use]
pub fn current_persona() -> Persona {
    with_context(|ctx| match ctx.stack.last() {
        Some(top) => top.clone(),
        None => unreachable!("persona stack always holds the default persona"),
    })
}

/// Returns the calling thread's default persona.
#[must_use]
pub fn default_persona() -> Persona {
    with_context(|ctx| ctx.stack[0].clone())
}

/// Pushes `persona` and returns its stack index.
pub(crate) fn push(persona: Persona) -> usize {
    with_context(|ctx| {
        ctx.stack.push(persona);
        ctx.stack.len() - 1
    })
}

/// Pops `persona` if it is the top entry at `index`.
///
/// Returns false on an out-of-order release. A context already torn down
/// counts as a successful pop.
pub(crate) fn pop(persona: &Persona, index: usize) -> bool {
    CONTEXT
        .try_with(|cell| {
            let mut ctx = cell.borrow_mut();
            let in_order = ctx.stack.len() == index + 1
                && ctx.stack.last().is_some_and(|top| top.ptr_eq(persona));
            if in_order {
                ctx.stack.pop();
            }
            in_order
        })
        .unwrap_or(true)
}

/// Snapshot of the distinct personas held by this thread, top first.
pub(crate) fn active_personas() -> SmallVec<[Persona; 4]> {
    with_context(|ctx| {
        let mut out: SmallVec<[Persona; 4]> = SmallVec::new();
        for persona in ctx.stack.iter().rev() {
            if !out.iter().any(|seen| seen.ptr_eq(persona)) {
                out.push(persona.clone());
            }
        }
        out
    })
}

/// Depth of user-level sections open on this thread.
pub(crate) fn user_depth() -> u32 {
    CONTEXT.with(|cell| cell.borrow().user_depth)
}

/// Marks the calling thread as running user-level callbacks until dropped.
pub(crate) struct UserSection {
    _private: (),
}

impl UserSection {
    pub(crate) fn enter() -> Self {
        CONTEXT.with(|cell| cell.borrow_mut().user_depth += 1);
        Self { _private: () }
    }
}

impl Drop for UserSection {
    fn drop(&mut self) {
        let _ = CONTEXT.try_with(|cell| {
            let mut ctx = cell.borrow_mut();
            ctx.user_depth = ctx.user_depth.saturating_sub(1);
        });
    }
}
