//! RAII guards for persona ownership.

use super::{context, Persona};
use crate::error::{usage_violation, UsageViolation};
use core::fmt;
use core::marker::PhantomData;
use parking_lot::MutexGuard;

/// Holds one activation of a persona on the current thread.
///
/// Scopes must be dropped in reverse order of creation. The guard is
/// neither `Send` nor `Sync`: ownership belongs to the thread that acquired.
#[must_use = "the persona is released when the scope is dropped"]
pub struct PersonaScope {
    persona: Persona,
    index: usize,
    _not_send: PhantomData<*const ()>,
}

impl PersonaScope {
    pub(super) fn push(persona: Persona) -> Self {
        let index = context::push(persona.clone());
        Self {
            persona,
            index,
            _not_send: PhantomData,
        }
    }

    /// The persona this scope holds.
    #[must_use]
    pub fn persona(&self) -> &Persona {
        &self.persona
    }
}

impl Drop for PersonaScope {
    fn drop(&mut self) {
        let in_order = context::pop(&self.persona, self.index);
        self.persona.deactivate();
        if !in_order && !std::thread::panicking() {
            usage_violation(
                UsageViolation::ScopeOrder,
                format_args!("{} released at stack index {}", self.persona.id(), self.index),
            );
        }
    }
}

impl fmt::Debug for PersonaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonaScope")
            .field("persona", &self.persona.id())
            .field("index", &self.index)
            .finish()
    }
}

/// A [`PersonaScope`] acquired under a caller-supplied mutex.
///
/// Fields drop in declaration order: the persona is released before the
/// lock.
#[must_use = "the persona is released when the scope is dropped"]
pub struct LockedPersonaScope<'a> {
    scope: PersonaScope,
    _lock: MutexGuard<'a, ()>,
}

impl<'a> LockedPersonaScope<'a> {
    pub(super) fn new(scope: PersonaScope, lock: MutexGuard<'a, ()>) -> Self {
        Self { scope, _lock: lock }
    }

    /// The persona this scope holds.
    #[must_use]
    pub fn persona(&self) -> &Persona {
        self.scope.persona()
    }
}

impl fmt::Debug for LockedPersonaScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedPersonaScope")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
