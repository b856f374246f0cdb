//! Per-scope accumulator registry.

use super::TallyState;
use crate::types::{MessageId, ScopeId, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Live counters for every scope, one lock per scope.
///
/// Constructed once and shared via `Arc` with the ingestion path, the
/// rollover engine and the query service.
#[derive(Default)]
pub struct Accumulator {
    scopes: RwLock<HashMap<ScopeId, Arc<Mutex<TallyState>>>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the slot for a scope, creating an empty one on first use.
    fn slot(&self, scope: &ScopeId) -> Arc<Mutex<TallyState>> {
        if let Some(slot) = self.scopes.read().get(scope) {
            return Arc::clone(slot);
        }
        let mut scopes = self.scopes.write();
        Arc::clone(scopes.entry(scope.clone()).or_default())
    }

    pub fn record_mention(&self, scope: &ScopeId, message_id: MessageId, user_id: UserId, text: &str) {
        self.slot(scope).lock().record_mention(message_id, user_id, text);
    }

    pub fn record_approval(&self, scope: &ScopeId, message_id: &MessageId, user_id: UserId) {
        self.slot(scope).lock().record_approval(message_id, user_id);
    }

    /// Deep copy of the scope's current counters. Does not reset.
    pub fn snapshot(&self, scope: &ScopeId) -> TallyState {
        match self.scopes.read().get(scope) {
            Some(slot) => slot.lock().clone(),
            None => TallyState::new(),
        }
    }

    /// Clear all counters of a scope.
    pub fn reset(&self, scope: &ScopeId) {
        if let Some(slot) = self.scopes.read().get(scope) {
            slot.lock().clear();
        }
    }

    /// Run `f` while holding the scope's lock exclusively.
    ///
    /// No mention or approval for this scope is applied until `f` returns.
    pub fn with_scope<R>(&self, scope: &ScopeId, f: impl FnOnce(&mut TallyState) -> R) -> R {
        let slot = self.slot(scope);
        let mut state = slot.lock();
        f(&mut state)
    }

    pub fn is_empty(&self, scope: &ScopeId) -> bool {
        match self.scopes.read().get(scope) {
            Some(slot) => slot.lock().is_empty(),
            None => true,
        }
    }

    /// Scopes that have ever been written, sorted.
    pub fn scopes(&self) -> Vec<ScopeId> {
        let mut scopes: Vec<ScopeId> = self.scopes.read().keys().cloned().collect();
        scopes.sort();
        scopes
    }
}
