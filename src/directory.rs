//! Directory of responders, pending initiators and open exchanges
//!
//! Every operation runs inside one critical section of the directory
//! instance. Sections are held for the duration of a map operation only and
//! never span I/O, so callers must copy what they need out and release
//! before writing to any sink.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::core_types::{ExchangeId, PeerName};
use crate::error::HubError;
use crate::models::{Exchange, Initiator, Responder};

/// Outcome of an initiator's atomic target lookup
#[derive(Debug)]
pub enum TargetLookup {
    /// Target registered; the initiator was not stored
    Found(Responder),
    /// Target absent; the initiator is now pending
    Enqueued { replaced: Option<Initiator> },
    /// Target absent and the initiator asked not to wait
    Missing,
}

/// Directory entry counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub responders: usize,
    pub pending_initiators: usize,
    pub exchanges: usize,
}

/// Storage capability required by the matching engine
///
/// Lookups return `Option` because absence is an expected outcome the caller
/// branches on. Overwrites and deletes are gated by the management-key policy
/// and fail with `HubError::Conflict` without mutating anything.
pub trait DirectoryStore: Send + Sync {
    /// Store `responder`, returning the entry it replaced
    fn upsert_responder(&self, responder: Responder) -> Result<Option<Responder>, HubError>;

    fn get_responder(&self, name: &PeerName) -> Option<Responder>;

    /// Snapshot copy; order not guaranteed
    fn list_responders(&self) -> Vec<Responder>;

    /// Record activity for a responder
    fn touch_responder(&self, name: &PeerName, at: DateTime<Utc>);

    fn delete_responder(&self, name: &PeerName, management_key: &str)
    -> Result<Responder, HubError>;

    /// Store a pending initiator under its target, returning the entry it replaced
    fn upsert_initiator(&self, initiator: Initiator) -> Result<Option<Initiator>, HubError>;

    /// Look up the initiator's target and, if absent, enqueue the initiator,
    /// all in one critical section
    fn find_responder_or_enqueue(&self, initiator: Initiator) -> Result<TargetLookup, HubError>;

    fn list_pending_initiators(&self, responder: &PeerName) -> Vec<Initiator>;

    /// Remove and return every initiator waiting for `responder`
    fn take_pending_initiators(&self, responder: &PeerName) -> Vec<Initiator>;

    fn delete_initiator(
        &self,
        target: &PeerName,
        name: &PeerName,
        management_key: &str,
    ) -> Result<Initiator, HubError>;

    fn create_exchange(&self, exchange: Exchange);

    fn get_exchange(&self, id: &ExchangeId) -> Option<Exchange>;

    /// Remove and return an exchange; at most one caller ever receives it
    fn delete_exchange(&self, id: &ExchangeId) -> Option<Exchange>;

    fn stats(&self) -> DirectoryStats;
}

#[derive(Default)]
struct DirectoryState {
    responders: HashMap<PeerName, Responder>,
    /// target responder name -> initiators waiting for it
    pending: HashMap<PeerName, Vec<Initiator>>,
    exchanges: HashMap<ExchangeId, Exchange>,
}

impl DirectoryState {
    fn upsert_pending(&mut self, initiator: Initiator) -> Result<Option<Initiator>, HubError> {
        let waiting = self.pending.entry(initiator.target.clone()).or_default();
        match waiting.iter_mut().find(|i| i.name == initiator.name) {
            Some(existing) => {
                if !existing.management_key_matches(&initiator.management_key) {
                    return Err(conflict(&initiator.name, "initiator"));
                }
                Ok(Some(std::mem::replace(existing, initiator)))
            }
            None => {
                waiting.push(initiator);
                Ok(None)
            }
        }
    }

    fn remove_pending(
        &mut self,
        target: &PeerName,
        name: &PeerName,
        management_key: &str,
    ) -> Result<Option<Initiator>, HubError> {
        let Some(waiting) = self.pending.get_mut(target) else {
            return Ok(None);
        };
        let Some(idx) = waiting.iter().position(|i| &i.name == name) else {
            return Ok(None);
        };
        if !waiting[idx].management_key_matches(management_key) {
            return Err(conflict(name, "initiator"));
        }
        let removed = waiting.remove(idx);
        if waiting.is_empty() {
            self.pending.remove(target);
        }
        Ok(Some(removed))
    }
}

fn conflict(name: &PeerName, role: &str) -> HubError {
    HubError::Conflict(format!(
        "{role} {name} is registered with a different management key"
    ))
}

/// Single in-process directory guarded by one mutex
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DirectoryStore for InMemoryDirectory {
    fn upsert_responder(&self, responder: Responder) -> Result<Option<Responder>, HubError> {
        let mut state = self.state();
        if let Some(existing) = state.responders.get(&responder.name)
            && !existing.management_key_matches(&responder.management_key)
        {
            return Err(conflict(&responder.name, "responder"));
        }
        Ok(state.responders.insert(responder.name.clone(), responder))
    }

    fn get_responder(&self, name: &PeerName) -> Option<Responder> {
        self.state().responders.get(name).cloned()
    }

    fn list_responders(&self) -> Vec<Responder> {
        self.state().responders.values().cloned().collect()
    }

    fn touch_responder(&self, name: &PeerName, at: DateTime<Utc>) {
        if let Some(r) = self.state().responders.get_mut(name) {
            r.last_seen_at = at;
        }
    }

    fn delete_responder(
        &self,
        name: &PeerName,
        management_key: &str,
    ) -> Result<Responder, HubError> {
        let mut state = self.state();
        match state.responders.get(name) {
            None => Err(HubError::NotFound(format!("responder {name}"))),
            Some(existing) if !existing.management_key_matches(management_key) => {
                Err(conflict(name, "responder"))
            }
            Some(_) => state
                .responders
                .remove(name)
                .ok_or_else(|| HubError::NotFound(format!("responder {name}"))),
        }
    }

    fn upsert_initiator(&self, initiator: Initiator) -> Result<Option<Initiator>, HubError> {
        self.state().upsert_pending(initiator)
    }

    fn find_responder_or_enqueue(&self, initiator: Initiator) -> Result<TargetLookup, HubError> {
        let mut state = self.state();
        if let Some(responder) = state.responders.get(&initiator.target).cloned() {
            // A stale pending copy would be matched a second time by the
            // responder's sweep.
            state.remove_pending(
                &initiator.target,
                &initiator.name,
                &initiator.management_key,
            )?;
            return Ok(TargetLookup::Found(responder));
        }
        if initiator.ignore_if_target_missing {
            return Ok(TargetLookup::Missing);
        }
        let replaced = state.upsert_pending(initiator)?;
        Ok(TargetLookup::Enqueued { replaced })
    }

    fn list_pending_initiators(&self, responder: &PeerName) -> Vec<Initiator> {
        self.state()
            .pending
            .get(responder)
            .cloned()
            .unwrap_or_default()
    }

    fn take_pending_initiators(&self, responder: &PeerName) -> Vec<Initiator> {
        self.state().pending.remove(responder).unwrap_or_default()
    }

    fn delete_initiator(
        &self,
        target: &PeerName,
        name: &PeerName,
        management_key: &str,
    ) -> Result<Initiator, HubError> {
        self.state()
            .remove_pending(target, name, management_key)?
            .ok_or_else(|| HubError::NotFound(format!("initiator {name} waiting for {target}")))
    }

    fn create_exchange(&self, exchange: Exchange) {
        self.state().exchanges.insert(exchange.id, exchange);
    }

    fn get_exchange(&self, id: &ExchangeId) -> Option<Exchange> {
        self.state().exchanges.get(id).cloned()
    }

    fn delete_exchange(&self, id: &ExchangeId) -> Option<Exchange> {
        self.state().exchanges.remove(id)
    }

    fn stats(&self) -> DirectoryStats {
        let state = self.state();
        DirectoryStats {
            responders: state.responders.len(),
            pending_initiators: state.pending.values().map(Vec::len).sum(),
            exchanges: state.exchanges.len(),
        }
    }
}
