//! Short-lived social login state.
//!
//! Maps a random state id to the context captured when a social flow starts.
//! Entries become unreadable once the TTL has elapsed, whether or not they
//! were consumed; the periodic sweep reclaims their memory.
//!
//! `get` never deletes. The callback path redeems a state with `take`, which
//! removes it atomically, so concurrent callbacks cannot share one state.

use crate::oauth2::generate::random_url_safe;
use crate::oauth2::provider::Service;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialState {
    /// Local user that initiated the flow, 0 when unauthenticated.
    pub user_id: i64,
    pub language: String,
    pub service: Service,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
struct StateEntry {
    state: SocialState,
    created_at: Instant,
}

impl StateEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

#[derive(Clone, Debug)]
pub struct StateStore {
    entries: Arc<DashMap<String, StateEntry>>,
    ttl: Duration,
}

impl StateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn put(&self, id: impl Into<String>, state: SocialState) {
        self.entries.insert(
            id.into(),
            StateEntry {
                state,
                created_at: Instant::now(),
            },
        );
    }

    /// Store `state` under a fresh random id that no live entry uses.
    pub fn insert_new(&self, state: SocialState) -> Result<String, rand::Error> {
        loop {
            let id = random_url_safe()?;
            match self.entries.entry(id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(StateEntry {
                        state,
                        created_at: Instant::now(),
                    });
                    return Ok(id);
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<SocialState> {
        let expired = match self.entries.get(id) {
            Some(entry) if !entry.is_expired(self.ttl) => return Some(entry.state.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(id, |_, entry| entry.is_expired(self.ttl));
        }
        None
    }

    /// Remove and return a live entry. Only one caller can take a given id.
    pub fn take(&self, id: &str) -> Option<SocialState> {
        let (_, entry) = self.entries.remove(id)?;
        (!entry.is_expired(self.ttl)).then_some(entry.state)
    }

    /// Returns whether an entry was removed.
    pub fn delete(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl));
        before.saturating_sub(self.entries.len())
    }

    pub fn sweep(&self) {
        let removed = self.purge_expired();
        if removed > 0 {
            tracing::debug!(removed, "purged abandoned social login states");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
