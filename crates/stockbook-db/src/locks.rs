//! # Keyed Locks
//!
//! In-process serialization of the two contention domains: sequence scopes
//! and (item, location) pairs.
//!
//! ## Acquisition Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LockKey ordering (derived Ord)                                         │
//! │                                                                         │
//! │   Sequence(prefix 1, branch 1, 2026-10)        ◄── always first         │
//! │   Sequence(prefix 2, branch 1, 2026-10)                                 │
//! │   Stock { item 3, Branch(1) }                  ◄── then by item,        │
//! │   Stock { item 3, Warehouse(2) }                   location kind,       │
//! │   Stock { item 7, Branch(1) }                      location id          │
//! │                                                                         │
//! │  Every unit of work sorts its keys before locking, so two units never  │
//! │  wait on each other in opposite orders.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Locks are taken before a pooled connection is requested. A task waiting
//! for a key therefore never pins a connection that the holder needs.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stockbook_core::{CoreError, CoreResult, Location, SequenceScope};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

// =============================================================================
// Lock Keys
// =============================================================================

/// A contended key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// Counter row of one (prefix, branch, month, year).
    Sequence(SequenceScope),
    /// Consumable batches of one item at one location.
    Stock { item_id: i64, location: Location },
}

impl LockKey {
    pub fn stock(item_id: i64, location: Location) -> Self {
        LockKey::Stock { item_id, location }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Sequence(scope) => write!(f, "sequence:{}", scope),
            LockKey::Stock { item_id, location } => write!(f, "stock:item:{}@{}", item_id, location),
        }
    }
}

// =============================================================================
// Lock Table
// =============================================================================

/// A table of per-key async mutexes.
///
/// Entries are created on demand and pruned once nobody holds or waits on
/// them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    table: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: LockKey) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the table references these: no holder, no waiter.
        table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        table.entry(key).or_default().clone()
    }

    /// Acquires every key in `keys`, in key order, waiting at most `wait`
    /// for each one.
    ///
    /// On timeout every key already taken is released and `ScopeLocked` is
    /// returned for the key that could not be obtained. The caller decides
    /// whether to back off and retry.
    pub async fn acquire(
        &self,
        keys: impl IntoIterator<Item = LockKey>,
        wait: Duration,
    ) -> CoreResult<HeldLocks> {
        let ordered: BTreeSet<LockKey> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());

        for key in ordered {
            let mutex = self.entry(key);
            match tokio::time::timeout(wait, mutex.lock_owned()).await {
                Ok(guard) => guards.push((key, guard)),
                Err(_) => {
                    warn!(%key, wait_ms = wait.as_millis() as u64, "Lock wait timed out");
                    return Err(CoreError::ScopeLocked {
                        scope: key.to_string(),
                    });
                }
            }
        }

        debug!(count = guards.len(), "Locks acquired");
        Ok(HeldLocks { guards })
    }

    /// Number of keys currently tracked (held or awaited).
    pub fn tracked(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        table.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}

/// Guards for a set of keys; dropping releases them all.
#[derive(Debug)]
pub struct HeldLocks {
    guards: Vec<(LockKey, OwnedMutexGuard<()>)>,
}

impl HeldLocks {
    /// An empty set, for work that touches no contended key.
    pub fn none() -> Self {
        HeldLocks { guards: Vec::new() }
    }

    pub fn holds(&self, key: &LockKey) -> bool {
        self.guards.iter().any(|(held, _)| held == key)
    }

    /// Fails with `LockNotHeld` unless `key` is held.
    pub fn require(&self, key: &LockKey) -> CoreResult<()> {
        if self.holds(key) {
            Ok(())
        } else {
            Err(CoreError::LockNotHeld {
                key: key.to_string(),
            })
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.guards.iter().map(|(key, _)| key)
    }
}
