//! Peer roster (C2): a bounded set of known peers behind a single lock.
//!
//! Every operation acquires the lock on entry and releases it on exit; none
//! of them call out to user code while holding it — that discipline is what
//! lets `engine::tick()` update the roster and invoke callbacks afterwards
//! without risking reentrant deadlock (§8).

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::RosterError;

/// Compile-time bound on the number of simultaneously tracked peers.
pub const MAX_PEERS: usize = 16;

/// How long a peer may go unseen before `prune()` deactivates it.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(30);

/// A single roster slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub ip: String,
    pub username: String,
    pub last_seen: Instant,
    pub active: bool,
}

/// Result of [`Roster::add_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Added,
    Updated,
}

struct RosterInner {
    slots: Vec<Peer>,
}

impl RosterInner {
    fn new() -> Self {
        RosterInner {
            slots: Vec::with_capacity(MAX_PEERS),
        }
    }

    fn find_active(&self, ip: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.active && p.ip == ip)
    }

    fn find_inactive_slot(&self) -> Option<usize> {
        self.slots.iter().position(|p| !p.active)
    }
}

/// The roster itself. Cheap to clone (an `Arc` internally) so the discovery
/// engine, the TCP session engine, and the UI collaborator's queries can all
/// hold a handle.
#[derive(Clone)]
pub struct Roster {
    inner: std::sync::Arc<Mutex<RosterInner>>,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    pub fn new() -> Self {
        Roster {
            inner: std::sync::Arc::new(Mutex::new(RosterInner::new())),
        }
    }

    /// Mark all slots inactive (or, equivalently for this representation,
    /// drop them). Used at `engine_init` time.
    pub fn init(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
    }

    /// Insert a new peer or refresh an existing active one.
    pub fn add_or_update(&self, ip: &str, username: &str, now: Instant) -> Result<UpsertResult, RosterError> {
        let mut inner = self.inner.lock();

        if let Some(idx) = inner.find_active(ip) {
            if !username.is_empty() {
                inner.slots[idx].username = username.to_string();
            }
            inner.slots[idx].last_seen = now;
            return Ok(UpsertResult::Updated);
        }

        if let Some(idx) = inner.find_inactive_slot() {
            inner.slots[idx] = Peer {
                ip: ip.to_string(),
                username: if username.is_empty() { "anon".to_string() } else { username.to_string() },
                last_seen: now,
                active: true,
            };
            return Ok(UpsertResult::Added);
        }

        if inner.slots.len() < MAX_PEERS {
            inner.slots.push(Peer {
                ip: ip.to_string(),
                username: if username.is_empty() { "anon".to_string() } else { username.to_string() },
                last_seen: now,
                active: true,
            });
            return Ok(UpsertResult::Added);
        }

        Err(RosterError::Full)
    }

    /// Deactivate every active slot whose `last_seen` is older than
    /// [`PEER_TIMEOUT`]. Returns the number of slots pruned.
    ///
    /// `now` is caller-supplied (rather than read from the clock here) so
    /// that wraparound/monotonicity is entirely the caller's concern, and so
    /// tests can drive `prune` deterministically with `tokio::time::pause`.
    /// Any slot whose `last_seen` is *after* `now` (a clock that moved
    /// backwards) is treated as not yet expired rather than pruned.
    pub fn prune(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let mut pruned = 0;
        for peer in inner.slots.iter_mut().filter(|p| p.active) {
            if now < peer.last_seen {
                continue;
            }
            if now.duration_since(peer.last_seen) >= PEER_TIMEOUT {
                peer.active = false;
                pruned += 1;
            }
        }
        pruned
    }

    /// Deactivate the named peer (e.g. on an inbound `QUIT`).
    pub fn mark_inactive(&self, ip: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.find_active(ip) {
            Some(idx) => {
                inner.slots[idx].active = false;
                true
            }
            None => false,
        }
    }

    pub fn count_active(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.iter().filter(|p| p.active).count()
    }

    /// The i-th active slot in slot order (not insertion order).
    pub fn get_by_active_index(&self, index: usize) -> Result<Peer, RosterError> {
        let inner = self.inner.lock();
        let active: Vec<&Peer> = inner.slots.iter().filter(|p| p.active).collect();
        active
            .get(index)
            .map(|p| (*p).clone())
            .ok_or(RosterError::OutOfRange {
                index,
                active: active.len(),
            })
    }

    /// Snapshot of every active peer, in slot order. Convenience for the
    /// broadcast/shutdown paths, which need to iterate without holding the
    /// lock across I/O (§8 invariant).
    pub fn active_snapshot(&self) -> Vec<Peer> {
        let inner = self.inner.lock();
        inner.slots.iter().filter(|p| p.active).cloned().collect()
    }
}
