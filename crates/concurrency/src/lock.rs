//! Striped lock table for pessimistic transactions
//!
//! One entry per (column family, key). Entries are spread over N stripes by
//! key hash; each stripe has its own mutex and condvar, so unrelated keys
//! never contend on the same mutex.
//!
//! # Fairness
//!
//! Requests are granted in FIFO order per key: a new request queues behind
//! existing waiters even if it would be compatible with the holders.
//! Lock upgrades (sole shared holder asking for exclusive) jump the queue.
//!
//! # Deadlock Detection
//!
//! Every waiter records the transactions it waits for. When a request asks
//! for detection, the wait-for graph is walked breadth-first from the
//! requester up to `deadlock_detect_depth` levels. Finding the requester
//! fails the request with `DeadlockDetected`. Exhausting the depth is
//! inconclusive and falls back to the timed wait.
//!
//! # Lock Order
//!
//! stripe mutex → wait-for graph. Never the reverse.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;
use strata_core::{ColumnFamilyId, StrataError, StrataResult, TxnId};
use tracing::{debug, warn};

use crate::options::LockTimeout;

/// Identity of a lockable key
pub type LockKey = (ColumnFamilyId, Vec<u8>);

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Compatible with other shared holders (locking reads)
    Shared,
    /// Excludes every other holder (writes)
    Exclusive,
}

impl LockMode {
    /// Mode taken by a locking read
    pub fn for_update(exclusive: bool) -> Self {
        if exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }
}

/// A single lock acquisition
#[derive(Debug, Clone, Copy)]
pub struct LockRequest<'a> {
    /// Requesting transaction
    pub txn_id: TxnId,
    /// Column family of the key
    pub cf: ColumnFamilyId,
    /// Key to lock
    pub key: &'a [u8],
    /// Requested mode
    pub mode: LockMode,
    /// Resolved timeout
    pub timeout: LockTimeout,
    /// Walk the wait-for graph before blocking
    pub deadlock_detect: bool,
    /// Levels explored by detection
    pub deadlock_detect_depth: usize,
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: SmallVec<[TxnId; 2]>,
    exclusive: bool,
    waiters: VecDeque<(TxnId, LockMode)>,
}

impl LockEntry {
    fn holds(&self, txn_id: TxnId) -> bool {
        self.holders.contains(&txn_id)
    }

    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty()
    }

    /// Compatible with the current holders, ignoring the queue
    fn compatible(&self, txn_id: TxnId, mode: LockMode) -> bool {
        if self.holds(txn_id) {
            // Upgrade: only when no one else holds the key
            return mode == LockMode::Shared || self.holders.len() == 1;
        }
        match mode {
            LockMode::Shared => !self.exclusive,
            LockMode::Exclusive => self.holders.is_empty(),
        }
    }

    fn grant(&mut self, txn_id: TxnId, mode: LockMode) {
        if !self.holds(txn_id) {
            self.holders.push(txn_id);
        }
        if mode == LockMode::Exclusive {
            self.exclusive = true;
        }
    }

    fn blockers(&self, txn_id: TxnId) -> SmallVec<[TxnId; 4]> {
        let mut out: SmallVec<[TxnId; 4]> = self
            .holders
            .iter()
            .copied()
            .filter(|t| *t != txn_id)
            .collect();
        for (t, _) in &self.waiters {
            if *t == txn_id {
                break;
            }
            if !out.contains(t) {
                out.push(*t);
            }
        }
        out
    }

    fn remove_waiter(&mut self, txn_id: TxnId) {
        if let Some(pos) = self.waiters.iter().position(|(t, _)| *t == txn_id) {
            self.waiters.remove(pos);
        }
    }
}

struct Stripe {
    locks: Mutex<HashMap<LockKey, LockEntry>>,
    cv: Condvar,
}

/// Lock table shared by every transaction of a database
pub struct LockManager {
    stripes: Vec<Stripe>,
    wait_for: Mutex<HashMap<TxnId, SmallVec<[TxnId; 4]>>>,
    held: DashMap<TxnId, HashSet<LockKey>>,
    lock_counts: DashMap<ColumnFamilyId, usize>,
    max_locks: Option<usize>,
}

impl LockManager {
    /// Create a lock table with `num_stripes` stripes (at least one)
    ///
    /// `max_locks` caps the number of locked keys per column family. Only
    /// requests that would lock a new key are refused at the cap.
    pub fn new(num_stripes: usize, max_locks: Option<usize>) -> Self {
        let stripes = (0..num_stripes.max(1))
            .map(|_| Stripe {
                locks: Mutex::new(HashMap::new()),
                cv: Condvar::new(),
            })
            .collect();
        LockManager {
            stripes,
            wait_for: Mutex::new(HashMap::new()),
            held: DashMap::new(),
            lock_counts: DashMap::new(),
            max_locks,
        }
    }

    fn stripe_for(&self, cf: ColumnFamilyId, key: &[u8]) -> &Stripe {
        let mut hasher = DefaultHasher::new();
        cf.hash(&mut hasher);
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() % self.stripes.len() as u64) as usize]
    }

    /// Acquire `request.key` in `request.mode`
    ///
    /// Re-entrant: a holder asking again succeeds immediately, and a sole
    /// shared holder may upgrade to exclusive.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` when the timeout elapses (immediately for zero)
    /// - `DeadlockDetected` when waiting would close a cycle
    /// - `LockLimitExceeded` when `key` is not locked yet and the column
    ///   family is at its lock cap
    pub fn acquire(&self, request: &LockRequest<'_>) -> StrataResult<()> {
        let LockRequest {
            txn_id,
            cf,
            key,
            mode,
            timeout,
            ..
        } = *request;
        let stripe = self.stripe_for(cf, key);
        let lock_key: LockKey = (cf, key.to_vec());
        let mut locks = stripe.locks.lock();

        // The cap applies to newly locked keys; contended keys queue as usual
        if !locks.contains_key(&lock_key) {
            if let Some(limit) = self.max_locks {
                if self.lock_count(cf) >= limit {
                    return Err(StrataError::LockLimitExceeded { cf, limit });
                }
            }
            locks.insert(lock_key.clone(), LockEntry::default());
            *self.lock_counts.entry(cf).or_insert(0) += 1;
        }

        let Some(entry) = locks.get_mut(&lock_key) else {
            return Err(StrataError::storage("lock entry missing after insert"));
        };
        let already_held = entry.holds(txn_id);
        if already_held && (mode == LockMode::Shared || entry.exclusive) {
            return Ok(());
        }

        let queue_clear = entry.waiters.is_empty() || already_held;
        if queue_clear && entry.compatible(txn_id, mode) {
            entry.grant(txn_id, mode);
            self.record_grant(txn_id, &lock_key, already_held);
            return Ok(());
        }

        if timeout == LockTimeout::NoWait {
            self.remove_if_idle(&mut locks, &lock_key);
            return Err(StrataError::LockTimeout {
                cf,
                key: key.to_vec(),
            });
        }

        if already_held {
            entry.waiters.push_front((txn_id, mode));
        } else {
            entry.waiters.push_back((txn_id, mode));
        }
        debug!(target: "strata::lock", txn_id, %cf, ?mode, "Waiting for lock");

        let deadline = match timeout {
            LockTimeout::Millis(ms) => Some(Instant::now() + std::time::Duration::from_millis(ms)),
            _ => None,
        };

        loop {
            let Some(entry) = locks.get_mut(&lock_key) else {
                // Our own waiter keeps the entry alive
                return Err(StrataError::storage("lock entry vanished while waiting"));
            };

            let at_front = entry.waiters.front().map(|(t, _)| *t) == Some(txn_id);
            if at_front && entry.compatible(txn_id, mode) {
                entry.waiters.pop_front();
                entry.grant(txn_id, mode);
                self.wait_for.lock().remove(&txn_id);
                self.record_grant(txn_id, &lock_key, already_held);
                stripe.cv.notify_all();
                return Ok(());
            }

            let blockers = entry.blockers(txn_id);
            if request.deadlock_detect {
                let mut graph = self.wait_for.lock();
                graph.insert(txn_id, blockers);
                let cycle = Self::detect_cycle(&graph, txn_id, request.deadlock_detect_depth);
                if cycle {
                    graph.remove(&txn_id);
                    drop(graph);
                    entry.remove_waiter(txn_id);
                    self.remove_if_idle(&mut locks, &lock_key);
                    stripe.cv.notify_all();
                    warn!(target: "strata::lock", txn_id, %cf, "Deadlock detected");
                    return Err(StrataError::DeadlockDetected {
                        txn_id,
                        cf,
                        key: key.to_vec(),
                    });
                }
            } else {
                self.wait_for.lock().insert(txn_id, blockers);
            }

            let timed_out = match deadline {
                None => {
                    stripe.cv.wait(&mut locks);
                    false
                }
                Some(deadline) => stripe.cv.wait_until(&mut locks, deadline).timed_out(),
            };

            if timed_out {
                // A grant may have become possible right at the deadline
                if let Some(entry) = locks.get_mut(&lock_key) {
                    let at_front = entry.waiters.front().map(|(t, _)| *t) == Some(txn_id);
                    if at_front && entry.compatible(txn_id, mode) {
                        continue;
                    }
                    entry.remove_waiter(txn_id);
                }
                self.wait_for.lock().remove(&txn_id);
                self.remove_if_idle(&mut locks, &lock_key);
                stripe.cv.notify_all();
                debug!(target: "strata::lock", txn_id, %cf, "Lock wait timed out");
                return Err(StrataError::LockTimeout {
                    cf,
                    key: key.to_vec(),
                });
            }
        }
    }

    /// Release `txn_id`'s hold on one key
    pub fn release(&self, txn_id: TxnId, cf: ColumnFamilyId, key: &[u8]) {
        let lock_key: LockKey = (cf, key.to_vec());
        if let Some(mut held) = self.held.get_mut(&txn_id) {
            held.remove(&lock_key);
        }
        self.release_key(txn_id, &lock_key);
    }

    /// Release every lock held by `txn_id`
    pub fn release_all(&self, txn_id: TxnId) {
        self.wait_for.lock().remove(&txn_id);
        let Some((_, keys)) = self.held.remove(&txn_id) else {
            return;
        };
        let count = keys.len();
        for lock_key in &keys {
            self.release_key(txn_id, lock_key);
        }
        debug!(target: "strata::lock", txn_id, count, "Released all locks");
    }

    fn release_key(&self, txn_id: TxnId, lock_key: &LockKey) {
        let stripe = self.stripe_for(lock_key.0, &lock_key.1);
        let mut locks = stripe.locks.lock();
        let Some(entry) = locks.get_mut(lock_key) else {
            return;
        };
        let Some(pos) = entry.holders.iter().position(|t| *t == txn_id) else {
            return;
        };
        entry.holders.remove(pos);
        if entry.holders.is_empty() || entry.exclusive {
            entry.exclusive = false;
        }
        self.remove_if_idle(&mut locks, lock_key);
        stripe.cv.notify_all();
    }

    fn record_grant(&self, txn_id: TxnId, lock_key: &LockKey, upgrade: bool) {
        if upgrade {
            return;
        }
        self.held
            .entry(txn_id)
            .or_default()
            .insert(lock_key.clone());
    }

    fn remove_if_idle(
        &self,
        locks: &mut MutexGuard<'_, HashMap<LockKey, LockEntry>>,
        lock_key: &LockKey,
    ) {
        if locks.get(lock_key).map(LockEntry::is_idle).unwrap_or(false) {
            locks.remove(lock_key);
            if let Some(mut count) = self.lock_counts.get_mut(&lock_key.0) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Breadth-first search for `txn_id` in its own wait-for closure
    fn detect_cycle(
        graph: &HashMap<TxnId, SmallVec<[TxnId; 4]>>,
        txn_id: TxnId,
        depth: usize,
    ) -> bool {
        let mut frontier: Vec<TxnId> = match graph.get(&txn_id) {
            Some(edges) => edges.to_vec(),
            None => return false,
        };
        let mut visited = HashSet::new();
        for _ in 0..depth {
            if frontier.is_empty() {
                return false;
            }
            let mut next = Vec::new();
            for t in frontier {
                if t == txn_id {
                    return true;
                }
                if visited.insert(t) {
                    if let Some(edges) = graph.get(&t) {
                        next.extend(edges.iter().copied());
                    }
                }
            }
            frontier = next;
        }
        if !frontier.is_empty() {
            debug!(target: "strata::lock", txn_id, depth, "Deadlock detection inconclusive");
        }
        false
    }

    /// Transactions currently holding `key`
    pub fn holders(&self, cf: ColumnFamilyId, key: &[u8]) -> Vec<TxnId> {
        let stripe = self.stripe_for(cf, key);
        let locks = stripe.locks.lock();
        locks
            .get(&(cf, key.to_vec()))
            .map(|e| e.holders.to_vec())
            .unwrap_or_default()
    }

    /// Whether `txn_id` holds `key` in at least `mode`
    pub fn is_held_by(&self, txn_id: TxnId, cf: ColumnFamilyId, key: &[u8], mode: LockMode) -> bool {
        let stripe = self.stripe_for(cf, key);
        let locks = stripe.locks.lock();
        locks
            .get(&(cf, key.to_vec()))
            .map(|e| e.holds(txn_id) && (mode == LockMode::Shared || e.exclusive))
            .unwrap_or(false)
    }

    /// Number of keys held by `txn_id`
    pub fn held_count(&self, txn_id: TxnId) -> usize {
        self.held.get(&txn_id).map(|h| h.len()).unwrap_or(0)
    }

    /// Number of locked keys in `cf`
    ///
    /// Each key counts once however many transactions hold or wait on it.
    pub fn lock_count(&self, cf: ColumnFamilyId) -> usize {
        self.lock_counts.get(&cf).map(|c| *c).unwrap_or(0)
    }

    /// Number of stripes
    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("stripes", &self.stripes.len())
            .field("max_locks", &self.max_locks)
            .finish()
    }
}
