//! In-memory store adapter
//!
//! Implements every capability contract over plain maps. Used as the test
//! double for the engine and for embedding the ledger without a data
//! directory. Row locking and atomic-unit semantics are identical to the
//! durable adapter: per-wallet `tokio::sync::Mutex` rows, staged writes,
//! commit-or-drop.
//!
//! Two failure-injection hooks exist for exercising rollback paths:
//! [`MemoryStore::fail_next_commit`] and [`MemoryStore::fail_activity_writes`].

use crate::error::{Error, Result};
use crate::store::{ActivityStore, AtomicUnit, BalanceStore, HistoryStore, OwnershipIndex};
use crate::types::{ActivityRecord, TxnRecord, UserId, Wallet, WalletId};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

/// In-memory store implementing all four capabilities
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    wallets: RwLock<HashMap<WalletId, Wallet>>,
    /// (user, wallet, sequence) possession facts
    ownership: RwLock<Vec<(UserId, WalletId, u32)>>,
    history: RwLock<Vec<TxnRecord>>,
    activity: RwLock<Vec<ActivityRecord>>,
    row_locks: DashMap<WalletId, Arc<Mutex<()>>>,
    lock_timeout: Duration,
    fail_next_commit: AtomicBool,
    fail_activity_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store with the default 5s lock timeout
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    /// Create an empty store with an explicit row-lock timeout
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                wallets: RwLock::new(HashMap::new()),
                ownership: RwLock::new(Vec::new()),
                history: RwLock::new(Vec::new()),
                activity: RwLock::new(Vec::new()),
                row_locks: DashMap::new(),
                lock_timeout,
                fail_next_commit: AtomicBool::new(false),
                fail_activity_writes: AtomicBool::new(false),
            }),
        }
    }

    // Provisioning surface (outside the engine contract)

    /// Create a wallet row
    pub fn create_wallet(&self, wallet_id: WalletId, name: impl Into<String>, balance: Decimal) -> Result<()> {
        let mut wallets = self.inner.wallets.write();
        if wallets.contains_key(&wallet_id) {
            return Err(Error::Storage(format!("wallet {} already exists", wallet_id)));
        }
        wallets.insert(
            wallet_id.clone(),
            Wallet {
                wallet_id,
                name: name.into(),
                balance,
                created_at: Utc::now(),
                updated_at: None,
            },
        );
        Ok(())
    }

    /// Record a possession fact for (user, wallet) with a listing sequence
    pub fn grant_possession(&self, user: &UserId, wallet: &WalletId, seq: u32) {
        self.inner
            .ownership
            .write()
            .push((user.clone(), wallet.clone(), seq));
    }

    // Failure injection (test hooks)

    /// Make the next unit commit fail with a storage error
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make every activity append fail until reset
    pub fn fail_activity_writes(&self, fail: bool) {
        self.inner.fail_activity_writes.store(fail, Ordering::SeqCst);
    }

    // Inspection (test support)

    /// Snapshot of all activity records
    pub fn activities(&self) -> Vec<ActivityRecord> {
        self.inner.activity.read().clone()
    }

    /// Number of history records
    pub fn history_len(&self) -> usize {
        self.inner.history.read().len()
    }

    fn row_lock(&self, wallet: &WalletId) -> Arc<Mutex<()>> {
        self.inner
            .row_locks
            .entry(wallet.clone())
            .or_default()
            .value()
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnershipIndex for MemoryStore {
    async fn verify_possession(&self, user: &UserId, wallet: &WalletId) -> Result<bool> {
        let ownership = self.inner.ownership.read();
        Ok(ownership.iter().any(|(u, w, _)| u == user && w == wallet))
    }

    async fn list_wallets(&self, user: &UserId) -> Result<Vec<Wallet>> {
        let mut owned: Vec<(u32, WalletId)> = self
            .inner
            .ownership
            .read()
            .iter()
            .filter(|(u, _, _)| u == user)
            .map(|(_, w, seq)| (*seq, w.clone()))
            .collect();
        owned.sort_by_key(|(seq, _)| *seq);

        let wallets = self.inner.wallets.read();
        owned
            .into_iter()
            .map(|(_, id)| {
                wallets
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| Error::Storage(format!("ownership references missing wallet {}", id)))
            })
            .collect()
    }
}

impl BalanceStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn read_balance(&self, wallet: &WalletId) -> Result<Decimal> {
        self.inner
            .wallets
            .read()
            .get(wallet)
            .map(|w| w.balance)
            .ok_or_else(|| Error::WalletNotFound(wallet.clone()))
    }

    async fn begin(&self) -> Result<MemoryUnit> {
        Ok(MemoryUnit {
            store: self.clone(),
            locked: HashMap::new(),
            staged_history: Vec::new(),
        })
    }
}

impl HistoryStore for MemoryStore {
    async fn list_by_wallet(&self, wallet: &WalletId) -> Result<Vec<TxnRecord>> {
        Ok(self
            .inner
            .history
            .read()
            .iter()
            .filter(|r| r.touches(wallet))
            .cloned()
            .collect())
    }
}

impl ActivityStore for MemoryStore {
    async fn append_activity(&self, record: ActivityRecord) -> Result<()> {
        if self.inner.fail_activity_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("injected activity write failure".to_string()));
        }
        self.inner.activity.write().push(record);
        Ok(())
    }
}

/// A locked row held by an in-flight unit
struct LockedRow {
    _guard: OwnedMutexGuard<()>,
    wallet: Wallet,
    dirty: bool,
}

/// In-flight atomic unit against a [`MemoryStore`]
///
/// Dropping without committing discards all staged writes and releases all
/// row locks.
pub struct MemoryUnit {
    store: MemoryStore,
    locked: HashMap<WalletId, LockedRow>,
    staged_history: Vec<TxnRecord>,
}

impl AtomicUnit for MemoryUnit {
    async fn lock_and_read(&mut self, wallet: &WalletId) -> Result<Decimal> {
        if let Some(row) = self.locked.get(wallet) {
            return Ok(row.wallet.balance);
        }

        // Unknown wallets never enter the lock table.
        if !self.store.inner.wallets.read().contains_key(wallet) {
            return Err(Error::WalletNotFound(wallet.clone()));
        }

        let lock = self.store.row_lock(wallet);
        let guard = timeout(self.store.inner.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| Error::LockTimeout(wallet.clone()))?;

        // Authoritative row read happens only after the lock is held, so no
        // concurrent committer can leave us with a stale balance.
        let row = self
            .store
            .inner
            .wallets
            .read()
            .get(wallet)
            .cloned()
            .ok_or_else(|| Error::WalletNotFound(wallet.clone()))?;

        let balance = row.balance;
        self.locked.insert(
            wallet.clone(),
            LockedRow {
                _guard: guard,
                wallet: row,
                dirty: false,
            },
        );
        Ok(balance)
    }

    fn stage_balance(&mut self, wallet: &WalletId, balance: Decimal) -> Result<()> {
        let row = self
            .locked
            .get_mut(wallet)
            .ok_or_else(|| Error::Storage(format!("wallet {} not locked by this unit", wallet)))?;
        row.wallet.balance = balance;
        row.wallet.updated_at = Some(Utc::now());
        row.dirty = true;
        Ok(())
    }

    fn stage_history(&mut self, record: &TxnRecord) -> Result<()> {
        self.staged_history.push(record.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        if self.store.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("injected commit failure".to_string()));
        }

        // Balance writes and history appends land under one critical
        // section (both map locks held), matching the durable adapter's
        // single WriteBatch: no reader observes a new balance without its
        // history row. Row locks release when `self` drops.
        {
            let mut wallets = self.store.inner.wallets.write();
            let mut history = self.store.inner.history.write();
            for row in self.locked.values().filter(|r| r.dirty) {
                wallets.insert(row.wallet.wallet_id.clone(), row.wallet.clone());
            }
            history.extend(self.staged_history);
        }
        Ok(())
    }
}
