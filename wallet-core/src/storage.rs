//! Durable storage adapter using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet rows (key: wallet_id)
//! - `ownership` - Possession facts (key: user length prefix + user_id + wallet_id, value: sequence)
//! - `history` - Append-only transaction records (key: txn_id)
//! - `activity` - Append-only activity records (key: activity_id)
//!
//! Row-level exclusive locking is layered on top of RocksDB with a per-wallet
//! `tokio::sync::Mutex` table; an atomic unit stages its writes and commits
//! them in one `WriteBatch` while still holding every row lock it acquired.

use crate::error::{Error, Result};
use crate::store::{ActivityStore, AtomicUnit, BalanceStore, HistoryStore, OwnershipIndex};
use crate::types::{ActivityRecord, TxnRecord, UserId, Wallet, WalletId};
use crate::Config;
use chrono::Utc;
use dashmap::DashMap;
use rocksdb::{ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_OWNERSHIP: &str = "ownership";
const CF_HISTORY: &str = "history";
const CF_ACTIVITY: &str = "activity";


/// Durable store implementing all four capabilities over RocksDB
#[derive(Clone)]
pub struct Storage {
    db: Arc<DB>,
    row_locks: Arc<DashMap<WalletId, Arc<Mutex<()>>>>,
    lock_timeout: Duration,
}

impl Storage {
    /// Open or create the database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Universal);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_wallets()),
            ColumnFamilyDescriptor::new(CF_OWNERSHIP, Self::cf_options_ownership()),
            ColumnFamilyDescriptor::new(CF_HISTORY, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_ACTIVITY, Self::cf_options_append_only()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "opened wallet store");

        Ok(Self {
            db: Arc::new(db),
            row_locks: Arc::new(DashMap::new()),
            lock_timeout: config.lock_timeout(),
        })
    }

    fn cf_options_wallets() -> Options {
        let mut opts = Options::default();
        // Wallet rows are read on every operation, favour speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_ownership() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_append_only() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    /// Ownership keys carry the user component behind a big-endian length
    /// prefix. IDs are opaque strings, so no separator byte is unambiguous;
    /// the length prefix keeps (user, wallet) pairs collision-free and keeps
    /// the per-user prefix scan exact.
    fn ownership_key(user: &UserId, wallet: &WalletId) -> Vec<u8> {
        let mut key = Self::ownership_prefix(user);
        key.extend_from_slice(wallet.as_str().as_bytes());
        key
    }

    fn ownership_prefix(user: &UserId) -> Vec<u8> {
        let user_bytes = user.as_str().as_bytes();
        let mut prefix = Vec::with_capacity(4 + user_bytes.len());
        prefix.extend_from_slice(&(user_bytes.len() as u32).to_be_bytes());
        prefix.extend_from_slice(user_bytes);
        prefix
    }

    // Provisioning surface (outside the engine contract)

    /// Create a wallet row; rejects duplicates
    pub fn create_wallet(
        &self,
        wallet_id: WalletId,
        name: impl Into<String>,
        balance: Decimal,
    ) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_WALLETS)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_WALLETS)))?;
        let key = wallet_id.as_str().as_bytes().to_vec();

        if self.db.get_cf(&cf, &key)?.is_some() {
            return Err(Error::Storage(format!("wallet {} already exists", wallet_id)));
        }

        let wallet = Wallet {
            wallet_id,
            name: name.into(),
            balance,
            created_at: Utc::now(),
            updated_at: None,
        };
        let value = bincode::serialize(&wallet)?;
        self.db.put_cf(&cf, &key, &value)?;
        Ok(())
    }

    /// Record a possession fact for (user, wallet) with a listing sequence
    pub fn grant_possession(&self, user: &UserId, wallet: &WalletId, seq: u32) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_OWNERSHIP)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_OWNERSHIP)))?;
        let key = Self::ownership_key(user, wallet);
        let value = bincode::serialize(&seq)?;
        self.db.put_cf(&cf, &key, &value)?;
        Ok(())
    }

    /// Fetch a full wallet row
    pub fn get_wallet(&self, wallet: &WalletId) -> Result<Wallet> {
        let cf = self
            .db
            .cf_handle(CF_WALLETS)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_WALLETS)))?;
        let value = self
            .db
            .get_cf(&cf, wallet.as_str().as_bytes())?
            .ok_or_else(|| Error::WalletNotFound(wallet.clone()))?;
        Ok(bincode::deserialize(&value)?)
    }

    fn row_lock(&self, wallet: &WalletId) -> Arc<Mutex<()>> {
        self.row_locks
            .entry(wallet.clone())
            .or_default()
            .value()
            .clone()
    }
}

impl OwnershipIndex for Storage {
    async fn verify_possession(&self, user: &UserId, wallet: &WalletId) -> Result<bool> {
        let cf = self
            .db
            .cf_handle(CF_OWNERSHIP)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_OWNERSHIP)))?;
        let key = Self::ownership_key(user, wallet);
        Ok(self.db.get_cf(&cf, &key)?.is_some())
    }

    async fn list_wallets(&self, user: &UserId) -> Result<Vec<Wallet>> {
        let cf = self
            .db
            .cf_handle(CF_OWNERSHIP)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_OWNERSHIP)))?;

        let prefix = Self::ownership_prefix(user);

        let mut owned: Vec<(u32, WalletId)> = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let wallet_id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            let seq: u32 = bincode::deserialize(&value)?;
            owned.push((seq, WalletId::new(wallet_id)));
        }
        owned.sort_by_key(|(seq, _)| *seq);

        owned
            .into_iter()
            .map(|(_, id)| {
                self.get_wallet(&id).map_err(|e| match e {
                    Error::WalletNotFound(id) => {
                        Error::Storage(format!("ownership references missing wallet {}", id))
                    }
                    other => other,
                })
            })
            .collect()
    }
}

impl BalanceStore for Storage {
    type Unit = StorageUnit;

    async fn read_balance(&self, wallet: &WalletId) -> Result<Decimal> {
        Ok(self.get_wallet(wallet)?.balance)
    }

    async fn begin(&self) -> Result<StorageUnit> {
        Ok(StorageUnit {
            store: self.clone(),
            locked: HashMap::new(),
            staged_history: Vec::new(),
        })
    }
}

impl HistoryStore for Storage {
    async fn list_by_wallet(&self, wallet: &WalletId) -> Result<Vec<TxnRecord>> {
        let cf = self
            .db
            .cf_handle(CF_HISTORY)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_HISTORY)))?;

        // Keys are UUIDv7, so the scan yields records in creation order.
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let record: TxnRecord = bincode::deserialize(&value)?;
            if record.touches(wallet) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl ActivityStore for Storage {
    async fn append_activity(&self, record: ActivityRecord) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_ACTIVITY)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_ACTIVITY)))?;
        let key = record.activity_id.as_bytes().to_vec();
        let value = bincode::serialize(&record)?;
        self.db.put_cf(&cf, &key, &value)?;
        Ok(())
    }
}

/// A locked row held by an in-flight unit
struct LockedRow {
    _guard: OwnedMutexGuard<()>,
    wallet: Wallet,
    dirty: bool,
}

/// In-flight atomic unit against [`Storage`]
///
/// Staged writes land in one `WriteBatch` at commit time; dropping the unit
/// without committing discards everything and releases all row locks.
pub struct StorageUnit {
    store: Storage,
    locked: HashMap<WalletId, LockedRow>,
    staged_history: Vec<TxnRecord>,
}

impl AtomicUnit for StorageUnit {
    async fn lock_and_read(&mut self, wallet: &WalletId) -> Result<Decimal> {
        if let Some(row) = self.locked.get(wallet) {
            return Ok(row.wallet.balance);
        }

        // Unknown wallets never enter the lock table.
        self.store.get_wallet(wallet)?;

        let lock = self.store.row_lock(wallet);
        let guard = timeout(self.store.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| Error::LockTimeout(wallet.clone()))?;

        // Authoritative read only after the lock is held; concurrent
        // committers finished their batch before releasing this row.
        let row = self.store.get_wallet(wallet)?;

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
        let cf_wallets = self
            .store
            .db
            .cf_handle(CF_WALLETS)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_WALLETS)))?;
        let cf_history = self
            .store
            .db
            .cf_handle(CF_HISTORY)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", CF_HISTORY)))?;

        let mut batch = WriteBatch::default();
        for row in self.locked.values().filter(|r| r.dirty) {
            let key = row.wallet.wallet_id.as_str().as_bytes().to_vec();
            let value = bincode::serialize(&row.wallet)?;
            batch.put_cf(&cf_wallets, &key, &value);
        }
        for record in &self.staged_history {
            let key = record.txn_id.as_bytes().to_vec();
            let value = bincode::serialize(record)?;
            batch.put_cf(&cf_history, &key, &value);
        }

        // Atomic commit; row locks release when the unit drops.
        self.store.db.write(batch)?;
        Ok(())
    }
}
