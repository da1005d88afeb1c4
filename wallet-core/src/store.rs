//! Capability contracts consumed by the engine
//!
//! The engine is generic over four narrow store capabilities instead of
//! holding process-wide singletons. Concrete adapters (`storage::Storage` for
//! RocksDB, `memory::MemoryStore` for tests and embedding) implement all of
//! them; tests can substitute fakes per capability.
//!
//! These traits use `async fn` and are consumed through generics, never
//! through `dyn`.

use crate::error::Result;
use crate::types::{ActivityRecord, TxnRecord, UserId, Wallet, WalletId};
use rust_decimal::Decimal;
use std::future::Future;

/// Read-only mapping from (user, wallet) to a possession fact
///
/// Populated by provisioning, never mutated by the engine.
pub trait OwnershipIndex {
    /// True iff an ownership fact exists for the pair
    fn verify_possession(
        &self,
        user: &UserId,
        wallet: &WalletId,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// The user's wallets, ordered by the ownership sequence key
    fn list_wallets(&self, user: &UserId) -> impl Future<Output = Result<Vec<Wallet>>> + Send;
}

/// The balance store: wallet rows behind per-row exclusive locks
pub trait BalanceStore {
    /// One in-flight atomic unit against this store
    type Unit: AtomicUnit + Send;

    /// Read a wallet balance without locking (plain read path)
    fn read_balance(&self, wallet: &WalletId) -> impl Future<Output = Result<Decimal>> + Send;

    /// Open an atomic unit; everything staged into it commits or rolls back
    /// as a whole
    fn begin(&self) -> impl Future<Output = Result<Self::Unit>> + Send;
}

/// A unit of work that commits or rolls back as a whole
///
/// Row locks acquired by `lock_and_read` are held until the unit commits or
/// is dropped. Dropping the unit without committing is a full rollback: all
/// staged writes are discarded and all locks released. This is what makes
/// caller cancellation safe: an abandoned future mutates nothing.
pub trait AtomicUnit {
    /// Acquire the row's exclusive lock and read its current balance
    ///
    /// Suspends until the lock is free or the store's timeout elapses
    /// (`Error::LockTimeout`). Re-locking a wallet already held by this unit
    /// returns the staged (or previously read) balance instead of
    /// deadlocking.
    fn lock_and_read(&mut self, wallet: &WalletId) -> impl Future<Output = Result<Decimal>> + Send;

    /// Stage a new balance for a wallet previously read under lock
    fn stage_balance(&mut self, wallet: &WalletId, balance: Decimal) -> Result<()>;

    /// Stage an immutable history record
    fn stage_history(&mut self, record: &TxnRecord) -> Result<()>;

    /// Commit every staged write atomically, then release all row locks
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

/// Append-only store of immutable transaction records
pub trait HistoryStore {
    /// All records touching the wallet on either side, in storage order
    fn list_by_wallet(
        &self,
        wallet: &WalletId,
    ) -> impl Future<Output = Result<Vec<TxnRecord>>> + Send;
}

/// Best-effort activity log
///
/// Failures here are logged by the engine, never propagated as operation
/// failures.
pub trait ActivityStore {
    /// Append one activity record
    fn append_activity(&self, record: ActivityRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Umbrella bound for adapters that provide every capability
pub trait LedgerStores: BalanceStore + OwnershipIndex + HistoryStore + ActivityStore {}

impl<S> LedgerStores for S where S: BalanceStore + OwnershipIndex + HistoryStore + ActivityStore {}
