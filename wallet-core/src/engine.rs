//! Ledger transaction engine
//!
//! The engine ties ownership verification, locked balance reads, balance
//! mutation and history recording into atomic units against injected store
//! capabilities. It holds no shared mutable state of its own; all contention
//! is resolved by the stores' per-wallet exclusive row locks.
//!
//! # Guarantees
//!
//! - No committed operation observes or produces a negative balance
//! - Both legs of a transfer and its history record commit as one unit
//! - Multi-row locks are acquired in canonical (lexicographic) order, so
//!   concurrent reverse-direction transfers cannot deadlock
//! - A dropped in-flight operation mutates nothing

use crate::error::{Error, ErrorClass, Result};
use crate::metrics::Metrics;
use crate::store::{AtomicUnit, BalanceStore, LedgerStores};
use crate::types::{ActivityKind, ActivityRecord, TxnKind, TxnRecord, UserId, Wallet, WalletId};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// The ledger transaction engine, generic over the injected stores
pub struct Engine<S> {
    store: Arc<S>,
    metrics: Metrics,
}

impl<S: LedgerStores> Engine<S> {
    /// Create an engine over the given stores
    pub fn new(store: Arc<S>) -> Self {
        Self::with_metrics(store, Metrics::default())
    }

    /// Create an engine with an externally owned metrics collector
    pub fn with_metrics(store: Arc<S>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// The engine's metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Deposit `amount` into `wallet`; returns the new balance
    pub async fn deposit(
        &self,
        user: &UserId,
        wallet: &WalletId,
        amount: Decimal,
    ) -> Result<Decimal> {
        let started = Instant::now();
        let result = self.deposit_inner(user, wallet, amount).await;
        self.observe(TxnKind::Deposit, started, &result);
        match &result {
            Ok(balance) => {
                tracing::info!(%user, %wallet, %amount, %balance, "deposit committed");
            }
            Err(e) => self.note_failure("deposit", e),
        }
        result
    }

    async fn deposit_inner(
        &self,
        user: &UserId,
        wallet: &WalletId,
        amount: Decimal,
    ) -> Result<Decimal> {
        self.verify_owned(user, wallet).await?;
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let mut unit = self.store.begin().await?;
        let balance = unit.lock_and_read(wallet).await?;
        let new_balance = balance + amount;

        let record = TxnRecord {
            txn_id: Uuid::now_v7(),
            from_wallet: wallet.clone(),
            to_wallet: wallet.clone(),
            kind: TxnKind::Deposit,
            amount,
            executed_at: Utc::now(),
        };
        unit.stage_balance(wallet, new_balance)?;
        unit.stage_history(&record)?;
        unit.commit().await?;

        self.log_activity(
            ActivityKind::Deposit,
            format!("user {} deposited {} into wallet {}", user, amount, wallet),
            Some(wallet.clone()),
        )
        .await;

        Ok(new_balance)
    }

    /// Withdraw `amount` from `wallet`; returns the new balance
    pub async fn withdraw(
        &self,
        user: &UserId,
        wallet: &WalletId,
        amount: Decimal,
    ) -> Result<Decimal> {
        let started = Instant::now();
        let result = self.withdraw_inner(user, wallet, amount).await;
        self.observe(TxnKind::Withdraw, started, &result);
        match &result {
            Ok(balance) => {
                tracing::info!(%user, %wallet, %amount, %balance, "withdrawal committed");
            }
            Err(e) => self.note_failure("withdraw", e),
        }
        result
    }

    async fn withdraw_inner(
        &self,
        user: &UserId,
        wallet: &WalletId,
        amount: Decimal,
    ) -> Result<Decimal> {
        self.verify_owned(user, wallet).await?;
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let mut unit = self.store.begin().await?;
        let balance = unit.lock_and_read(wallet).await?;
        if balance < amount {
            return Err(Error::InsufficientBalance {
                wallet: wallet.clone(),
                balance,
                requested: amount,
            });
        }
        let new_balance = balance - amount;

        let record = TxnRecord {
            txn_id: Uuid::now_v7(),
            from_wallet: wallet.clone(),
            to_wallet: wallet.clone(),
            kind: TxnKind::Withdraw,
            amount,
            executed_at: Utc::now(),
        };
        unit.stage_balance(wallet, new_balance)?;
        unit.stage_history(&record)?;
        unit.commit().await?;

        self.log_activity(
            ActivityKind::Withdraw,
            format!("user {} withdrew {} from wallet {}", user, amount, wallet),
            Some(wallet.clone()),
        )
        .await;

        Ok(new_balance)
    }

    /// Transfer `amount` from a wallet owned by `user` into any wallet;
    /// returns the generated transaction ID
    ///
    /// Ownership of the destination is not required. Both balance writes and
    /// the single history record are one atomic unit.
    pub async fn transfer(
        &self,
        user: &UserId,
        from: &WalletId,
        to: &WalletId,
        amount: Decimal,
    ) -> Result<Uuid> {
        let started = Instant::now();
        let result = self.transfer_inner(user, from, to, amount).await;
        self.observe(TxnKind::Transfer, started, &result);
        match &result {
            Ok(txn_id) => {
                tracing::info!(%user, %from, %to, %amount, %txn_id, "transfer committed");
            }
            Err(e) => self.note_failure("transfer", e),
        }
        result
    }

    async fn transfer_inner(
        &self,
        user: &UserId,
        from: &WalletId,
        to: &WalletId,
        amount: Decimal,
    ) -> Result<Uuid> {
        self.verify_owned(user, from).await?;
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let mut unit = self.store.begin().await?;

        // Canonical lock order: lexicographic by wallet id, never argument
        // order. Two reverse-direction transfers over the same pair then
        // contend on the same first row instead of deadlocking.
        let (from_balance, to_balance) = if from == to {
            let balance = unit.lock_and_read(from).await?;
            (balance, balance)
        } else if from < to {
            let from_balance = unit.lock_and_read(from).await?;
            let to_balance = unit.lock_and_read(to).await?;
            (from_balance, to_balance)
        } else {
            let to_balance = unit.lock_and_read(to).await?;
            let from_balance = unit.lock_and_read(from).await?;
            (from_balance, to_balance)
        };

        if from_balance < amount {
            return Err(Error::InsufficientBalance {
                wallet: from.clone(),
                balance: from_balance,
                requested: amount,
            });
        }

        let record = TxnRecord {
            txn_id: Uuid::now_v7(),
            from_wallet: from.clone(),
            to_wallet: to.clone(),
            kind: TxnKind::Transfer,
            amount,
            executed_at: Utc::now(),
        };
        if from != to {
            unit.stage_balance(from, from_balance - amount)?;
            unit.stage_balance(to, to_balance + amount)?;
        }
        // Self-transfer moves nothing but still records history.
        unit.stage_history(&record)?;
        unit.commit().await?;

        self.log_activity(
            ActivityKind::Transfer,
            format!(
                "user {} transferred {} from wallet {} to wallet {}",
                user, amount, from, to
            ),
            Some(from.clone()),
        )
        .await;

        Ok(record.txn_id)
    }

    /// Current balance of a wallet owned by `user`
    pub async fn check_balance(&self, user: &UserId, wallet: &WalletId) -> Result<Decimal> {
        self.verify_owned(user, wallet).await?;
        self.store.read_balance(wallet).await
    }

    /// All history records touching a wallet owned by `user`
    pub async fn list_history(&self, user: &UserId, wallet: &WalletId) -> Result<Vec<TxnRecord>> {
        self.verify_owned(user, wallet).await?;
        self.store.list_by_wallet(wallet).await
    }

    /// The user's wallets, in their stable listing order
    pub async fn list_wallets(&self, user: &UserId) -> Result<Vec<Wallet>> {
        self.store.list_wallets(user).await
    }

    /// Reject with `NotOwned` unless a possession fact exists
    async fn verify_owned(&self, user: &UserId, wallet: &WalletId) -> Result<()> {
        if self.store.verify_possession(user, wallet).await? {
            Ok(())
        } else {
            Err(Error::NotOwned {
                user: user.clone(),
                wallet: wallet.clone(),
            })
        }
    }

    /// Best-effort activity append; failure is logged and counted, never
    /// propagated
    async fn log_activity(&self, kind: ActivityKind, detail: String, wallet: Option<WalletId>) {
        let record = ActivityRecord::now(kind, detail, wallet);
        if let Err(e) = self.store.append_activity(record).await {
            self.metrics.record_activity_log_failure();
            tracing::warn!(reason = %e, "activity log write failed");
        }
    }

    fn observe<T>(&self, kind: TxnKind, started: Instant, result: &Result<T>) {
        self.metrics
            .record_op_duration(started.elapsed().as_secs_f64());
        if result.is_ok() {
            self.metrics.record_mutation(kind.code());
        }
    }

    fn note_failure(&self, kind: &'static str, err: &Error) {
        match err.class() {
            ErrorClass::Business => {
                self.metrics.record_rejection(kind);
                tracing::info!(kind, reason = %err, "operation rejected");
            }
            ErrorClass::Infrastructure => {
                self.metrics.record_infra_failure();
                tracing::error!(kind, reason = %err, "operation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn dec(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn wallet(id: &str) -> WalletId {
        WalletId::new(id)
    }

    /// One user owning W1 and W2, another user owning W3
    fn test_engine() -> (Engine<MemoryStore>, Arc<MemoryStore>, UserId, UserId) {
        let store = Arc::new(MemoryStore::new());
        let alice = UserId::new("U-alice");
        let bob = UserId::new("U-bob");

        store.create_wallet(wallet("W1"), "alice main", Decimal::ZERO).unwrap();
        store.create_wallet(wallet("W2"), "alice savings", Decimal::ZERO).unwrap();
        store.create_wallet(wallet("W3"), "bob main", Decimal::ZERO).unwrap();
        store.grant_possession(&alice, &wallet("W1"), 1);
        store.grant_possession(&alice, &wallet("W2"), 2);
        store.grant_possession(&bob, &wallet("W3"), 1);

        (Engine::new(store.clone()), store, alice, bob)
    }

    #[tokio::test]
    async fn test_deposit_returns_new_balance_and_records_history() {
        let (engine, _store, alice, _) = test_engine();

        let balance = engine.deposit(&alice, &wallet("W1"), dec(1_000_000)).await.unwrap();
        assert_eq!(balance, dec(1_000_000)); // 10000.00

        let history = engine.list_history(&alice, &wallet("W1")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TxnKind::Deposit);
        assert_eq!(history[0].amount, dec(1_000_000));
        assert_eq!(history[0].from_wallet, wallet("W1"));
        assert_eq!(history[0].to_wallet, wallet("W1"));
    }

    #[tokio::test]
    async fn test_withdraw_decrements_balance() {
        let (engine, _store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(1_000_000)).await.unwrap();

        let balance = engine.withdraw(&alice, &wallet("W1"), dec(300_000)).await.unwrap();
        assert_eq!(balance, dec(700_000)); // 7000.00
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_and_returns_txn_id() {
        let (engine, _store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(700_000)).await.unwrap();

        let txn_id = engine
            .transfer(&alice, &wallet("W1"), &wallet("W2"), dec(200_000))
            .await
            .unwrap();
        assert!(!txn_id.is_nil());

        assert_eq!(engine.check_balance(&alice, &wallet("W1")).await.unwrap(), dec(500_000));
        assert_eq!(engine.check_balance(&alice, &wallet("W2")).await.unwrap(), dec(200_000));

        let history = engine.list_history(&alice, &wallet("W2")).await.unwrap();
        let transfers: Vec<_> = history.iter().filter(|r| r.kind == TxnKind::Transfer).collect();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].txn_id, txn_id);
        assert_eq!(transfers[0].from_wallet, wallet("W1"));
        assert_eq!(transfers[0].to_wallet, wallet("W2"));
    }

    #[tokio::test]
    async fn test_overdraw_rejected_with_insufficient_balance() {
        let (engine, store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(1_000_000)).await.unwrap();
        let history_before = store.history_len();

        let err = engine.withdraw(&alice, &wallet("W1"), dec(1_200_000)).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert_eq!(err.class(), ErrorClass::Business);

        assert_eq!(engine.check_balance(&alice, &wallet("W1")).await.unwrap(), dec(1_000_000));
        assert_eq!(store.history_len(), history_before);
    }

    #[tokio::test]
    async fn test_transfer_exceeding_balance_rejected() {
        let (engine, _store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(500_000)).await.unwrap();

        let err = engine
            .transfer(&alice, &wallet("W1"), &wallet("W2"), dec(700_000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));

        assert_eq!(engine.check_balance(&alice, &wallet("W1")).await.unwrap(), dec(500_000));
        assert_eq!(engine.check_balance(&alice, &wallet("W2")).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let (engine, store, alice, _) = test_engine();

        for amount in [dec(-500), Decimal::ZERO] {
            let err = engine.deposit(&alice, &wallet("W1"), amount).await.unwrap_err();
            assert!(matches!(err, Error::InvalidAmount(_)));

            let err = engine.withdraw(&alice, &wallet("W1"), amount).await.unwrap_err();
            assert!(matches!(err, Error::InvalidAmount(_)));

            let err = engine
                .transfer(&alice, &wallet("W1"), &wallet("W2"), amount)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidAmount(_)));
        }

        assert_eq!(engine.check_balance(&alice, &wallet("W1")).await.unwrap(), Decimal::ZERO);
        assert_eq!(store.history_len(), 0);
    }

    #[tokio::test]
    async fn test_unowned_wallet_rejected_before_any_mutation() {
        let (engine, store, alice, bob) = test_engine();
        engine.deposit(&bob, &wallet("W3"), dec(100_000)).await.unwrap();
        let history_before = store.history_len();

        // Alice does not own W3.
        let err = engine.deposit(&alice, &wallet("W3"), dec(100)).await.unwrap_err();
        assert!(matches!(err, Error::NotOwned { .. }));

        let err = engine.withdraw(&alice, &wallet("W3"), dec(100)).await.unwrap_err();
        assert!(matches!(err, Error::NotOwned { .. }));

        let err = engine
            .transfer(&alice, &wallet("W3"), &wallet("W1"), dec(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotOwned { .. }));

        let err = engine.list_history(&alice, &wallet("W3")).await.unwrap_err();
        assert!(matches!(err, Error::NotOwned { .. }));

        let err = engine.check_balance(&alice, &wallet("W3")).await.unwrap_err();
        assert!(matches!(err, Error::NotOwned { .. }));

        assert_eq!(engine.check_balance(&bob, &wallet("W3")).await.unwrap(), dec(100_000));
        assert_eq!(store.history_len(), history_before);
    }

    #[tokio::test]
    async fn test_transfer_to_unowned_destination_is_permitted() {
        let (engine, _store, alice, bob) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(100_000)).await.unwrap();

        engine
            .transfer(&alice, &wallet("W1"), &wallet("W3"), dec(40_000))
            .await
            .unwrap();

        assert_eq!(engine.check_balance(&alice, &wallet("W1")).await.unwrap(), dec(60_000));
        assert_eq!(engine.check_balance(&bob, &wallet("W3")).await.unwrap(), dec(40_000));
    }

    #[tokio::test]
    async fn test_transfer_to_missing_destination_rolls_back() {
        let (engine, store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(100_000)).await.unwrap();
        let history_before = store.history_len();

        let err = engine
            .transfer(&alice, &wallet("W1"), &wallet("W-404"), dec(40_000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WalletNotFound(_)));

        assert_eq!(engine.check_balance(&alice, &wallet("W1")).await.unwrap(), dec(100_000));
        assert_eq!(store.history_len(), history_before);
    }

    #[tokio::test]
    async fn test_self_transfer_conserves_balance() {
        let (engine, _store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(100_000)).await.unwrap();

        let txn_id = engine
            .transfer(&alice, &wallet("W1"), &wallet("W1"), dec(30_000))
            .await
            .unwrap();

        assert_eq!(engine.check_balance(&alice, &wallet("W1")).await.unwrap(), dec(100_000));
        let history = engine.list_history(&alice, &wallet("W1")).await.unwrap();
        assert!(history.iter().any(|r| r.txn_id == txn_id));
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back_transfer_completely() {
        let (engine, store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(100_000)).await.unwrap();
        let history_before = store.history_len();

        store.fail_next_commit();
        let err = engine
            .transfer(&alice, &wallet("W1"), &wallet("W2"), dec(40_000))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // Both balances at their pre-call values, no history row.
        assert_eq!(engine.check_balance(&alice, &wallet("W1")).await.unwrap(), dec(100_000));
        assert_eq!(engine.check_balance(&alice, &wallet("W2")).await.unwrap(), Decimal::ZERO);
        assert_eq!(store.history_len(), history_before);
    }

    #[tokio::test]
    async fn test_activity_log_failure_does_not_fail_the_operation() {
        let (engine, store, alice, _) = test_engine();
        store.fail_activity_writes(true);

        let balance = engine.deposit(&alice, &wallet("W1"), dec(100_000)).await.unwrap();
        assert_eq!(balance, dec(100_000));
        assert_eq!(engine.metrics().activity_log_failures_total.get(), 1);
        assert!(store.activities().is_empty());

        store.fail_activity_writes(false);
        engine.withdraw(&alice, &wallet("W1"), dec(10_000)).await.unwrap();
        assert_eq!(store.activities().len(), 1);
        assert_eq!(store.activities()[0].kind, ActivityKind::Withdraw);
    }

    #[tokio::test]
    async fn test_list_history_is_idempotent() {
        let (engine, _store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(100_000)).await.unwrap();
        engine.withdraw(&alice, &wallet("W1"), dec(25_000)).await.unwrap();
        engine
            .transfer(&alice, &wallet("W1"), &wallet("W2"), dec(25_000))
            .await
            .unwrap();

        let first = engine.list_history(&alice, &wallet("W1")).await.unwrap();
        let second = engine.list_history(&alice, &wallet("W1")).await.unwrap();
        assert_eq!(first.len(), 3);
        let first_ids: Vec<Uuid> = first.iter().map(|r| r.txn_id).collect();
        let second_ids: Vec<Uuid> = second.iter().map(|r| r.txn_id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_list_wallets_in_stable_order() {
        let (engine, _store, alice, bob) = test_engine();

        let wallets = engine.list_wallets(&alice).await.unwrap();
        let ids: Vec<&str> = wallets.iter().map(|w| w.wallet_id.as_str()).collect();
        assert_eq!(ids, vec!["W1", "W2"]);

        let wallets = engine.list_wallets(&bob).await.unwrap();
        assert_eq!(wallets.len(), 1);

        // Unknown users own nothing.
        let wallets = engine.list_wallets(&UserId::new("U-nobody")).await.unwrap();
        assert!(wallets.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_track_outcomes() {
        let (engine, _store, alice, _) = test_engine();
        engine.deposit(&alice, &wallet("W1"), dec(100_000)).await.unwrap();
        let _ = engine.withdraw(&alice, &wallet("W1"), dec(900_000)).await;

        assert_eq!(
            engine.metrics().mutations_total.with_label_values(&["deposit"]).get(),
            1
        );
        assert_eq!(
            engine.metrics().rejections_total.with_label_values(&["withdraw"]).get(),
            1
        );
    }
}
