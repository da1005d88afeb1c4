//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User identifier, resolved by the session layer before any engine call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wallet identifier
///
/// Wallet IDs are opaque strings. Their lexicographic order doubles as the
/// canonical lock order for multi-row units (see `Engine::transfer`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(String);

impl WalletId {
    /// Create new wallet ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wallet row
///
/// Mutated only inside an atomic unit that holds the row's exclusive lock.
/// Invariant: `balance >= 0` whenever the row is observable outside an
/// in-flight unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub wallet_id: WalletId,

    /// Display name
    pub name: String,

    /// Current balance (exact decimal, never negative post-commit)
    pub balance: Decimal,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp (None until first mutation)
    pub updated_at: Option<DateTime<Utc>>,
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxnKind {
    /// Two-wallet transfer
    Transfer = 1,
    /// Deposit into a single wallet
    Deposit = 2,
    /// Withdrawal from a single wallet
    Withdraw = 3,
}

impl TxnKind {
    /// Stable string code, as recorded in history rows
    pub fn code(&self) -> &'static str {
        match self {
            TxnKind::Transfer => "transfer",
            TxnKind::Deposit => "deposit",
            TxnKind::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for TxnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Immutable transaction history record
///
/// Created exactly once per successful mutation, inside the same atomic unit
/// as the balance write. Never updated or deleted. For deposit/withdraw,
/// `from_wallet == to_wallet == the affected wallet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnRecord {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub txn_id: Uuid,

    /// Source wallet
    pub from_wallet: WalletId,

    /// Destination wallet
    pub to_wallet: WalletId,

    /// Transaction kind
    pub kind: TxnKind,

    /// Amount moved (always strictly positive)
    pub amount: Decimal,

    /// Execution timestamp
    pub executed_at: DateTime<Utc>,
}

impl TxnRecord {
    /// Whether this record touches the given wallet on either side
    pub fn touches(&self, wallet: &WalletId) -> bool {
        &self.from_wallet == wallet || &self.to_wallet == wallet
    }
}

/// User activity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActivityKind {
    /// Session login (recorded by the session layer)
    Login = 1,
    /// Transfer between wallets
    Transfer = 2,
    /// Deposit
    Deposit = 3,
    /// Withdrawal
    Withdraw = 4,
}

impl ActivityKind {
    /// Stable string code
    pub fn code(&self) -> &'static str {
        match self {
            ActivityKind::Login => "login",
            ActivityKind::Transfer => "transfer",
            ActivityKind::Deposit => "deposit",
            ActivityKind::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Append-only user activity record
///
/// Written after the ledger mutation commits; best-effort (its failure never
/// unwinds the mutation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Unique activity ID
    pub activity_id: Uuid,

    /// Activity kind
    pub kind: ActivityKind,

    /// Human-readable description
    pub detail: String,

    /// Related wallet, if any
    pub wallet: Option<WalletId>,

    /// Recording timestamp
    pub recorded_at: DateTime<Utc>,
}

impl ActivityRecord {
    /// Build an activity record with a fresh ID, stamped now
    pub fn now(kind: ActivityKind, detail: impl Into<String>, wallet: Option<WalletId>) -> Self {
        Self {
            activity_id: Uuid::now_v7(),
            kind,
            detail: detail.into(),
            wallet,
            recorded_at: Utc::now(),
        }
    }
}
