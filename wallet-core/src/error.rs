//! Error types for the wallet ledger

use crate::types::{UserId, WalletId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error class, the only thing a transport layer needs to map a failure
///
/// Business rejections are caller-correctable and guaranteed to have mutated
/// nothing; retrying them without changing the request is pointless.
/// Infrastructure failures also roll back the in-flight unit, but a retry may
/// succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller-correctable rejection, no state mutated
    Business,
    /// Store/lock/timeout failure, unit rolled back, retry may help
    Infrastructure,
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is zero or negative
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    /// Balance too low for the requested mutation
    #[error("insufficient balance in wallet {wallet}: have {balance}, need {requested}")]
    InsufficientBalance {
        /// Wallet that was short
        wallet: WalletId,
        /// Balance at the time of the locked read
        balance: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// No ownership fact exists for the (user, wallet) pair
    #[error("wallet {wallet} is not owned by user {user}")]
    NotOwned {
        /// Caller identity
        user: UserId,
        /// Wallet the caller tried to touch
        wallet: WalletId,
    },

    /// Wallet row absent from the balance store
    #[error("wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// Row lock not acquired within the configured timeout
    #[error("timed out acquiring lock on wallet {0}")]
    LockTimeout(WalletId),

    /// Storage error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error for callers (retry is pointless vs. retry may help)
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidAmount(_)
            | Error::InsufficientBalance { .. }
            | Error::NotOwned { .. }
            | Error::WalletNotFound(_) => ErrorClass::Business,
            Error::LockTimeout(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorClass::Infrastructure,
        }
    }

    /// True if a retry of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Infrastructure
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
