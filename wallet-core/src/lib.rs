//! Wallet Ledger Core
//!
//! Concurrency-safe wallet balance mutation over injected store capabilities.
//!
//! # Architecture
//!
//! - **Atomic units**: every mutation (balance write + history record)
//!   commits or rolls back as a whole
//! - **Row locking**: wallet rows are mutated only under a per-row exclusive
//!   lock scoped to one unit
//! - **Canonical lock order**: multi-row units lock in lexicographic wallet
//!   ID order, making concurrent reverse transfers deadlock-free
//! - **Exact arithmetic**: Decimal for money, never floating point
//!
//! # Invariants
//!
//! - Balances are never negative after a committed operation
//! - Transfers conserve the sum of the two balances involved
//! - History is append-only: records are never modified or deleted

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, ErrorClass, Result};
pub use memory::MemoryStore;
pub use storage::Storage;
pub use types::{
    ActivityKind, ActivityRecord, TxnKind, TxnRecord, UserId, Wallet, WalletId,
};
