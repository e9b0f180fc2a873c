//! Tellor supply analytics collector
//!
//! Reconciles Ethereum-side bridge state with Tellor Layer supply, staking,
//! and account balances into one unified snapshot timeline keyed by
//! Ethereum block timestamp, persisted in SQLite.

pub mod balances;
pub mod bridge_ledger;
pub mod chain;
pub mod config;
pub mod drivers;
pub mod error;
pub mod finder;
pub mod reconciler;
pub mod store;
pub mod types;

pub use config::CollectorConfig;
pub use drivers::CollectionDriver;
pub use error::{ChainError, StoreError};
pub use reconciler::UnifiedReconciler;
pub use store::SnapshotStore;
pub use types::{BalanceRecord, ResolvedBlock, UnifiedSnapshot};
