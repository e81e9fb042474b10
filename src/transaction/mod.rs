//! Escrow transaction state machine.
//!
//! - [`state`] - the 13-state graph and step mapping
//! - [`types`] - `Transaction` record and id
//! - [`machine`] - guarded transitions (the only mutation path)
//! - [`store`] - in-memory keyed store

pub mod machine;
pub mod state;
pub mod store;
pub mod types;

pub use machine::{GuardContext, attempt_transition, force_transition};
pub use state::TransactionState;
pub use store::TransactionStore;
pub use types::{Transaction, TransactionId};
