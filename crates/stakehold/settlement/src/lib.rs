//! Stakehold Settlement - from contract outcome to payment disposition
//!
//! The coordinator consumes the typed events the contract book emits and
//! drives the escrow ledger: completed contracts capture (unless a
//! dispute parks the settlement), cancelled contracts always refund.

#![deny(unsafe_code)]

pub mod coordinator;
pub mod reminders;
pub mod retry;

pub use coordinator::{
    ParkedSettlement, SettlementCoordinator, SettlementDisposition, SettlementError,
};
pub use reminders::{activation_reminder, due_reminders, settlement_hint};
pub use retry::{with_backoff, BackoffPolicy};
