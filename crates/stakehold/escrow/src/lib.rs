//! Stakehold Escrow - payment hold lifecycle and wallet bookkeeping
//!
//! The escrow ledger is the only writer of `Payment.status`. Holds are
//! authorized at contract creation and later captured to the beneficiary
//! or released back to the payer depending on the contract outcome and
//! dispute state.

#![deny(unsafe_code)]

pub mod config;
pub mod ledger;
pub mod processor;
pub mod wallet;

pub use config::EscrowConfig;
pub use ledger::{CaptureGate, EscrowError, EscrowLedger};
pub use processor::{
    Hold, InMemoryProcessor, PaymentProcessor, ProcessorError, ProcessorEvent, ProcessorEventKind,
};
pub use wallet::{PayoutRequest, PayoutStatus, WalletLedger};
