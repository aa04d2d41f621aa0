//! Seam to the external payment processor.
//!
//! The core only needs three calls: place a hold with manual capture,
//! capture it, or release it. Tokenization, PCI handling and the wire
//! format are the processor integration's concern, not the core's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stakehold_types::PaymentMethod;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// A hold placed with the processor: funds reserved, not transferred.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hold {
    /// Opaque processor intent id.
    pub hold_id: String,
    /// Token the client uses to complete confirmation (3-D Secure etc).
    pub client_token: String,
}

/// Processor call failures, split by whether a retry can help.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProcessorError {
    /// Transient: the processor could not be reached. Retryable with
    /// bounded backoff; does not fail the contract.
    #[error("payment processor unavailable: {0}")]
    Unavailable(String),

    /// Terminal: the processor refused the request.
    #[error("payment processor rejected the request: {0}")]
    Rejected(String),
}

/// External payment processor operations the escrow ledger drives.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Reserve `amount_ore` with manual capture semantics.
    async fn create_hold(
        &self,
        amount_ore: i64,
        currency: &str,
        method: PaymentMethod,
    ) -> Result<Hold, ProcessorError>;

    /// Convert a hold into an actual transfer.
    async fn capture(&self, hold_id: &str) -> Result<(), ProcessorError>;

    /// Release a hold back to the payer.
    async fn release(&self, hold_id: &str) -> Result<(), ProcessorError>;
}

/// Kind of asynchronous processor notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorEventKind {
    /// The hold is fully placed (client confirmation finished).
    HoldConfirmed,
    /// The authorization failed on the processor side.
    HoldFailed,
}

/// Webhook-style event delivered by the processor. `event_id` is the
/// processor's delivery id; replays carry the same id and must not
/// double-apply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessorEvent {
    pub event_id: String,
    pub intent_id: String,
    pub kind: ProcessorEventKind,
}

/// Development processor that approves every request locally and keeps
/// per-hold state in memory. Never use where real money moves.
#[derive(Default)]
pub struct InMemoryProcessor {
    holds: Mutex<HashMap<String, i64>>,
}

impl InMemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold_count(&self) -> usize {
        self.holds.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryProcessor {
    async fn create_hold(
        &self,
        amount_ore: i64,
        _currency: &str,
        _method: PaymentMethod,
    ) -> Result<Hold, ProcessorError> {
        let hold_id = format!("pi_{}", uuid::Uuid::new_v4().simple());
        self.holds
            .lock()
            .map_err(|_| ProcessorError::Unavailable("state poisoned".to_string()))?
            .insert(hold_id.clone(), amount_ore);
        Ok(Hold {
            client_token: format!("{hold_id}_secret"),
            hold_id,
        })
    }

    async fn capture(&self, hold_id: &str) -> Result<(), ProcessorError> {
        let mut holds = self
            .holds
            .lock()
            .map_err(|_| ProcessorError::Unavailable("state poisoned".to_string()))?;
        holds
            .remove(hold_id)
            .map(|_| ())
            .ok_or_else(|| ProcessorError::Rejected(format!("unknown hold {hold_id}")))
    }

    async fn release(&self, hold_id: &str) -> Result<(), ProcessorError> {
        let mut holds = self
            .holds
            .lock()
            .map_err(|_| ProcessorError::Unavailable("state poisoned".to_string()))?;
        holds
            .remove(hold_id)
            .map(|_| ())
            .ok_or_else(|| ProcessorError::Rejected(format!("unknown hold {hold_id}")))
    }
}
