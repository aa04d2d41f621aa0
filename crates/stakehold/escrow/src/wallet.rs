//! Wallet ledger: signed entries, sum-on-read balances, payout approval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stakehold_types::{EntryReason, LedgerEntryId, PayoutRequestId, UserId, WalletEntry};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::ledger::EscrowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Approved,
}

/// A user's request to withdraw from their wallet balance. The balance
/// is re-validated at approval time, not at request time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: PayoutRequestId,
    pub user: UserId,
    pub amount_ore: i64,
    pub status: PayoutStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

/// Append-only wallet ledger. A balance is always the sum of a user's
/// entries, recomputed on read; there is no mutable counter to lose
/// updates against.
pub struct WalletLedger {
    entries: RwLock<Vec<WalletEntry>>,
    payout_requests: RwLock<HashMap<PayoutRequestId, PayoutRequest>>,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            payout_requests: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn append(
        &self,
        user: UserId,
        amount_ore: i64,
        reason: EntryReason,
    ) -> Result<WalletEntry, EscrowError> {
        let entry = WalletEntry {
            id: LedgerEntryId::generate(),
            user,
            amount_ore,
            reason,
            recorded_at: Utc::now(),
        };
        let mut entries = self.entries.write().map_err(|_| EscrowError::LockError)?;
        entries.push(entry.clone());
        Ok(entry)
    }

    /// Sum of the user's entries.
    pub fn balance(&self, user: &UserId) -> Result<i64, EscrowError> {
        let entries = self.entries.read().map_err(|_| EscrowError::LockError)?;
        Ok(entries
            .iter()
            .filter(|e| &e.user == user)
            .map(|e| e.amount_ore)
            .sum())
    }

    /// All entries for a user, newest first.
    pub fn entries_for(&self, user: &UserId) -> Result<Vec<WalletEntry>, EscrowError> {
        let entries = self.entries.read().map_err(|_| EscrowError::LockError)?;
        let mut result: Vec<_> = entries.iter().filter(|e| &e.user == user).cloned().collect();
        result.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(result)
    }

    /// File a payout request. Amount sanity is checked here; the balance
    /// check happens at approval.
    pub fn request_payout(
        &self,
        user: UserId,
        amount_ore: i64,
    ) -> Result<PayoutRequest, EscrowError> {
        if amount_ore <= 0 {
            return Err(EscrowError::InvalidInput(format!(
                "payout amount must be positive, got {amount_ore} øre"
            )));
        }
        let request = PayoutRequest {
            id: PayoutRequestId::generate(),
            user,
            amount_ore,
            status: PayoutStatus::Pending,
            requested_at: Utc::now(),
            approved_at: None,
        };
        let mut requests = self
            .payout_requests
            .write()
            .map_err(|_| EscrowError::LockError)?;
        requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    /// Approve a payout against the freshly computed balance. A balance
    /// may have shrunk since the request; approval must never drive it
    /// negative.
    pub fn approve_payout(&self, request_id: &PayoutRequestId) -> Result<PayoutRequest, EscrowError> {
        // Entries lock is taken for the whole check-and-append so no
        // concurrent approval can spend the same balance twice.
        let mut entries = self.entries.write().map_err(|_| EscrowError::LockError)?;
        let mut requests = self
            .payout_requests
            .write()
            .map_err(|_| EscrowError::LockError)?;
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| EscrowError::NotFound(request_id.0.clone()))?;

        if request.status == PayoutStatus::Approved {
            return Ok(request.clone());
        }

        let balance: i64 = entries
            .iter()
            .filter(|e| e.user == request.user)
            .map(|e| e.amount_ore)
            .sum();
        if request.amount_ore > balance {
            return Err(EscrowError::InsufficientBalance {
                requested_ore: request.amount_ore,
                balance_ore: balance,
            });
        }

        entries.push(WalletEntry {
            id: LedgerEntryId::generate(),
            user: request.user.clone(),
            amount_ore: -request.amount_ore,
            reason: EntryReason::PayoutApproved,
            recorded_at: Utc::now(),
        });
        request.status = PayoutStatus::Approved;
        request.approved_at = Some(Utc::now());

        info!(
            request_id = %request.id,
            user = %request.user,
            amount_ore = request.amount_ore,
            "Payout approved"
        );
        Ok(request.clone())
    }
}

impl Default for WalletLedger {
    fn default() -> Self {
        Self::new()
    }
}
