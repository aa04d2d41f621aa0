//! Stakehold Dispute - the gate that freezes settlement
//!
//! At most one dispute may be open per contract; opening a second is
//! rejected. The gate is the only writer of `Dispute.status` and
//! answers the synchronous open-dispute query the escrow ledger
//! consults at capture time.

#![deny(unsafe_code)]

use chrono::Utc;
use stakehold_escrow::CaptureGate;
use stakehold_types::{Dispute, DisputeEvent, DisputeId, DisputeStatus, ContractId, UserId};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{info, warn};

/// Registry of disputes, indexed per contract.
pub struct DisputeGate {
    disputes: RwLock<HashMap<DisputeId, Dispute>>,
    contract_index: RwLock<HashMap<ContractId, Vec<DisputeId>>>,
}

impl DisputeGate {
    pub fn new() -> Self {
        Self {
            disputes: RwLock::new(HashMap::new()),
            contract_index: RwLock::new(HashMap::new()),
        }
    }

    /// Open a dispute for a contract.
    ///
    /// Rejected with `DuplicateOpenDispute` while another one is open.
    /// The returned event is the eager signal towards ops/UI; capture
    /// re-checks the gate at capture time regardless.
    pub fn open(
        &self,
        contract_id: &ContractId,
        raised_by: UserId,
        reason: impl Into<String>,
        details: Option<String>,
    ) -> Result<(Dispute, DisputeEvent), DisputeError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DisputeError::InvalidInput("reason is empty".to_string()));
        }

        let mut disputes = self.disputes.write().map_err(|_| DisputeError::LockError)?;
        let mut index = self
            .contract_index
            .write()
            .map_err(|_| DisputeError::LockError)?;

        let already_open = index
            .get(contract_id)
            .into_iter()
            .flatten()
            .filter_map(|id| disputes.get(id))
            .any(|d| d.status == DisputeStatus::Open);
        if already_open {
            return Err(DisputeError::DuplicateOpenDispute(contract_id.clone()));
        }

        let dispute = Dispute {
            id: DisputeId::generate(),
            contract_id: contract_id.clone(),
            raised_by,
            reason,
            details,
            status: DisputeStatus::Open,
            opened_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        };
        index
            .entry(contract_id.clone())
            .or_default()
            .push(dispute.id.clone());
        disputes.insert(dispute.id.clone(), dispute.clone());

        info!(
            dispute_id = %dispute.id,
            contract_id = %contract_id,
            "Dispute opened, settlement frozen"
        );
        let event = DisputeEvent::Opened {
            contract_id: contract_id.clone(),
        };
        Ok((dispute, event))
    }

    /// Resolve a dispute. Resolution does not itself settle; the
    /// settlement coordinator re-drives the parked outcome.
    pub fn resolve(
        &self,
        dispute_id: &DisputeId,
        resolution: impl Into<String>,
    ) -> Result<(Dispute, DisputeEvent), DisputeError> {
        let mut disputes = self.disputes.write().map_err(|_| DisputeError::LockError)?;
        let dispute = disputes
            .get_mut(dispute_id)
            .ok_or_else(|| DisputeError::NotFound(dispute_id.0.clone()))?;

        if dispute.status == DisputeStatus::Resolved {
            return Err(DisputeError::AlreadyResolved(dispute_id.0.clone()));
        }

        dispute.status = DisputeStatus::Resolved;
        dispute.resolved_at = Some(Utc::now());
        dispute.resolution = Some(resolution.into());

        info!(dispute_id = %dispute_id, contract_id = %dispute.contract_id, "Dispute resolved");
        let event = DisputeEvent::Resolved {
            contract_id: dispute.contract_id.clone(),
        };
        Ok((dispute.clone(), event))
    }

    /// Whether the contract currently has an open dispute.
    pub fn has_open_dispute(&self, contract_id: &ContractId) -> Result<bool, DisputeError> {
        let disputes = self.disputes.read().map_err(|_| DisputeError::LockError)?;
        let index = self
            .contract_index
            .read()
            .map_err(|_| DisputeError::LockError)?;
        Ok(index
            .get(contract_id)
            .into_iter()
            .flatten()
            .filter_map(|id| disputes.get(id))
            .any(|d| d.status == DisputeStatus::Open))
    }

    pub fn get(&self, dispute_id: &DisputeId) -> Result<Option<Dispute>, DisputeError> {
        let disputes = self.disputes.read().map_err(|_| DisputeError::LockError)?;
        Ok(disputes.get(dispute_id).cloned())
    }

    /// All disputes for a contract, oldest first.
    pub fn disputes_for(&self, contract_id: &ContractId) -> Result<Vec<Dispute>, DisputeError> {
        let disputes = self.disputes.read().map_err(|_| DisputeError::LockError)?;
        let index = self
            .contract_index
            .read()
            .map_err(|_| DisputeError::LockError)?;
        Ok(index
            .get(contract_id)
            .into_iter()
            .flatten()
            .filter_map(|id| disputes.get(id))
            .cloned()
            .collect())
    }
}

impl CaptureGate for DisputeGate {
    fn has_open_dispute(&self, contract_id: &ContractId) -> bool {
        // A broken gate must fail closed: treat it as disputed and block
        // capture rather than move money past an unreadable registry.
        DisputeGate::has_open_dispute(self, contract_id).unwrap_or_else(|err| {
            warn!(%err, contract_id = %contract_id, "Dispute gate unreadable, blocking capture");
            true
        })
    }
}

impl Default for DisputeGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispute gate errors.
#[derive(Debug, Error)]
pub enum DisputeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("contract {0} already has an open dispute")]
    DuplicateOpenDispute(ContractId),

    #[error("dispute not found: {0}")]
    NotFound(String),

    #[error("dispute already resolved: {0}")]
    AlreadyResolved(String),

    #[error("lock error")]
    LockError,
}
