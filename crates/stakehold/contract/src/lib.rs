//! Stakehold Contract - lifecycle state machine for commitment contracts
//!
//! The contract book is the only writer of `Contract.status`. All
//! operations are linearizable per contract: the book holds its maps
//! behind a single writer lock, so a check-in can never be accepted
//! after a terminal transition has been observed.

#![deny(unsafe_code)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use stakehold_types::{
    CheckIn, CheckInId, Contract, ContractEvent, ContractId, ContractOutcome, ContractStatus,
    UserId, VerificationOutcome,
};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Input for creating a contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateContract {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Stake in øre; must be > 0.
    pub stake_ore: i64,
    pub target_date: NaiveDate,
}

/// Registry and state machine for commitment contracts.
pub struct ContractBook {
    contracts: RwLock<HashMap<ContractId, Contract>>,
    owner_index: RwLock<HashMap<UserId, Vec<ContractId>>>,
}

impl ContractBook {
    pub fn new() -> Self {
        Self {
            contracts: RwLock::new(HashMap::new()),
            owner_index: RwLock::new(HashMap::new()),
        }
    }

    /// Create and immediately activate a contract.
    ///
    /// Fails with `InvalidInput` when the stake is not positive, the
    /// title is empty, or the target date is not strictly in the future.
    /// At most one contract per owner may be active; a second attempt is
    /// rejected before any state changes.
    ///
    /// Returns the contract together with the activation event the
    /// settlement/notification side consumes.
    pub fn create(
        &self,
        owner: UserId,
        input: CreateContract,
    ) -> Result<(Contract, ContractEvent), ContractError> {
        if input.stake_ore <= 0 {
            return Err(ContractError::InvalidInput(format!(
                "stake must be positive, got {} øre",
                input.stake_ore
            )));
        }
        if input.title.trim().is_empty() {
            return Err(ContractError::InvalidInput("title is empty".to_string()));
        }
        let now = Utc::now();
        if input.target_date <= now.date_naive() {
            return Err(ContractError::InvalidInput(format!(
                "target date {} is not in the future",
                input.target_date
            )));
        }

        // Uniqueness check and insert happen under the same write locks.
        let mut contracts = self
            .contracts
            .write()
            .map_err(|_| ContractError::LockError)?;
        let mut owner_index = self
            .owner_index
            .write()
            .map_err(|_| ContractError::LockError)?;

        let has_active = owner_index
            .get(&owner)
            .into_iter()
            .flatten()
            .filter_map(|id| contracts.get(id))
            .any(|c| c.status == ContractStatus::Active);
        if has_active {
            return Err(ContractError::ActiveContractExists(owner));
        }

        let contract = Contract {
            id: ContractId::generate(),
            owner: owner.clone(),
            title: input.title,
            description: input.description,
            stake_ore: input.stake_ore,
            target_date: input.target_date,
            status: ContractStatus::Active,
            created_at: now,
            updated_at: now,
            check_ins: Vec::new(),
        };

        let event = ContractEvent::Activated {
            contract_id: contract.id.clone(),
            owner: owner.clone(),
            stake_ore: contract.stake_ore,
            target_date: contract.target_date,
        };

        contracts.insert(contract.id.clone(), contract.clone());
        owner_index.entry(owner).or_default().push(contract.id.clone());

        tracing::info!(
            contract_id = %contract.id,
            stake_ore = contract.stake_ore,
            target_date = %contract.target_date,
            "Contract activated"
        );

        Ok((contract, event))
    }

    /// Record a check-in against an active contract.
    ///
    /// The timestamp must fall inside `[created_at, end of target date]`;
    /// anything past the last instant of the target date is rejected with
    /// `OutOfWindow`. Recording never alters contract status.
    pub fn record_check_in(
        &self,
        contract_id: &ContractId,
        recorded_at: DateTime<Utc>,
        note: Option<String>,
        verification: VerificationOutcome,
    ) -> Result<Contract, ContractError> {
        let mut contracts = self
            .contracts
            .write()
            .map_err(|_| ContractError::LockError)?;
        let contract = contracts
            .get_mut(contract_id)
            .ok_or_else(|| ContractError::NotFound(contract_id.0.clone()))?;

        if contract.status != ContractStatus::Active {
            return Err(ContractError::NotActive {
                contract_id: contract_id.0.clone(),
                status: contract.status,
            });
        }
        if recorded_at < contract.created_at || recorded_at > contract.window_end() {
            return Err(ContractError::OutOfWindow {
                recorded_at,
                window_start: contract.created_at,
                window_end: contract.window_end(),
            });
        }

        let check_in = CheckIn {
            id: CheckInId::generate(),
            contract_id: contract_id.clone(),
            recorded_at,
            note,
            verification,
        };
        tracing::debug!(
            contract_id = %contract_id,
            check_in_id = %check_in.id,
            verified = check_in.verification.is_verified(),
            "Check-in recorded"
        );
        contract.check_ins.push(check_in);
        contract.updated_at = Utc::now();

        Ok(contract.clone())
    }

    /// Drive a contract to a terminal outcome.
    ///
    /// Idempotent: repeating the same outcome on an already-terminal
    /// contract is a no-op success and emits no event. A conflicting
    /// outcome is `ConflictingTransition`. Ending a draft is `NotActive`.
    pub fn end(
        &self,
        contract_id: &ContractId,
        outcome: ContractOutcome,
    ) -> Result<(Contract, Option<ContractEvent>), ContractError> {
        let mut contracts = self
            .contracts
            .write()
            .map_err(|_| ContractError::LockError)?;
        let contract = contracts
            .get_mut(contract_id)
            .ok_or_else(|| ContractError::NotFound(contract_id.0.clone()))?;

        if contract.status.is_terminal() {
            if contract.status == outcome.as_status() {
                return Ok((contract.clone(), None));
            }
            return Err(ContractError::ConflictingTransition {
                requested: outcome.as_status(),
                actual: contract.status,
            });
        }
        if contract.status != ContractStatus::Active {
            return Err(ContractError::NotActive {
                contract_id: contract_id.0.clone(),
                status: contract.status,
            });
        }

        contract.status = outcome.as_status();
        contract.updated_at = Utc::now();

        tracing::info!(contract_id = %contract_id, outcome = ?outcome, "Contract ended");

        let event = ContractEvent::Ended {
            contract_id: contract_id.clone(),
            outcome,
        };
        Ok((contract.clone(), Some(event)))
    }

    /// The owner's single active contract, if any. Explicit query; the
    /// uniqueness invariant is enforced at creation.
    pub fn find_active(&self, owner: &UserId) -> Result<Option<Contract>, ContractError> {
        // Lock order is contracts before owner_index, everywhere.
        let contracts = self
            .contracts
            .read()
            .map_err(|_| ContractError::LockError)?;
        let owner_index = self
            .owner_index
            .read()
            .map_err(|_| ContractError::LockError)?;

        let ids = match owner_index.get(owner) {
            Some(ids) => ids,
            None => return Ok(None),
        };
        Ok(ids
            .iter()
            .filter_map(|id| contracts.get(id))
            .find(|c| c.status == ContractStatus::Active)
            .cloned())
    }

    pub fn get(&self, contract_id: &ContractId) -> Result<Option<Contract>, ContractError> {
        let contracts = self
            .contracts
            .read()
            .map_err(|_| ContractError::LockError)?;
        Ok(contracts.get(contract_id).cloned())
    }

    /// Terminal contracts for an owner, newest first.
    pub fn history(&self, owner: &UserId) -> Result<Vec<Contract>, ContractError> {
        let contracts = self
            .contracts
            .read()
            .map_err(|_| ContractError::LockError)?;
        let owner_index = self
            .owner_index
            .read()
            .map_err(|_| ContractError::LockError)?;

        let mut results: Vec<_> = owner_index
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|id| contracts.get(id))
            .filter(|c| c.status.is_terminal())
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    /// Active contracts whose target date falls on `date`. Read-only;
    /// used by the reminder batch scan.
    pub fn active_due_on(&self, date: NaiveDate) -> Result<Vec<Contract>, ContractError> {
        let contracts = self
            .contracts
            .read()
            .map_err(|_| ContractError::LockError)?;
        Ok(contracts
            .values()
            .filter(|c| c.status == ContractStatus::Active && c.target_date == date)
            .cloned()
            .collect())
    }
}

impl Default for ContractBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract state machine errors.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("owner {0} already has an active contract")]
    ActiveContractExists(UserId),

    #[error("contract not found: {0}")]
    NotFound(String),

    #[error("contract {contract_id} is not active (status: {status:?})")]
    NotActive {
        contract_id: String,
        status: ContractStatus,
    },

    #[error("check-in at {recorded_at} outside window [{window_start}, {window_end}]")]
    OutOfWindow {
        recorded_at: DateTime<Utc>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    },

    #[error("conflicting transition: requested {requested:?} but contract is {actual:?}")]
    ConflictingTransition {
        requested: ContractStatus,
        actual: ContractStatus,
    },

    #[error("lock error")]
    LockError,
}
