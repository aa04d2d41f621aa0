//! Stakehold Service - the unified facade over the engine
//!
//! Wires the contract book, presence verifier, escrow ledger, dispute
//! gate and settlement coordinator into the operations callers actually
//! invoke. Components stay independently testable; this crate owns only
//! the cross-component flows.

#![deny(unsafe_code)]

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use stakehold_contract::{ContractBook, ContractError, CreateContract};
use stakehold_dispute::{DisputeError, DisputeGate};
use stakehold_escrow::{
    EscrowConfig, EscrowError, EscrowLedger, PaymentProcessor, ProcessorEvent,
};
use stakehold_presence::{GeoSampler, PresenceVerifier, SessionConfig, SessionResult};
use stakehold_settlement::{
    activation_reminder, due_reminders, settlement_hint, SettlementCoordinator,
    SettlementDisposition, SettlementError,
};
use stakehold_types::{
    Contract, ContractId, ContractOutcome, Dispute, DisputeId, Payment, PaymentId, PaymentMethod,
    ReminderHint, SettlementHint, UserId,
};

/// Everything `create_contract` produced: the active contract, the
/// payment leg (absent when authorization could not start), and the
/// scheduling hints for the external notification side.
#[derive(Clone, Debug)]
pub struct ContractCreated {
    pub contract: Contract,
    pub payment: Option<Payment>,
    /// Processor client token for the confirmation step; `None` for
    /// stub authorizations.
    pub client_token: Option<String>,
    pub settlement: SettlementHint,
    pub reminder: Option<ReminderHint>,
}

/// Facade over the engine. Cheap to clone via the `Arc`s it hands out.
pub struct StakeholdService {
    contracts: Arc<ContractBook>,
    verifier: PresenceVerifier,
    escrow: Arc<EscrowLedger>,
    disputes: Arc<DisputeGate>,
    settlement: SettlementCoordinator,
}

impl StakeholdService {
    pub fn new(
        sampler: Arc<dyn GeoSampler>,
        processor: Arc<dyn PaymentProcessor>,
        escrow_config: EscrowConfig,
        session_config: SessionConfig,
    ) -> Self {
        let contracts = Arc::new(ContractBook::new());
        let escrow = Arc::new(EscrowLedger::new(processor, escrow_config));
        let disputes = Arc::new(DisputeGate::new());
        let settlement = SettlementCoordinator::new(escrow.clone(), disputes.clone());
        Self {
            contracts,
            verifier: PresenceVerifier::new(sampler, session_config),
            escrow,
            disputes,
            settlement,
        }
    }

    pub fn contracts(&self) -> &ContractBook {
        &self.contracts
    }

    pub fn escrow(&self) -> &EscrowLedger {
        &self.escrow
    }

    pub fn disputes(&self) -> &DisputeGate {
        &self.disputes
    }

    /// Create a contract and start its payment leg.
    ///
    /// Authorization failure never demotes the contract: a processor
    /// outage either falls back to a stub authorization (when the caller
    /// opted into degraded mode) or is surfaced with the contract left
    /// Active and the payment resumable via a later retry.
    #[instrument(skip(self, input), fields(owner = %owner))]
    pub async fn create_contract(
        &self,
        owner: UserId,
        input: CreateContract,
        method: PaymentMethod,
        allow_stub: bool,
    ) -> Result<ContractCreated, ServiceError> {
        let (contract, _event) = self.contracts.create(owner.clone(), input)?;
        let settlement = settlement_hint(&contract);
        let reminder = activation_reminder(&contract);

        let (payment, client_token) = match self
            .escrow
            .authorize(&contract.id, &owner, contract.stake_ore, method)
            .await
        {
            Ok(auth) => (Some(auth.payment), auth.client_token),
            Err(EscrowError::ProcessorUnavailable(reason)) if allow_stub => {
                warn!(contract_id = %contract.id, %reason, "Processor down, degrading to stub authorization");
                let payment =
                    self.escrow
                        .authorize_stub(&contract.id, &owner, contract.stake_ore, method)?;
                (Some(payment), None)
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            contract_id = %contract.id,
            stake_ore = contract.stake_ore,
            authorized = payment.is_some(),
            "Contract created"
        );
        Ok(ContractCreated {
            contract,
            payment,
            client_token,
            settlement,
            reminder,
        })
    }

    /// Run a presence session for the contract and record the resulting
    /// check-in.
    ///
    /// Returns `None` when the session was aborted before producing any
    /// evidence. A strict-policy geofence breach surfaces as
    /// `PresenceRejected` and records nothing.
    #[instrument(skip(self, cancel))]
    pub async fn check_in(
        &self,
        contract_id: &ContractId,
        note: Option<String>,
        cancel: watch::Receiver<bool>,
    ) -> Result<Option<Contract>, ServiceError> {
        // Reject unknown or non-active contracts before sampling starts.
        let contract = self
            .contracts
            .get(contract_id)?
            .ok_or_else(|| ContractError::NotFound(contract_id.0.clone()))?;
        if contract.status != stakehold_types::ContractStatus::Active {
            return Err(ContractError::NotActive {
                contract_id: contract_id.0.clone(),
                status: contract.status,
            }
            .into());
        }

        match self.verifier.run(cancel).await {
            SessionResult::Aborted => Ok(None),
            SessionResult::Rejected { distance_m } => {
                Err(ServiceError::PresenceRejected { distance_m })
            }
            SessionResult::CheckIn(outcome) => {
                let contract =
                    self.contracts
                        .record_check_in(contract_id, Utc::now(), note, outcome)?;
                Ok(Some(contract))
            }
        }
    }

    /// `RequiresAction -> Authorized`, after the client completed the
    /// processor's confirmation step.
    pub fn confirm_payment(&self, payment_id: &PaymentId) -> Result<Payment, ServiceError> {
        Ok(self.escrow.confirm(payment_id)?)
    }

    /// Idempotent webhook ingestion. Returns whether a transition was
    /// applied.
    pub fn ingest_processor_event(&self, event: &ProcessorEvent) -> Result<bool, ServiceError> {
        Ok(self.escrow.ingest_processor_event(event)?)
    }

    /// End the contract and drive settlement for its payment leg.
    ///
    /// Re-ending with the same outcome is a no-op success with no
    /// settlement action.
    #[instrument(skip(self))]
    pub async fn end_contract(
        &self,
        contract_id: &ContractId,
        outcome: ContractOutcome,
    ) -> Result<(Contract, Option<SettlementDisposition>), ServiceError> {
        let (contract, event) = self.contracts.end(contract_id, outcome)?;
        let disposition = match event {
            Some(event) => Some(self.settlement.handle_event(&event).await?),
            None => None,
        };
        Ok((contract, disposition))
    }

    pub fn open_dispute(
        &self,
        contract_id: &ContractId,
        raised_by: UserId,
        reason: impl Into<String>,
        details: Option<String>,
    ) -> Result<Dispute, ServiceError> {
        let (dispute, _event) = self.disputes.open(contract_id, raised_by, reason, details)?;
        Ok(dispute)
    }

    /// Resolve a dispute and re-drive any settlement it was blocking.
    #[instrument(skip(self, resolution))]
    pub async fn resolve_dispute(
        &self,
        dispute_id: &DisputeId,
        resolution: impl Into<String>,
    ) -> Result<(Dispute, Option<SettlementDisposition>), ServiceError> {
        let (dispute, _event) = self.disputes.resolve(dispute_id, resolution)?;
        let disposition = self
            .settlement
            .handle_dispute_resolved(&dispute.contract_id)
            .await?;
        Ok((dispute, disposition))
    }

    /// Wallet balance in øre, summed from the ledger on read.
    pub fn wallet_balance(&self, user: &UserId) -> Result<i64, ServiceError> {
        Ok(self.escrow.wallet().balance(user)?)
    }

    pub fn find_active_contract(&self, owner: &UserId) -> Result<Option<Contract>, ServiceError> {
        Ok(self.contracts.find_active(owner)?)
    }

    /// The owner's ended contracts, newest first.
    pub fn history(&self, owner: &UserId) -> Result<Vec<Contract>, ServiceError> {
        Ok(self.contracts.history(owner)?)
    }

    /// Contracts due tomorrow, for the external notification scheduler.
    pub fn due_reminders(&self, today: NaiveDate) -> Result<Vec<ReminderHint>, ServiceError> {
        Ok(due_reminders(&self.contracts, today, 1)?)
    }
}

/// Facade-level errors: the component errors plus the one outcome only
/// the facade can produce.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Dispute(#[from] DisputeError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error("presence rejected: {distance_m:.0} m outside the geofence")]
    PresenceRejected { distance_m: f64 },
}
