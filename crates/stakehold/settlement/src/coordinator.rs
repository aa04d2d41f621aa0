//! Settlement coordinator: turns contract lifecycle events into escrow
//! actions, parking captures that an open dispute blocks.

use chrono::Utc;
use stakehold_contract::ContractError;
use stakehold_dispute::{DisputeError, DisputeGate};
use stakehold_escrow::{CaptureGate, EscrowError, EscrowLedger};
use stakehold_types::{
    end_of_day_utc, ContractEvent, ContractId, ContractOutcome, PaymentId, PaymentStatus,
    SettlementHint,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// A capture that could not run because the contract had an open
/// dispute at settlement time. Re-driven when the dispute resolves.
#[derive(Clone, Debug, PartialEq)]
pub struct ParkedSettlement {
    pub contract_id: ContractId,
    pub payment_id: PaymentId,
    pub parked_at: chrono::DateTime<Utc>,
}

/// What the coordinator did with an event.
#[derive(Clone, Debug, PartialEq)]
pub enum SettlementDisposition {
    /// An activation was scheduled: settle at the end of the contract
    /// window.
    Scheduled { settlement: SettlementHint },
    /// The stake moved to the beneficiary.
    Captured,
    /// The hold was released back to the payer.
    Refunded,
    /// Capture is parked behind an open dispute.
    Parked,
    /// The contract ended with no authorized payment to settle.
    NoAuthorization,
}

pub struct SettlementCoordinator {
    escrow: Arc<EscrowLedger>,
    disputes: Arc<DisputeGate>,
    parked: RwLock<HashMap<ContractId, ParkedSettlement>>,
}

impl SettlementCoordinator {
    pub fn new(escrow: Arc<EscrowLedger>, disputes: Arc<DisputeGate>) -> Self {
        Self {
            escrow,
            disputes,
            parked: RwLock::new(HashMap::new()),
        }
    }

    /// Consume a contract event. Idempotent: replaying an `Ended` event
    /// whose payment already reached its terminal status reports the
    /// same disposition without touching the processor.
    #[instrument(skip(self), fields(event = ?std::mem::discriminant(event)))]
    pub async fn handle_event(
        &self,
        event: &ContractEvent,
    ) -> Result<SettlementDisposition, SettlementError> {
        match event {
            ContractEvent::Activated {
                contract_id,
                target_date,
                ..
            } => {
                let settle_at = end_of_day_utc(*target_date);
                info!(contract_id = %contract_id, %settle_at, "Settlement scheduled");
                Ok(SettlementDisposition::Scheduled {
                    settlement: SettlementHint {
                        contract_id: contract_id.clone(),
                        settle_at,
                    },
                })
            }
            ContractEvent::Ended {
                contract_id,
                outcome,
            } => self.settle(contract_id, *outcome).await,
        }
    }

    /// Settle an ended contract: a completed contract forfeits the
    /// stake to the beneficiary (unless a dispute parks the capture); a
    /// cancelled contract releases the hold back to the payer, dispute
    /// or not.
    async fn settle(
        &self,
        contract_id: &ContractId,
        outcome: ContractOutcome,
    ) -> Result<SettlementDisposition, SettlementError> {
        let Some(payment) = self.escrow.payment_for_contract(contract_id)? else {
            info!(contract_id = %contract_id, "Contract ended with no payment leg");
            return Ok(SettlementDisposition::NoAuthorization);
        };

        match outcome {
            ContractOutcome::Completed => {
                if payment.status == PaymentStatus::Captured {
                    return Ok(SettlementDisposition::Captured);
                }
                if payment.status != PaymentStatus::Authorized {
                    return Ok(SettlementDisposition::NoAuthorization);
                }

                if self.disputes.has_open_dispute(contract_id)? {
                    return self.park(contract_id, &payment.id);
                }
                match self
                    .escrow
                    .capture(&payment.id, &*self.disputes as &dyn CaptureGate)
                    .await
                {
                    Ok(_) => {
                        self.unpark(contract_id)?;
                        Ok(SettlementDisposition::Captured)
                    }
                    // A dispute opened between the check and the capture.
                    Err(EscrowError::Blocked(_)) => self.park(contract_id, &payment.id),
                    Err(err) => Err(err.into()),
                }
            }
            ContractOutcome::Cancelled => {
                if payment.status == PaymentStatus::Canceled {
                    return Ok(SettlementDisposition::Refunded);
                }
                if payment.status != PaymentStatus::Authorized {
                    return Ok(SettlementDisposition::NoAuthorization);
                }
                // Refund takes priority regardless of dispute state.
                self.escrow.cancel(&payment.id).await?;
                self.unpark(contract_id)?;
                Ok(SettlementDisposition::Refunded)
            }
        }
    }

    /// Re-drive a parked capture once the dispute on the contract has
    /// been resolved. Returns `None` when nothing was parked.
    #[instrument(skip(self))]
    pub async fn handle_dispute_resolved(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<SettlementDisposition>, SettlementError> {
        let parked = {
            let map = self.parked.read().map_err(|_| SettlementError::LockError)?;
            map.get(contract_id).cloned()
        };
        let Some(parked) = parked else {
            return Ok(None);
        };

        if self.disputes.has_open_dispute(contract_id)? {
            // Another dispute is still open; the capture stays parked.
            return Ok(Some(SettlementDisposition::Parked));
        }

        match self
            .escrow
            .capture(&parked.payment_id, &*self.disputes as &dyn CaptureGate)
            .await
        {
            Ok(_) => {
                self.unpark(contract_id)?;
                info!(contract_id = %contract_id, "Parked capture re-driven");
                Ok(Some(SettlementDisposition::Captured))
            }
            Err(EscrowError::Blocked(_)) => Ok(Some(SettlementDisposition::Parked)),
            Err(EscrowError::InvalidTransition { .. }) => {
                // Someone cancelled or captured the hold out of band.
                self.unpark(contract_id)?;
                Ok(Some(SettlementDisposition::NoAuthorization))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Captures currently waiting on a dispute resolution.
    pub fn parked(&self) -> Result<Vec<ParkedSettlement>, SettlementError> {
        let map = self.parked.read().map_err(|_| SettlementError::LockError)?;
        Ok(map.values().cloned().collect())
    }

    fn park(
        &self,
        contract_id: &ContractId,
        payment_id: &PaymentId,
    ) -> Result<SettlementDisposition, SettlementError> {
        let mut map = self.parked.write().map_err(|_| SettlementError::LockError)?;
        map.entry(contract_id.clone())
            .or_insert_with(|| ParkedSettlement {
                contract_id: contract_id.clone(),
                payment_id: payment_id.clone(),
                parked_at: Utc::now(),
            });
        warn!(contract_id = %contract_id, payment_id = %payment_id, "Capture parked behind open dispute");
        Ok(SettlementDisposition::Parked)
    }

    fn unpark(&self, contract_id: &ContractId) -> Result<(), SettlementError> {
        let mut map = self.parked.write().map_err(|_| SettlementError::LockError)?;
        map.remove(contract_id);
        Ok(())
    }
}

/// Settlement coordination errors.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Dispute(#[from] DisputeError),

    #[error("settlement cancelled")]
    Cancelled,

    #[error("internal lock poisoned")]
    LockError,
}
