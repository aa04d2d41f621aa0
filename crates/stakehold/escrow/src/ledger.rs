//! The escrow ledger: payment state machine and settlement bookkeeping.
//!
//! Transitions are strictly one-directional:
//!
//! `Pending -> RequiresAction -> Authorized -> Captured`
//! `Authorized -> Canceled`
//! `Pending | RequiresAction -> Failed`
//!
//! Nothing transitions out of `Captured`, `Canceled` or `Failed`.

use chrono::{DateTime, Utc};
use stakehold_types::{
    AuthorizationKind, ContractId, EntryReason, Payment, PaymentId, PaymentMethod, PaymentStatus,
    UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EscrowConfig;
use crate::processor::{PaymentProcessor, ProcessorError, ProcessorEvent, ProcessorEventKind};
use crate::wallet::WalletLedger;

/// Synchronous dispute check consulted as the last gate inside `capture`.
/// Never memoized earlier; a dispute opened right before capture must be
/// seen.
pub trait CaptureGate: Send + Sync {
    fn has_open_dispute(&self, contract_id: &ContractId) -> bool;
}

/// Gate for contexts without dispute tracking (dev tooling, tests).
pub struct NoDisputes;

impl CaptureGate for NoDisputes {
    fn has_open_dispute(&self, _contract_id: &ContractId) -> bool {
        false
    }
}

/// A successful authorization: the recorded payment plus the client
/// confirmation token, when the processor issued one.
#[derive(Clone, Debug)]
pub struct Authorization {
    pub payment: Payment,
    pub client_token: Option<String>,
}

/// Owns every payment and the wallet ledger; the only writer of
/// `Payment.status`.
pub struct EscrowLedger {
    payments: RwLock<HashMap<PaymentId, Payment>>,
    contract_index: RwLock<HashMap<ContractId, Vec<PaymentId>>>,
    processed_events: RwLock<HashSet<String>>,
    processor: Arc<dyn PaymentProcessor>,
    config: EscrowConfig,
    wallet: WalletLedger,
}

impl EscrowLedger {
    pub fn new(processor: Arc<dyn PaymentProcessor>, config: EscrowConfig) -> Self {
        Self {
            payments: RwLock::new(HashMap::new()),
            contract_index: RwLock::new(HashMap::new()),
            processed_events: RwLock::new(HashSet::new()),
            processor,
            config,
            wallet: WalletLedger::new(),
        }
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn wallet(&self) -> &WalletLedger {
        &self.wallet
    }

    /// Request a hold for the contract's stake from the processor.
    ///
    /// The amount must equal the contract's stake; the caller owns that
    /// pairing. A transient processor outage leaves the payment
    /// `Pending` and surfaces `ProcessorUnavailable`; retrying the call
    /// resumes the same payment. A rejection fails the payment; a later
    /// retry starts a fresh one. The contract itself is never demoted
    /// by a failed authorization.
    pub async fn authorize(
        &self,
        contract_id: &ContractId,
        payer: &UserId,
        amount_ore: i64,
        method: PaymentMethod,
    ) -> Result<Authorization, EscrowError> {
        let payment_id = self.open_pending(contract_id, payer, amount_ore, method)?;

        match self
            .processor
            .create_hold(amount_ore, &self.config.currency, method)
            .await
        {
            Ok(hold) => {
                let payment = self.apply(&payment_id, |p| {
                    p.intent_id = hold.hold_id.clone();
                    p.status = PaymentStatus::RequiresAction;
                })?;
                info!(
                    payment_id = %payment_id,
                    contract_id = %contract_id,
                    amount_ore,
                    "Hold requested, awaiting confirmation"
                );
                Ok(Authorization {
                    payment,
                    client_token: Some(hold.client_token),
                })
            }
            Err(ProcessorError::Rejected(reason)) => {
                self.apply(&payment_id, |p| {
                    p.status = PaymentStatus::Failed;
                    p.processed_at = Some(Utc::now());
                })?;
                warn!(payment_id = %payment_id, %reason, "Authorization rejected");
                Err(EscrowError::ProcessorRejected(reason))
            }
            Err(ProcessorError::Unavailable(reason)) => {
                // Payment stays Pending; the caller retries with backoff.
                warn!(payment_id = %payment_id, %reason, "Processor unreachable during authorize");
                Err(EscrowError::ProcessorUnavailable(reason))
            }
        }
    }

    /// Degraded authorization for offline/dev operation: the payment is
    /// recorded directly as `Authorized` with a locally generated intent
    /// id and `Stub` kind, so captures against it stay distinguishable.
    /// Only for use when the processor is unreachable.
    pub fn authorize_stub(
        &self,
        contract_id: &ContractId,
        payer: &UserId,
        amount_ore: i64,
        method: PaymentMethod,
    ) -> Result<Payment, EscrowError> {
        let payment_id = self.open_pending(contract_id, payer, amount_ore, method)?;
        let intent_id = format!("stub_{}_{}", contract_id, Utc::now().timestamp_millis());
        let payment = self.apply(&payment_id, |p| {
            p.kind = AuthorizationKind::Stub;
            p.intent_id = intent_id.clone();
            p.status = PaymentStatus::Authorized;
        })?;
        info!(
            payment_id = %payment_id,
            contract_id = %contract_id,
            intent_id = %payment.intent_id,
            "Stub authorization recorded"
        );
        Ok(payment)
    }

    /// `RequiresAction -> Authorized`, once the hold is fully placed.
    pub fn confirm(&self, payment_id: &PaymentId) -> Result<Payment, EscrowError> {
        let payment = self.transition(payment_id, PaymentStatus::RequiresAction, |p| {
            p.status = PaymentStatus::Authorized;
            p.processed_at = Some(Utc::now());
        })?;
        info!(payment_id = %payment_id, "Hold confirmed, payment authorized");
        Ok(payment)
    }

    /// Fail authorizations that sat in `RequiresAction` longer than the
    /// confirmation timeout. Returns the payments that were failed.
    pub fn expire_stale_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentId>, EscrowError> {
        let timeout = chrono::Duration::from_std(self.config.confirm_timeout)
            .map_err(|e| EscrowError::InvalidInput(e.to_string()))?;
        let mut payments = self.payments.write().map_err(|_| EscrowError::LockError)?;
        let mut expired = Vec::new();
        for payment in payments.values_mut() {
            if payment.status == PaymentStatus::RequiresAction
                && payment.created_at + timeout <= now
            {
                payment.status = PaymentStatus::Failed;
                payment.processed_at = Some(now);
                warn!(payment_id = %payment.id, "Confirmation timed out, payment failed");
                expired.push(payment.id.clone());
            }
        }
        Ok(expired)
    }

    /// Ingest an asynchronous processor notification, idempotently.
    /// Replays of the same `event_id` are no-ops; so are events for
    /// payments already past the affected state. Returns whether a
    /// transition was applied.
    pub fn ingest_processor_event(&self, event: &ProcessorEvent) -> Result<bool, EscrowError> {
        {
            let processed = self
                .processed_events
                .read()
                .map_err(|_| EscrowError::LockError)?;
            if processed.contains(&event.event_id) {
                return Ok(false);
            }
        }

        let mut payments = self.payments.write().map_err(|_| EscrowError::LockError)?;
        let payment = payments
            .values_mut()
            .find(|p| p.intent_id == event.intent_id);
        let Some(payment) = payment else {
            // Left unconsumed so the processor's redelivery of this
            // event still lands once the intent is on record.
            warn!(intent_id = %event.intent_id, "Processor event for unknown intent");
            return Ok(false);
        };

        self.processed_events
            .write()
            .map_err(|_| EscrowError::LockError)?
            .insert(event.event_id.clone());

        let applied = match event.kind {
            ProcessorEventKind::HoldConfirmed
                if payment.status == PaymentStatus::RequiresAction =>
            {
                payment.status = PaymentStatus::Authorized;
                payment.processed_at = Some(Utc::now());
                true
            }
            ProcessorEventKind::HoldFailed
                if matches!(
                    payment.status,
                    PaymentStatus::Pending | PaymentStatus::RequiresAction
                ) =>
            {
                payment.status = PaymentStatus::Failed;
                payment.processed_at = Some(Utc::now());
                true
            }
            _ => false,
        };
        if applied {
            info!(
                payment_id = %payment.id,
                kind = ?event.kind,
                "Processor event applied"
            );
        }
        Ok(applied)
    }

    /// Capture an authorized hold: funds move to the beneficiary.
    ///
    /// The dispute gate is consulted last, immediately before the
    /// processor call; an open dispute blocks with no state change.
    /// On success the wallet receives the debit/credit pair.
    pub async fn capture(
        &self,
        payment_id: &PaymentId,
        gate: &dyn CaptureGate,
    ) -> Result<Payment, EscrowError> {
        let snapshot = self.expect_status(payment_id, PaymentStatus::Authorized)?;

        if gate.has_open_dispute(&snapshot.contract_id) {
            info!(
                payment_id = %payment_id,
                contract_id = %snapshot.contract_id,
                "Capture blocked by open dispute"
            );
            return Err(EscrowError::Blocked(snapshot.contract_id));
        }

        if snapshot.kind == AuthorizationKind::Processor {
            self.processor.capture(&snapshot.intent_id).await?;
        }

        let payment = self.transition(payment_id, PaymentStatus::Authorized, |p| {
            p.status = PaymentStatus::Captured;
            p.processed_at = Some(Utc::now());
        })?;

        self.wallet.append(
            payment.payer.clone(),
            -payment.amount_ore,
            EntryReason::StakeForfeited,
        )?;
        self.wallet.append(
            self.config.beneficiary.clone(),
            payment.amount_ore,
            EntryReason::StakeCaptured,
        )?;

        info!(
            payment_id = %payment_id,
            amount_ore = payment.amount_ore,
            beneficiary = %self.config.beneficiary,
            stub = payment.kind == AuthorizationKind::Stub,
            "Stake captured"
        );
        Ok(payment)
    }

    /// Release an authorized hold back to the payer. Permitted even when
    /// a dispute is open: returning money is the safe default.
    pub async fn cancel(&self, payment_id: &PaymentId) -> Result<Payment, EscrowError> {
        let snapshot = self.expect_status(payment_id, PaymentStatus::Authorized)?;

        if snapshot.kind == AuthorizationKind::Processor {
            self.processor.release(&snapshot.intent_id).await?;
        }

        let payment = self.transition(payment_id, PaymentStatus::Authorized, |p| {
            p.status = PaymentStatus::Canceled;
            p.processed_at = Some(Utc::now());
        })?;
        info!(payment_id = %payment_id, "Hold released back to payer");
        Ok(payment)
    }

    pub fn get(&self, payment_id: &PaymentId) -> Result<Option<Payment>, EscrowError> {
        let payments = self.payments.read().map_err(|_| EscrowError::LockError)?;
        Ok(payments.get(payment_id).cloned())
    }

    /// The latest payment recorded for a contract.
    pub fn payment_for_contract(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<Payment>, EscrowError> {
        let payments = self.payments.read().map_err(|_| EscrowError::LockError)?;
        let index = self
            .contract_index
            .read()
            .map_err(|_| EscrowError::LockError)?;
        Ok(index
            .get(contract_id)
            .and_then(|ids| ids.last())
            .and_then(|id| payments.get(id))
            .cloned())
    }

    /// Record (or resume) the pending payment for a contract.
    ///
    /// One live authorization per contract: an existing `Pending`
    /// payment (left behind by an outage) is resumed, a `Failed` one is
    /// superseded by a fresh attempt, anything else rejects the call.
    fn open_pending(
        &self,
        contract_id: &ContractId,
        payer: &UserId,
        amount_ore: i64,
        method: PaymentMethod,
    ) -> Result<PaymentId, EscrowError> {
        if amount_ore <= 0 {
            return Err(EscrowError::InvalidInput(format!(
                "hold amount must be positive, got {amount_ore} øre"
            )));
        }

        let mut payments = self.payments.write().map_err(|_| EscrowError::LockError)?;
        let mut index = self
            .contract_index
            .write()
            .map_err(|_| EscrowError::LockError)?;

        if let Some(existing) = index
            .get(contract_id)
            .and_then(|ids| ids.last())
            .and_then(|id| payments.get(id))
        {
            match existing.status {
                PaymentStatus::Pending => return Ok(existing.id.clone()),
                PaymentStatus::Failed => {}
                _ => return Err(EscrowError::AlreadyAuthorized(contract_id.clone())),
            }
        }

        let now = Utc::now();
        let payment = Payment {
            id: PaymentId::generate(),
            contract_id: contract_id.clone(),
            payer: payer.clone(),
            intent_id: String::new(),
            kind: AuthorizationKind::Processor,
            status: PaymentStatus::Pending,
            method,
            amount_ore,
            created_at: now,
            processed_at: None,
        };
        let payment_id = payment.id.clone();
        index
            .entry(contract_id.clone())
            .or_default()
            .push(payment_id.clone());
        payments.insert(payment_id.clone(), payment);
        Ok(payment_id)
    }

    /// Apply a mutation after re-checking the expected source status
    /// under the write lock.
    fn transition(
        &self,
        payment_id: &PaymentId,
        expected: PaymentStatus,
        mutate: impl FnOnce(&mut Payment),
    ) -> Result<Payment, EscrowError> {
        let mut payments = self.payments.write().map_err(|_| EscrowError::LockError)?;
        let payment = payments
            .get_mut(payment_id)
            .ok_or_else(|| EscrowError::NotFound(payment_id.0.clone()))?;
        if payment.status != expected {
            return Err(EscrowError::InvalidTransition {
                payment_id: payment_id.0.clone(),
                from: payment.status,
            });
        }
        mutate(payment);
        Ok(payment.clone())
    }

    /// Unconditional mutation of a freshly opened payment.
    fn apply(
        &self,
        payment_id: &PaymentId,
        mutate: impl FnOnce(&mut Payment),
    ) -> Result<Payment, EscrowError> {
        let mut payments = self.payments.write().map_err(|_| EscrowError::LockError)?;
        let payment = payments
            .get_mut(payment_id)
            .ok_or_else(|| EscrowError::NotFound(payment_id.0.clone()))?;
        mutate(payment);
        Ok(payment.clone())
    }

    fn expect_status(
        &self,
        payment_id: &PaymentId,
        expected: PaymentStatus,
    ) -> Result<Payment, EscrowError> {
        let payments = self.payments.read().map_err(|_| EscrowError::LockError)?;
        let payment = payments
            .get(payment_id)
            .ok_or_else(|| EscrowError::NotFound(payment_id.0.clone()))?;
        if payment.status != expected {
            return Err(EscrowError::InvalidTransition {
                payment_id: payment_id.0.clone(),
                from: payment.status,
            });
        }
        Ok(payment.clone())
    }
}

/// Escrow ledger errors.
#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payment {payment_id} cannot transition from {from:?}")]
    InvalidTransition {
        payment_id: String,
        from: PaymentStatus,
    },

    #[error("capture blocked: contract {0} has an open dispute")]
    Blocked(ContractId),

    #[error("contract {0} already has a live authorization")]
    AlreadyAuthorized(ContractId),

    #[error("payment processor unavailable: {0}")]
    ProcessorUnavailable(String),

    #[error("payment processor rejected the request: {0}")]
    ProcessorRejected(String),

    #[error("payout of {requested_ore} øre exceeds balance of {balance_ore} øre")]
    InsufficientBalance {
        requested_ore: i64,
        balance_ore: i64,
    },

    #[error("lock error")]
    LockError,
}

impl From<ProcessorError> for EscrowError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Unavailable(reason) => EscrowError::ProcessorUnavailable(reason),
            ProcessorError::Rejected(reason) => EscrowError::ProcessorRejected(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Hold, InMemoryProcessor};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Processor whose `create_hold` answers follow a script.
    struct ScriptedProcessor {
        script: Mutex<VecDeque<Result<Hold, ProcessorError>>>,
    }

    impl ScriptedProcessor {
        fn new(script: Vec<Result<Hold, ProcessorError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }

        fn ok_hold(id: &str) -> Result<Hold, ProcessorError> {
            Ok(Hold {
                hold_id: id.to_string(),
                client_token: format!("{id}_secret"),
            })
        }
    }

    #[async_trait]
    impl PaymentProcessor for ScriptedProcessor {
        async fn create_hold(
            &self,
            _amount_ore: i64,
            _currency: &str,
            _method: PaymentMethod,
        ) -> Result<Hold, ProcessorError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Self::ok_hold("pi_default"))
        }

        async fn capture(&self, _hold_id: &str) -> Result<(), ProcessorError> {
            Ok(())
        }

        async fn release(&self, _hold_id: &str) -> Result<(), ProcessorError> {
            Ok(())
        }
    }

    struct OpenDispute;
    impl CaptureGate for OpenDispute {
        fn has_open_dispute(&self, _contract_id: &ContractId) -> bool {
            true
        }
    }

    fn ledger() -> EscrowLedger {
        EscrowLedger::new(
            Arc::new(InMemoryProcessor::new()),
            EscrowConfig::with_beneficiary(UserId::new("platform")),
        )
    }

    fn payer() -> UserId {
        UserId::new("payer-1")
    }

    async fn authorized_payment(ledger: &EscrowLedger, contract_id: &ContractId) -> Payment {
        let auth = ledger
            .authorize(contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap();
        ledger.confirm(&auth.payment.id).unwrap()
    }

    #[tokio::test]
    async fn authorize_places_hold_and_awaits_action() {
        let ledger = ledger();
        let contract_id = ContractId::generate();

        let auth = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap();

        assert_eq!(auth.payment.status, PaymentStatus::RequiresAction);
        assert_eq!(auth.payment.kind, AuthorizationKind::Processor);
        assert!(auth.client_token.is_some());
        assert!(!auth.payment.intent_id.is_empty());
    }

    #[tokio::test]
    async fn rejection_fails_payment_and_retry_opens_a_new_one() {
        let processor = ScriptedProcessor::new(vec![
            Err(ProcessorError::Rejected("card declined".to_string())),
            ScriptedProcessor::ok_hold("pi_retry"),
        ]);
        let ledger = EscrowLedger::new(Arc::new(processor), EscrowConfig::default());
        let contract_id = ContractId::generate();

        let err = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::ProcessorRejected(_)));
        let failed = ledger.payment_for_contract(&contract_id).unwrap().unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);

        // Payment is solicited separately and may be retried.
        let auth = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap();
        assert_ne!(auth.payment.id, failed.id);
        assert_eq!(auth.payment.status, PaymentStatus::RequiresAction);
    }

    #[tokio::test]
    async fn outage_keeps_payment_pending_and_retry_resumes_it() {
        let processor = ScriptedProcessor::new(vec![
            Err(ProcessorError::Unavailable("timeout".to_string())),
            ScriptedProcessor::ok_hold("pi_after_outage"),
        ]);
        let ledger = EscrowLedger::new(Arc::new(processor), EscrowConfig::default());
        let contract_id = ContractId::generate();

        let err = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Vipps)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::ProcessorUnavailable(_)));
        let pending = ledger.payment_for_contract(&contract_id).unwrap().unwrap();
        assert_eq!(pending.status, PaymentStatus::Pending);

        let auth = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Vipps)
            .await
            .unwrap();
        assert_eq!(auth.payment.id, pending.id);
        assert_eq!(auth.payment.intent_id, "pi_after_outage");
    }

    #[tokio::test]
    async fn second_live_authorization_is_rejected() {
        let ledger = ledger();
        let contract_id = ContractId::generate();
        ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap();

        assert!(matches!(
            ledger
                .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
                .await,
            Err(EscrowError::AlreadyAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn confirm_then_capture_appends_wallet_pair() {
        let ledger = ledger();
        let contract_id = ContractId::generate();
        let payment = authorized_payment(&ledger, &contract_id).await;
        assert_eq!(payment.status, PaymentStatus::Authorized);

        let captured = ledger.capture(&payment.id, &NoDisputes).await.unwrap();
        assert_eq!(captured.status, PaymentStatus::Captured);
        assert!(captured.processed_at.is_some());

        assert_eq!(
            ledger.wallet().balance(&UserId::new("platform")).unwrap(),
            5000
        );
        assert_eq!(ledger.wallet().balance(&payer()).unwrap(), -5000);
    }

    #[tokio::test]
    async fn capture_is_blocked_by_open_dispute() {
        let ledger = ledger();
        let contract_id = ContractId::generate();
        let payment = authorized_payment(&ledger, &contract_id).await;

        let err = ledger.capture(&payment.id, &OpenDispute).await.unwrap_err();
        assert!(matches!(err, EscrowError::Blocked(_)));

        // No state change, no wallet movement.
        let payment = ledger.get(&payment.id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Authorized);
        assert_eq!(
            ledger.wallet().balance(&UserId::new("platform")).unwrap(),
            0
        );

        // After the dispute clears, capture succeeds.
        let captured = ledger.capture(&payment.id, &NoDisputes).await.unwrap();
        assert_eq!(captured.status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn cancel_is_permitted_despite_open_dispute() {
        let ledger = ledger();
        let contract_id = ContractId::generate();
        let payment = authorized_payment(&ledger, &contract_id).await;

        // cancel never consults the gate.
        let canceled = ledger.cancel(&payment.id).await.unwrap();
        assert_eq!(canceled.status, PaymentStatus::Canceled);
    }

    #[tokio::test]
    async fn no_transition_leaves_a_terminal_state() {
        let ledger = ledger();
        let contract_id = ContractId::generate();
        let payment = authorized_payment(&ledger, &contract_id).await;
        ledger.cancel(&payment.id).await.unwrap();

        assert!(matches!(
            ledger.capture(&payment.id, &NoDisputes).await,
            Err(EscrowError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ledger.confirm(&payment.id),
            Err(EscrowError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn stub_authorization_is_authorized_and_tagged() {
        let ledger = ledger();
        let contract_id = ContractId::generate();

        let payment = ledger
            .authorize_stub(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Authorized);
        assert_eq!(payment.kind, AuthorizationKind::Stub);
        assert!(payment.intent_id.starts_with("stub_"));

        // Capture of a stub hold skips the processor entirely.
        let captured = ledger.capture(&payment.id, &NoDisputes).await.unwrap();
        assert_eq!(captured.status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn processor_events_apply_once() {
        let ledger = ledger();
        let contract_id = ContractId::generate();
        let auth = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap();

        let event = ProcessorEvent {
            event_id: "evt_1".to_string(),
            intent_id: auth.payment.intent_id.clone(),
            kind: ProcessorEventKind::HoldConfirmed,
        };
        assert!(ledger.ingest_processor_event(&event).unwrap());
        assert_eq!(
            ledger.get(&auth.payment.id).unwrap().unwrap().status,
            PaymentStatus::Authorized
        );

        // Replay with the same delivery id: no-op.
        assert!(!ledger.ingest_processor_event(&event).unwrap());

        // New delivery id, but the transition is already applied: no-op.
        let replay = ProcessorEvent {
            event_id: "evt_2".to_string(),
            ..event
        };
        assert!(!ledger.ingest_processor_event(&replay).unwrap());
    }

    #[tokio::test]
    async fn event_ahead_of_authorization_survives_redelivery() {
        let processor = ScriptedProcessor::new(vec![ScriptedProcessor::ok_hold("pi_early")]);
        let ledger = EscrowLedger::new(
            Arc::new(processor),
            EscrowConfig::with_beneficiary(UserId::new("platform")),
        );
        let contract_id = ContractId::generate();

        // Webhook delivery races ahead of the authorization landing.
        let event = ProcessorEvent {
            event_id: "evt_early".to_string(),
            intent_id: "pi_early".to_string(),
            kind: ProcessorEventKind::HoldConfirmed,
        };
        assert!(!ledger.ingest_processor_event(&event).unwrap());

        let auth = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap();
        assert_eq!(auth.payment.status, PaymentStatus::RequiresAction);

        // The processor redelivers the same event; it must still apply.
        assert!(ledger.ingest_processor_event(&event).unwrap());
        assert_eq!(
            ledger.get(&auth.payment.id).unwrap().unwrap().status,
            PaymentStatus::Authorized
        );
        assert!(!ledger.ingest_processor_event(&event).unwrap());
    }

    #[tokio::test]
    async fn hold_failed_event_fails_the_payment() {
        let ledger = ledger();
        let contract_id = ContractId::generate();
        let auth = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap();

        let event = ProcessorEvent {
            event_id: "evt_fail".to_string(),
            intent_id: auth.payment.intent_id.clone(),
            kind: ProcessorEventKind::HoldFailed,
        };
        assert!(ledger.ingest_processor_event(&event).unwrap());
        assert_eq!(
            ledger.get(&auth.payment.id).unwrap().unwrap().status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn stale_confirmations_expire() {
        let ledger = ledger();
        let contract_id = ContractId::generate();
        let auth = ledger
            .authorize(&contract_id, &payer(), 5000, PaymentMethod::Card)
            .await
            .unwrap();

        // Not yet stale.
        let expired = ledger.expire_stale_confirmations(Utc::now()).unwrap();
        assert!(expired.is_empty());

        let later = Utc::now() + chrono::Duration::minutes(10);
        let expired = ledger.expire_stale_confirmations(later).unwrap();
        assert_eq!(expired, vec![auth.payment.id.clone()]);
        assert_eq!(
            ledger.get(&auth.payment.id).unwrap().unwrap().status,
            PaymentStatus::Failed
        );
    }
}
