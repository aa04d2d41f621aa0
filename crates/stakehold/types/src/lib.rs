//! Stakehold Types - shared domain model for the commitment escrow engine
//!
//! All monetary amounts are integer minor currency units (øre), never
//! floats. Currency handling beyond a single unit is out of scope.

#![deny(unsafe_code)]

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque user identifier supplied by the external identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);
impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! generated_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);
        impl $name {
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

generated_id!(ContractId);
generated_id!(CheckInId);
generated_id!(PaymentId);
generated_id!(DisputeId);
generated_id!(LedgerEntryId);
generated_id!(PayoutRequestId);

/// A geographic coordinate in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Lifecycle status of a commitment contract.
///
/// Transitions are monotonic: `Draft -> Active -> {Completed, Cancelled}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl ContractStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Terminal outcome requested when ending a contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractOutcome {
    Completed,
    Cancelled,
}

impl ContractOutcome {
    pub fn as_status(&self) -> ContractStatus {
        match self {
            Self::Completed => ContractStatus::Completed,
            Self::Cancelled => ContractStatus::Cancelled,
        }
    }
}

/// Why a presence session produced no evidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    LocationPermissionDenied,
    LocationUnavailable,
}

/// The evidence attached to a check-in by the presence session that
/// produced it. Not re-derivable later; recorded verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// A session that obtained at least one position fix.
    Verified {
        anchor: GeoPoint,
        /// How long the session actually dwelled before finishing.
        dwell: Duration,
        /// False when the geofence was breached or sampling broke off early.
        presence_held: bool,
        selfie_required: bool,
        selfie_captured: bool,
    },
    /// Deliberate fallback: the check-in carries no presence evidence.
    Unverified { reason: DegradedReason },
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

/// A single check-in recorded against an active contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: CheckInId,
    pub contract_id: ContractId,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub verification: VerificationOutcome,
}

/// A commitment contract: a stake held against a self-imposed goal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub owner: UserId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Stake in øre. Always > 0.
    pub stake_ore: i64,
    pub target_date: NaiveDate,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Creation order. Newest-first is a presentation concern.
    pub check_ins: Vec<CheckIn>,
}

/// Final nanosecond of `date`, UTC.
pub fn end_of_day_utc(date: NaiveDate) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
        .expect("23:59:59.999999999 is a valid time of day");
    date.and_time(last).and_utc()
}

impl Contract {
    /// Last instant at which a check-in is still inside the contract
    /// window. The target date is a calendar date, so the window closes
    /// at the final nanosecond of that date (UTC).
    pub fn window_end(&self) -> DateTime<Utc> {
        end_of_day_utc(self.target_date)
    }
}

/// How a payment authorization was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationKind {
    /// A real hold placed with the external processor.
    Processor,
    /// Offline/dev fallback with a locally generated intent id.
    Stub,
}

/// Payment lifecycle.
///
/// `Pending -> RequiresAction -> Authorized -> Captured`,
/// `Authorized -> Canceled`, `Pending|RequiresAction -> Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    RequiresAction,
    Authorized,
    Captured,
    Canceled,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Captured | Self::Canceled | Self::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    ApplePay,
    Vipps,
}

/// The escrow hold backing a contract's stake. One authorization per
/// contract; the escrow ledger is the only writer of `status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub contract_id: ContractId,
    /// Who staked the money. Debited when the stake is captured.
    pub payer: UserId,
    /// Opaque processor intent id; `stub_` prefixed in degraded mode.
    pub intent_id: String,
    pub kind: AuthorizationKind,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub amount_ore: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Resolved,
}

/// A dispute freezing settlement for its contract while open.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub contract_id: ContractId,
    pub raised_by: UserId,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub status: DisputeStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Why a wallet ledger entry was appended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    /// Credit to the beneficiary when a stake is captured.
    StakeCaptured,
    /// Debit from the payer when a stake is captured.
    StakeForfeited,
    /// Debit when a payout request is approved.
    PayoutApproved,
}

/// A signed wallet movement. Balances are sums over entries, recomputed
/// on read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: LedgerEntryId,
    pub user: UserId,
    pub amount_ore: i64,
    pub reason: EntryReason,
    pub recorded_at: DateTime<Utc>,
}

/// Typed event emitted by the contract state machine and consumed by the
/// settlement coordinator. Explicit message passing; no listener wiring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContractEvent {
    Activated {
        contract_id: ContractId,
        owner: UserId,
        stake_ore: i64,
        target_date: NaiveDate,
    },
    Ended {
        contract_id: ContractId,
        outcome: ContractOutcome,
    },
}

/// Typed event emitted by the dispute gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DisputeEvent {
    Opened { contract_id: ContractId },
    Resolved { contract_id: ContractId },
}

/// Fire-and-forget hint for the external notification scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReminderHint {
    pub user: UserId,
    pub contract_id: ContractId,
    pub title: String,
    pub remind_on: NaiveDate,
}

/// Fire-and-forget hint naming when settlement for a contract is due.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettlementHint {
    pub contract_id: ContractId,
    pub settle_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_end_is_last_instant_of_target_date() {
        let contract = Contract {
            id: ContractId::generate(),
            owner: UserId::new("u1"),
            title: "Train".to_string(),
            description: None,
            stake_ore: 5000,
            target_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            status: ContractStatus::Active,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            check_ins: vec![],
        };

        let end = contract.window_end();
        let next_day = Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap();
        assert!(end < next_day);
        assert!(end > Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 59).unwrap());
        assert_eq!(end, end_of_day_utc(contract.target_date));
        assert_eq!(end.timestamp_subsec_nanos(), 999_999_999);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ContractStatus::Active.is_terminal());
        assert!(ContractStatus::Completed.is_terminal());
        assert!(ContractStatus::Cancelled.is_terminal());
        assert!(PaymentStatus::Captured.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Authorized.is_terminal());
    }

    #[test]
    fn outcome_maps_to_status() {
        assert_eq!(
            ContractOutcome::Completed.as_status(),
            ContractStatus::Completed
        );
        assert_eq!(
            ContractOutcome::Cancelled.as_status(),
            ContractStatus::Cancelled
        );
    }
}
