//! Escrow configuration.

use serde::{Deserialize, Serialize};
use stakehold_types::UserId;
use std::time::Duration;

/// Configuration for the escrow ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// ISO currency code for holds. Single-currency by design.
    pub currency: String,

    /// Who receives captured stakes (platform or charity account).
    pub beneficiary: UserId,

    /// How long an authorization may sit in `RequiresAction` before the
    /// confirmation sweep fails it.
    pub confirm_timeout: Duration,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            currency: "nok".to_string(),
            beneficiary: UserId::new("beneficiary"),
            confirm_timeout: Duration::from_secs(180),
        }
    }
}

impl EscrowConfig {
    pub fn with_beneficiary(beneficiary: UserId) -> Self {
        Self {
            beneficiary,
            ..Self::default()
        }
    }
}
