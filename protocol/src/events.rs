//! # Ledger Records
//!
//! Every successful mutating operation returns a typed payload and appends
//! the same payload, wrapped in [`LedgerEvent`], to the pool journal.
//! Failed operations record nothing.
//!
//! Records serialize externally tagged (`{"deposited": {...}}`) so that
//! 128-bit amounts survive a JSON round-trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::Capability;
use crate::account::AccountId;
use crate::config::VaultParameters;
use crate::minting::MintForm;
use crate::queue::StopReason;

// ---------------------------------------------------------------------------
// Vault Ledger
// ---------------------------------------------------------------------------

/// Assets deposited, pool shares minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposited {
    pub sender: AccountId,
    pub recipient: AccountId,
    pub referral: Option<AccountId>,
    pub assets: u128,
    pub stv: u128,
}

/// Pool shares moved between holders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: AccountId,
    pub to: AccountId,
    pub stv: u128,
}

/// Rewards (positive `delta`) or a slash (negative `delta`) applied to the
/// asset backing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsAccrued {
    pub delta: i128,
    /// Backing after the adjustment.
    pub total_assets: u128,
}

// ---------------------------------------------------------------------------
// Withdrawal Queue
// ---------------------------------------------------------------------------

/// A withdrawal request was queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequested {
    pub request_id: u64,
    pub caller: AccountId,
    pub owner: AccountId,
    pub stv: u128,
    pub liability_shares: u128,
    /// Value of `stv` at request time.
    pub assets: u128,
    pub queued_at: DateTime<Utc>,
}

/// A contiguous batch of requests was finalized under a new checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalsFinalized {
    pub from_id: u64,
    pub to_id: u64,
    pub checkpoint_index: u64,
    pub stv_rate: u128,
    pub liability_share_rate: u128,
    /// Assets set aside for the owners to claim.
    pub assets_locked: u128,
    /// Assets paid to the vault to settle co-rebalanced liability.
    pub assets_rebalanced: u128,
    /// Gas cost coverage paid to `gas_cost_coverage_recipient`.
    pub gas_cost_coverage: u128,
    pub gas_cost_coverage_recipient: AccountId,
    /// Escrowed shares burned against claims.
    pub stv_burned: u128,
    /// Escrowed shares burned against rebalanced liability.
    pub stv_rebalanced: u128,
    pub liability_shares_rebalanced: u128,
    /// Why the batch ended where it did.
    pub stop: StopReason,
    pub finalized_at: DateTime<Utc>,
}

/// A finalized request was paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalClaimed {
    pub request_id: u64,
    pub owner: AccountId,
    pub recipient: AccountId,
    pub assets: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasCostCoverageSet {
    pub caller: AccountId,
    pub coverage: u128,
}

// ---------------------------------------------------------------------------
// Minting
// ---------------------------------------------------------------------------

/// Liability minted against a pool position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiabilitySharesMinted {
    pub account: AccountId,
    pub shares: u128,
    pub form: MintForm,
    /// Tokens credited in `form`.
    pub tokens: u128,
}

/// Liability repaid by burning held tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiabilitySharesBurned {
    pub account: AccountId,
    /// Liability shares removed from the position.
    pub shares: u128,
    pub form: MintForm,
    /// Tokens debited in `form`.
    pub tokens: u128,
}

/// A position was force-rebalanced: pool shares burned, liability settled
/// from vault liquidity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiabilitySharesRebalanced {
    pub caller: AccountId,
    pub account: AccountId,
    pub liability_shares: u128,
    pub stv_burned: u128,
    /// Assets paid out of the vault to settle the liability.
    pub assets: u128,
}

/// The part of a forced rebalance the account could not cover, borne by
/// every holder through reduced backing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocializedLoss {
    pub account: AccountId,
    /// Shares that would have had to be burned on top of the account's.
    pub stv: u128,
    /// Asset value of `stv` at pre-rebalance pricing.
    pub assets: u128,
    pub max_loss_socialization_bp: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultParametersUpdated {
    /// Parameters reported for the vault.
    pub vault: VaultParameters,
    /// Parameters in force for the pool (vault plus gap).
    pub pool: VaultParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxLossSocializationSet {
    pub caller: AccountId,
    pub max_loss_socialization_bp: u128,
}

// ---------------------------------------------------------------------------
// Administration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChanged {
    pub admin: AccountId,
    pub account: AccountId,
    pub capability: Capability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistUpdated {
    pub admin: AccountId,
    pub account: AccountId,
    pub allowed: bool,
}

// ---------------------------------------------------------------------------
// LedgerEvent
// ---------------------------------------------------------------------------

/// Journal entry: one per successful mutating operation, plus a
/// [`SocializedLoss`] after a rebalance that needed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Deposited(Deposited),
    Transfer(Transfer),
    RewardsAccrued(RewardsAccrued),
    WithdrawalRequested(WithdrawalRequested),
    WithdrawalsFinalized(WithdrawalsFinalized),
    WithdrawalClaimed(WithdrawalClaimed),
    GasCostCoverageSet(GasCostCoverageSet),
    LiabilitySharesMinted(LiabilitySharesMinted),
    LiabilitySharesBurned(LiabilitySharesBurned),
    LiabilitySharesRebalanced(LiabilitySharesRebalanced),
    SocializedLoss(SocializedLoss),
    VaultParametersUpdated(VaultParametersUpdated),
    MaxLossSocializationSet(MaxLossSocializationSet),
    RoleGranted(RoleChanged),
    RoleRevoked(RoleChanged),
    AllowlistUpdated(AllowlistUpdated),
}

impl LedgerEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::Deposited(_) => "deposited",
            LedgerEvent::Transfer(_) => "transfer",
            LedgerEvent::RewardsAccrued(_) => "rewards_accrued",
            LedgerEvent::WithdrawalRequested(_) => "withdrawal_requested",
            LedgerEvent::WithdrawalsFinalized(_) => "withdrawals_finalized",
            LedgerEvent::WithdrawalClaimed(_) => "withdrawal_claimed",
            LedgerEvent::GasCostCoverageSet(_) => "gas_cost_coverage_set",
            LedgerEvent::LiabilitySharesMinted(_) => "liability_shares_minted",
            LedgerEvent::LiabilitySharesBurned(_) => "liability_shares_burned",
            LedgerEvent::LiabilitySharesRebalanced(_) => "liability_shares_rebalanced",
            LedgerEvent::SocializedLoss(_) => "socialized_loss",
            LedgerEvent::VaultParametersUpdated(_) => "vault_parameters_updated",
            LedgerEvent::MaxLossSocializationSet(_) => "max_loss_socialization_set",
            LedgerEvent::RoleGranted(_) => "role_granted",
            LedgerEvent::RoleRevoked(_) => "role_revoked",
            LedgerEvent::AllowlistUpdated(_) => "allowlist_updated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_amounts_survive_json() {
        let event = LedgerEvent::Deposited(Deposited {
            sender: AccountId::from("alice"),
            recipient: AccountId::from("alice"),
            referral: None,
            assets: 1_000_000_000_000_000_000,
            stv: 1_000_000_000_000_000_000_000_000_000,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.starts_with(r#"{"deposited":"#));

        let back: LedgerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.name(), "deposited");
    }
}
