//! # Pool Configuration & Constants
//!
//! Every magic number of the accounting engine lives here. Precision bases
//! and limits are compile-time constants; everything a pool operator may
//! tune at creation time is in [`PoolConfig`].

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

// ---------------------------------------------------------------------------
// Precision
// ---------------------------------------------------------------------------

/// Precision base of liability-share rates (assets per liability share).
pub const E27: u128 = 1_000_000_000_000_000_000_000_000_000;

/// Precision base of stv rates (assets per pool share).
pub const E36: u128 = 1_000_000_000_000_000_000_000_000_000_000_000_000;

/// Denominator for every basis-point parameter. 1 bp = 0.01%.
pub const TOTAL_BASIS_POINTS: u128 = 10_000;

/// Pool shares carry 27 decimals against 18 for the asset, so an empty pool
/// mints `10^9` shares per asset unit.
pub const STV_PER_ASSET_AT_SEED: u128 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Withdrawal Queue Limits
// ---------------------------------------------------------------------------

/// Smallest asset value a single withdrawal request may be worth (0.001 of
/// an 18-decimal asset). Keeps dust requests out of the FIFO.
pub const MIN_WITHDRAWAL_ASSETS: u128 = 1_000_000_000_000_000;

/// Default minimum age of a request before it can be finalized: one day.
pub const DEFAULT_MIN_WITHDRAWAL_DELAY_SECS: u64 = 24 * 60 * 60;

/// Ceiling for the flat per-request gas cost coverage fee.
pub const MAX_GAS_COST_COVERAGE: u128 = 500_000_000_000_000;

// ---------------------------------------------------------------------------
// Minting Defaults
// ---------------------------------------------------------------------------

/// Vault-level reserve ratio assumed until the first parameter sync.
pub const DEFAULT_VAULT_RESERVE_RATIO_BP: u128 = 1_000;

/// Vault-level forced rebalance threshold assumed until the first sync.
pub const DEFAULT_VAULT_FORCED_REBALANCE_THRESHOLD_BP: u128 = 900;

/// Extra reserve the pool keeps on top of the vault-level parameters.
pub const DEFAULT_RESERVE_RATIO_GAP_BP: u128 = 1_000;

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Reserve parameters reported for the backing vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultParameters {
    /// Share of collateral value that must stay unminted.
    pub reserve_ratio_bp: u128,
    /// Collateral ratio below which a position may be force-rebalanced.
    pub forced_rebalance_threshold_bp: u128,
}

impl Default for VaultParameters {
    fn default() -> Self {
        Self {
            reserve_ratio_bp: DEFAULT_VAULT_RESERVE_RATIO_BP,
            forced_rebalance_threshold_bp: DEFAULT_VAULT_FORCED_REBALANCE_THRESHOLD_BP,
        }
    }
}

impl VaultParameters {
    /// Adds the pool's reserve gap on top of these vault-level values.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidParameters`] unless
    /// `threshold < reserve < TOTAL_BASIS_POINTS` after the gap is applied.
    pub fn with_gap(&self, gap_bp: u128) -> Result<VaultParameters, LedgerError> {
        let reserve_ratio_bp = self.reserve_ratio_bp.saturating_add(gap_bp);
        let forced_rebalance_threshold_bp =
            self.forced_rebalance_threshold_bp.saturating_add(gap_bp);

        if reserve_ratio_bp >= TOTAL_BASIS_POINTS {
            return Err(LedgerError::InvalidParameters(format!(
                "reserve ratio {reserve_ratio_bp} bp must be below {TOTAL_BASIS_POINTS}"
            )));
        }
        if forced_rebalance_threshold_bp >= reserve_ratio_bp {
            return Err(LedgerError::InvalidParameters(format!(
                "forced rebalance threshold {forced_rebalance_threshold_bp} bp must be below reserve ratio {reserve_ratio_bp} bp"
            )));
        }

        Ok(VaultParameters {
            reserve_ratio_bp,
            forced_rebalance_threshold_bp,
        })
    }
}

/// Settings of the minting-capable pool variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintingConfig {
    /// Reserve added on top of the vault parameters.
    pub reserve_ratio_gap_bp: u128,
    /// Vault parameters in force at pool creation.
    pub vault: VaultParameters,
}

impl Default for MintingConfig {
    fn default() -> Self {
        Self {
            reserve_ratio_gap_bp: DEFAULT_RESERVE_RATIO_GAP_BP,
            vault: VaultParameters::default(),
        }
    }
}

/// Pool creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum age of a request before finalization.
    pub min_withdrawal_delay_secs: u64,
    /// Initial flat fee withheld from each finalized request.
    pub gas_cost_coverage: u128,
    /// Restrict deposits to allowlisted senders.
    pub allowlist_enabled: bool,
    /// Upper bound on the socialized share of a forced rebalance.
    pub max_loss_socialization_bp: u128,
    /// `Some` for the minting-capable variant.
    pub minting: Option<MintingConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_withdrawal_delay_secs: DEFAULT_MIN_WITHDRAWAL_DELAY_SECS,
            gas_cost_coverage: 0,
            allowlist_enabled: false,
            max_loss_socialization_bp: 0,
            minting: None,
        }
    }
}

impl PoolConfig {
    /// Default configuration of the minting-capable variant.
    pub fn with_minting() -> Self {
        Self {
            minting: Some(MintingConfig::default()),
            ..Self::default()
        }
    }

    /// Rejects inconsistent parameters.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.gas_cost_coverage > MAX_GAS_COST_COVERAGE {
            return Err(LedgerError::GasCostCoverageTooLarge {
                requested: self.gas_cost_coverage,
                max: MAX_GAS_COST_COVERAGE,
            });
        }
        if self.max_loss_socialization_bp > TOTAL_BASIS_POINTS {
            return Err(LedgerError::InvalidParameters(format!(
                "max loss socialization {} bp exceeds {TOTAL_BASIS_POINTS}",
                self.max_loss_socialization_bp
            )));
        }
        if let Some(minting) = &self.minting {
            minting.vault.with_gap(minting.reserve_ratio_gap_bp)?;
        }
        Ok(())
    }
}
