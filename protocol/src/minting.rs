//! # Collateralized Minting
//!
//! Holders may mint liability shares against the value of their pool
//! position, up to a reserve ratio. Minted liability is tracked per account
//! ([`Position`]) and, in lockstep, at the vault level.
//!
//! ## Limits
//!
//! All parameters are in basis points of collateral value. With `RR` the
//! pool reserve ratio and `FT` the forced rebalance threshold
//! (`FT < RR < 10_000`):
//!
//! ```text
//! mintable   = shares_for(assets_of * (BP - RR) / BP) - minted
//! lock       = ceil(ceil_value(minted) * BP / (BP - RR))      in assets
//! breached   = assets_of < ceil(ceil_value(minted) * BP / (BP - FT))
//! ```
//!
//! A breached position can be force-rebalanced by anyone: pool shares are
//! burned and liability is settled from vault liquidity until the position
//! is back at `RR`. A position worth less than its liability is
//! undercollateralized; only the loss socializer may rebalance it, and the
//! part it cannot cover is borne by every holder.
//!
//! Liability tokens exist in two forms. Unwrapped tokens are counted in
//! shares. Wrapped tokens are non-rebasing; burning them unwraps through
//! the asset value, which can lose a share to rounding.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::config::{MintingConfig, VaultParameters, TOTAL_BASIS_POINTS};
use crate::error::LedgerError;
use crate::external::ShareRate;
use crate::ledger::Ledger;
use crate::rate::{self, mul_div, MathError, Rounding};

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Form of the liability token handed out on mint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MintForm {
    /// Share-denominated rebasing token.
    Unwrapped,
    /// Non-rebasing wrapper.
    Wrapped,
}

impl fmt::Display for MintForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MintForm::Unwrapped => write!(f, "unwrapped"),
            MintForm::Wrapped => write!(f, "wrapped"),
        }
    }
}

/// Minted liability and liability tokens held by one account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub minted_liability_shares: u128,
    pub unwrapped_tokens: u128,
    pub wrapped_tokens: u128,
}

impl Position {
    pub fn tokens(&self, form: MintForm) -> u128 {
        match form {
            MintForm::Unwrapped => self.unwrapped_tokens,
            MintForm::Wrapped => self.wrapped_tokens,
        }
    }

    fn tokens_mut(&mut self, form: MintForm) -> &mut u128 {
        match form {
            MintForm::Unwrapped => &mut self.unwrapped_tokens,
            MintForm::Wrapped => &mut self.wrapped_tokens,
        }
    }

    fn is_empty(&self) -> bool {
        self.minted_liability_shares == 0 && self.unwrapped_tokens == 0 && self.wrapped_tokens == 0
    }
}

/// Result of a forced-rebalance preview.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceRebalancePreview {
    /// Liability shares that would be settled.
    pub liability_shares: u128,
    /// Pool shares that would be burned from the account.
    pub stv: u128,
    /// The account's value is below its liability.
    pub is_undercollateralized: bool,
}

impl ForceRebalancePreview {
    pub fn is_noop(&self) -> bool {
        self.liability_shares == 0 && self.stv == 0
    }
}

// ---------------------------------------------------------------------------
// MintingEngine
// ---------------------------------------------------------------------------

/// Positions, vault liability and the risk parameters they are held to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MintingEngine {
    reserve_ratio_gap_bp: u128,
    vault: VaultParameters,
    params: VaultParameters,
    max_loss_socialization_bp: u128,
    positions: BTreeMap<AccountId, Position>,
    total_minted_liability_shares: u128,
    total_liability_shares: u128,
}

impl MintingEngine {
    /// Creates an engine with no positions.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidParameters`] if the gapped parameters are
    /// inconsistent.
    pub fn new(config: &MintingConfig, max_loss_socialization_bp: u128) -> Result<Self, LedgerError> {
        let params = config.vault.with_gap(config.reserve_ratio_gap_bp)?;
        Ok(Self {
            reserve_ratio_gap_bp: config.reserve_ratio_gap_bp,
            vault: config.vault,
            params,
            max_loss_socialization_bp,
            positions: BTreeMap::new(),
            total_minted_liability_shares: 0,
            total_liability_shares: 0,
        })
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    pub fn reserve_ratio_bp(&self) -> u128 {
        self.params.reserve_ratio_bp
    }

    pub fn forced_rebalance_threshold_bp(&self) -> u128 {
        self.params.forced_rebalance_threshold_bp
    }

    /// Parameters in force for the pool: vault values plus the gap.
    pub fn parameters(&self) -> VaultParameters {
        self.params
    }

    pub fn vault_parameters(&self) -> VaultParameters {
        self.vault
    }

    pub fn max_loss_socialization_bp(&self) -> u128 {
        self.max_loss_socialization_bp
    }

    /// Adopts new vault-level parameters. Returns the pool parameters now
    /// in force.
    pub fn sync_vault_parameters(&mut self, vault: VaultParameters) -> Result<VaultParameters, LedgerError> {
        let params = vault.with_gap(self.reserve_ratio_gap_bp)?;
        self.vault = vault;
        self.params = params;
        Ok(params)
    }

    pub fn set_max_loss_socialization_bp(&mut self, bp: u128) -> Result<(), LedgerError> {
        if bp > TOTAL_BASIS_POINTS {
            return Err(LedgerError::InvalidParameters(format!(
                "max loss socialization {bp} bp exceeds {TOTAL_BASIS_POINTS}"
            )));
        }
        self.max_loss_socialization_bp = bp;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn position(&self, account: &AccountId) -> Position {
        self.positions.get(account).copied().unwrap_or_default()
    }

    pub fn minted_liability_shares_of(&self, account: &AccountId) -> u128 {
        self.position(account).minted_liability_shares
    }

    pub fn positions(&self) -> impl Iterator<Item = (&AccountId, &Position)> {
        self.positions.iter()
    }

    pub fn total_minted_liability_shares(&self) -> u128 {
        self.total_minted_liability_shares
    }

    pub fn total_liability_shares(&self) -> u128 {
        self.total_liability_shares
    }

    /// Vault liability not attributed to any position.
    pub fn total_unassigned_liability_shares(&self) -> u128 {
        self.total_liability_shares
            .saturating_sub(self.total_minted_liability_shares)
    }

    /// Attributed liability the vault no longer carries.
    pub fn total_exceeding_minted_liability_shares(&self) -> u128 {
        self.total_minted_liability_shares
            .saturating_sub(self.total_liability_shares)
    }

    // -----------------------------------------------------------------------
    // Capacity & locks
    // -----------------------------------------------------------------------

    /// Liability shares a position worth `assets` may carry in total.
    pub fn liability_shares_to_mint_for_assets(
        &self,
        assets: u128,
        rate: &ShareRate,
    ) -> Result<u128, MathError> {
        let mintable_value = mul_div(
            assets,
            TOTAL_BASIS_POINTS - self.reserve_ratio_bp(),
            TOTAL_BASIS_POINTS,
            Rounding::Down,
        )?;
        rate.shares_for_assets(mintable_value)
    }

    /// Assets that must stay in a position carrying `shares` of liability.
    pub fn assets_to_lock_for_liability_shares(
        &self,
        shares: u128,
        rate: &ShareRate,
    ) -> Result<u128, MathError> {
        if shares == 0 {
            return Ok(0);
        }
        mul_div(
            rate.assets_for_shares_round_up(shares)?,
            TOTAL_BASIS_POINTS,
            TOTAL_BASIS_POINTS - self.reserve_ratio_bp(),
            Rounding::Up,
        )
    }

    /// Pool shares that must stay in a position carrying `shares` of
    /// liability.
    pub fn stv_to_lock_for_liability_shares(
        &self,
        shares: u128,
        rate: &ShareRate,
        ledger: &Ledger,
    ) -> Result<u128, MathError> {
        let assets = self.assets_to_lock_for_liability_shares(shares, rate)?;
        if assets == 0 {
            return Ok(0);
        }
        ledger.preview_withdraw(assets)
    }

    /// Further liability `account` may mint right now.
    pub fn mintable_liability_shares(
        &self,
        account: &AccountId,
        ledger: &Ledger,
        rate: &ShareRate,
    ) -> Result<u128, MathError> {
        let capacity = self.liability_shares_to_mint_for_assets(ledger.assets_of(account)?, rate)?;
        Ok(capacity.saturating_sub(self.minted_liability_shares_of(account)))
    }

    /// Pool shares of `account` not needed to back `minted` liability.
    pub fn unlocked_stv(
        &self,
        account: &AccountId,
        minted: u128,
        ledger: &Ledger,
        rate: &ShareRate,
    ) -> Result<u128, MathError> {
        let locked = self.stv_to_lock_for_liability_shares(minted, rate, ledger)?;
        Ok(ledger.balance_of(account).saturating_sub(locked))
    }

    /// Fails with [`LedgerError::BadDebt`] when the backing, in liability
    /// shares, is below the vault liability.
    pub fn ensure_no_bad_debt(&self, total_value: u128, rate: &ShareRate) -> Result<(), LedgerError> {
        if self.total_liability_shares == 0 {
            return Ok(());
        }
        let collateral_shares = rate.shares_for_assets(total_value)?;
        if collateral_shares < self.total_liability_shares {
            return Err(LedgerError::BadDebt {
                collateral_shares,
                liability_shares: self.total_liability_shares,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Forced rebalance
    // -----------------------------------------------------------------------

    /// Computes what a forced rebalance of `account` would do.
    ///
    /// `available_balance` is the vault liquidity the settlement may draw
    /// on, on top of any exceeding attributed liability.
    pub fn preview_force_rebalance(
        &self,
        account: &AccountId,
        ledger: &Ledger,
        rate: &ShareRate,
        available_balance: u128,
    ) -> Result<ForceRebalancePreview, MathError> {
        let minted = self.minted_liability_shares_of(account);
        if minted == 0 {
            return Ok(ForceRebalancePreview::default());
        }

        let value = ledger.assets_of(account)?;
        let liability = rate.assets_for_shares_round_up(minted)?;
        let threshold_value = mul_div(
            liability,
            TOTAL_BASIS_POINTS,
            TOTAL_BASIS_POINTS - self.forced_rebalance_threshold_bp(),
            Rounding::Up,
        )?;
        if value >= threshold_value {
            return Ok(ForceRebalancePreview::default());
        }

        // Value to settle so that the position lands exactly on the
        // reserve ratio.
        let reserve_ratio_bp = self.reserve_ratio_bp();
        let required = liability
            .checked_mul(TOTAL_BASIS_POINTS)
            .ok_or(MathError::Overflow)?;
        let covered = value
            .checked_mul(TOTAL_BASIS_POINTS - reserve_ratio_bp)
            .ok_or(MathError::Overflow)?;
        let mut target = required.saturating_sub(covered) / reserve_ratio_bp;

        let mut is_undercollateralized = false;
        if target > liability {
            target = liability;
            is_undercollateralized = true;
        }

        let exceeding_value =
            rate.assets_for_shares(self.total_exceeding_minted_liability_shares())?;
        let capacity = rate::add(exceeding_value, available_balance)?;
        let settle_value = target.min(capacity);

        // The ceiling on `liability` can round back up past `minted` when a
        // share is worth less than one asset unit.
        let liability_shares = rate.shares_for_assets(settle_value)?.min(minted);
        let stv = ledger.preview_withdraw(settle_value)?.min(ledger.balance_of(account));

        Ok(ForceRebalancePreview {
            liability_shares,
            stv,
            is_undercollateralized,
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Adds `shares` of liability to the position and hands out the same
    /// number of tokens in `form`. Capacity is checked by the caller.
    /// Returns the tokens credited.
    pub fn mint(&mut self, account: &AccountId, shares: u128, form: MintForm) -> Result<u128, LedgerError> {
        let mut position = self.position(account);
        position.minted_liability_shares = rate::add(position.minted_liability_shares, shares)?;
        *position.tokens_mut(form) = rate::add(position.tokens(form), shares)?;
        let total_minted = rate::add(self.total_minted_liability_shares, shares)?;
        let total_liability = rate::add(self.total_liability_shares, shares)?;

        self.positions.insert(account.clone(), position);
        self.total_minted_liability_shares = total_minted;
        self.total_liability_shares = total_liability;
        Ok(shares)
    }

    /// Burns `tokens` of `form` held by the account and removes the
    /// liability they represent. Returns the liability shares removed.
    pub fn burn(
        &mut self,
        account: &AccountId,
        tokens: u128,
        form: MintForm,
        rate: &ShareRate,
    ) -> Result<u128, LedgerError> {
        let mut position = self.position(account);
        let held = position.tokens(form);
        if held < tokens {
            return Err(LedgerError::InsufficientLiabilityTokens {
                account: account.clone(),
                held,
                requested: tokens,
            });
        }

        let shares = match form {
            MintForm::Unwrapped => tokens,
            MintForm::Wrapped => rate.shares_for_assets(rate.assets_for_shares(tokens)?)?,
        };
        *position.tokens_mut(form) = held - tokens;
        position.minted_liability_shares =
            self.checked_release(account, position.minted_liability_shares, shares)?;
        let (total_minted, total_liability) = self.released_totals(shares)?;

        self.store(account, position);
        self.total_minted_liability_shares = total_minted;
        self.total_liability_shares = total_liability;
        Ok(shares)
    }

    /// Removes `shares` of liability from the position without touching its
    /// tokens: the vault settled it from its own assets.
    pub fn settle(&mut self, account: &AccountId, shares: u128) -> Result<(), LedgerError> {
        let mut position = self.position(account);
        position.minted_liability_shares =
            self.checked_release(account, position.minted_liability_shares, shares)?;
        let (total_minted, total_liability) = self.released_totals(shares)?;

        self.store(account, position);
        self.total_minted_liability_shares = total_minted;
        self.total_liability_shares = total_liability;
        Ok(())
    }

    /// Reassigns `shares` of minted liability between positions. Tokens
    /// stay where they are.
    pub fn move_liability(&mut self, from: &AccountId, to: &AccountId, shares: u128) -> Result<(), LedgerError> {
        if shares == 0 || from == to {
            return Ok(());
        }
        let mut source = self.position(from);
        let mut target = self.position(to);
        source.minted_liability_shares =
            self.checked_release(from, source.minted_liability_shares, shares)?;
        target.minted_liability_shares = rate::add(target.minted_liability_shares, shares)?;

        self.store(from, source);
        self.store(to, target);
        Ok(())
    }

    fn checked_release(&self, account: &AccountId, minted: u128, shares: u128) -> Result<u128, LedgerError> {
        minted
            .checked_sub(shares)
            .ok_or_else(|| LedgerError::InsufficientMintedShares {
                account: account.clone(),
                minted,
                requested: shares,
            })
    }

    fn released_totals(&self, shares: u128) -> Result<(u128, u128), MathError> {
        Ok((
            rate::sub(self.total_minted_liability_shares, shares)?,
            rate::sub(self.total_liability_shares, shares)?,
        ))
    }

    fn store(&mut self, account: &AccountId, position: Position) {
        if position.is_empty() {
            self.positions.remove(account);
        } else {
            self.positions.insert(account.clone(), position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH: u128 = 1_000_000_000_000_000_000;

    fn alice() -> AccountId {
        AccountId::from("alice")
    }

    fn engine() -> MintingEngine {
        // RR 2000 bp, FT 1900 bp
        MintingEngine::new(&MintingConfig::default(), TOTAL_BASIS_POINTS).unwrap()
    }

    fn ledger_with(account: &AccountId, assets: u128) -> Ledger {
        let mut ledger = Ledger::new();
        let stv = ledger.preview_deposit(assets).unwrap();
        ledger.mint(account, stv, assets).unwrap();
        ledger
    }

    #[test]
    fn capacity_leaves_reserve_unminted() {
        let engine = engine();
        let rate = ShareRate::par();
        assert_eq!(
            engine.liability_shares_to_mint_for_assets(10 * ETH, &rate).unwrap(),
            8 * ETH
        );
        assert_eq!(
            engine.assets_to_lock_for_liability_shares(8 * ETH, &rate).unwrap(),
            10 * ETH
        );
    }

    #[test]
    fn lock_rounds_up() {
        let engine = engine();
        let rate = ShareRate {
            total_pooled_assets: 3,
            total_shares: 2,
        };
        // ceil(1.5) = 2 assets of liability, ceil(2 * 10000 / 8000) = 3
        assert_eq!(engine.assets_to_lock_for_liability_shares(1, &rate).unwrap(), 3);
    }

    #[test]
    fn mint_and_burn_track_totals() {
        let mut engine = engine();
        let rate = ShareRate::par();
        engine.mint(&alice(), 5, MintForm::Unwrapped).unwrap();
        engine.mint(&alice(), 3, MintForm::Wrapped).unwrap();
        assert_eq!(engine.minted_liability_shares_of(&alice()), 8);
        assert_eq!(engine.total_liability_shares(), 8);

        assert_eq!(engine.burn(&alice(), 3, MintForm::Wrapped, &rate).unwrap(), 3);
        assert_eq!(engine.total_minted_liability_shares(), 5);
        assert_eq!(engine.total_unassigned_liability_shares(), 0);
        assert_eq!(engine.total_exceeding_minted_liability_shares(), 0);

        let err = engine.burn(&alice(), 6, MintForm::Unwrapped, &rate).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientLiabilityTokens { held: 5, .. }));
    }

    #[test]
    fn wrapped_burn_may_lose_a_share_to_rounding() {
        let mut engine = engine();
        let rate = ShareRate {
            total_pooled_assets: 3,
            total_shares: 2,
        };
        engine.mint(&alice(), 3, MintForm::Wrapped).unwrap();
        // 3 shares -> 4 assets (floor 4.5) -> 2 shares (floor 2.67)
        assert_eq!(engine.burn(&alice(), 3, MintForm::Wrapped, &rate).unwrap(), 2);
        assert_eq!(engine.minted_liability_shares_of(&alice()), 1);
        assert_eq!(engine.position(&alice()).wrapped_tokens, 0);
    }

    #[test]
    fn healthy_position_previews_nothing() {
        let mut engine = engine();
        let ledger = ledger_with(&alice(), 10 * ETH);
        engine.mint(&alice(), 8 * ETH, MintForm::Unwrapped).unwrap();
        let preview = engine
            .preview_force_rebalance(&alice(), &ledger, &ShareRate::par(), u128::MAX)
            .unwrap();
        assert!(preview.is_noop());
        assert!(!preview.is_undercollateralized);
    }

    #[test]
    fn breached_position_rebalances_back_to_reserve_ratio() {
        let mut engine = engine();
        let ledger = ledger_with(&alice(), 10 * ETH);
        engine.mint(&alice(), 8 * ETH, MintForm::Unwrapped).unwrap();
        // Liability appreciates 10%: 8.8 vs 10 value, threshold 8.8/0.81 = 10.86
        let rate = ShareRate {
            total_pooled_assets: 11,
            total_shares: 10,
        };
        let preview = engine
            .preview_force_rebalance(&alice(), &ledger, &rate, u128::MAX)
            .unwrap();
        assert!(!preview.is_undercollateralized);
        // target = (8.8 * 10000 - 8000 * 10) / 2000 = 4 assets
        assert_eq!(preview.liability_shares, rate.shares_for_assets(4 * ETH).unwrap());
        assert_eq!(preview.stv, ledger.preview_withdraw(4 * ETH).unwrap());
    }

    #[test]
    fn underwater_position_is_capped_at_liability() {
        let mut engine = engine();
        let ledger = ledger_with(&alice(), 10 * ETH);
        engine.mint(&alice(), 8 * ETH, MintForm::Unwrapped).unwrap();
        let rate = ShareRate {
            total_pooled_assets: 2,
            total_shares: 1,
        };
        let preview = engine
            .preview_force_rebalance(&alice(), &ledger, &rate, u128::MAX)
            .unwrap();
        assert!(preview.is_undercollateralized);
        assert_eq!(preview.liability_shares, 8 * ETH);
        assert_eq!(preview.stv, ledger.balance_of(&alice()));
    }

    #[test]
    fn no_liquidity_means_nothing_to_settle() {
        let mut engine = engine();
        let ledger = ledger_with(&alice(), 10 * ETH);
        engine.mint(&alice(), 8 * ETH, MintForm::Unwrapped).unwrap();
        let rate = ShareRate {
            total_pooled_assets: 2,
            total_shares: 1,
        };
        let preview = engine.preview_force_rebalance(&alice(), &ledger, &rate, 0).unwrap();
        assert!(preview.is_undercollateralized);
        assert!(preview.is_noop());
    }

    #[test]
    fn bad_debt_detected() {
        let mut engine = engine();
        engine.mint(&alice(), 10, MintForm::Unwrapped).unwrap();
        assert!(engine.ensure_no_bad_debt(10, &ShareRate::par()).is_ok());
        assert!(matches!(
            engine.ensure_no_bad_debt(9, &ShareRate::par()),
            Err(LedgerError::BadDebt { .. })
        ));
    }

    #[test]
    fn parameters_sync_with_gap() {
        let mut engine = engine();
        let params = engine
            .sync_vault_parameters(VaultParameters {
                reserve_ratio_bp: 500,
                forced_rebalance_threshold_bp: 400,
            })
            .unwrap();
        assert_eq!(params.reserve_ratio_bp, 1_500);
        assert_eq!(engine.forced_rebalance_threshold_bp(), 1_400);
        assert!(engine.set_max_loss_socialization_bp(10_001).is_err());
    }
}
