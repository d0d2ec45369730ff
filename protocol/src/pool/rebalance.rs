//! Minting and forced rebalancing operations of [`StvPool`].
//!
//! All of these fail with [`LedgerError::MintingNotSupported`] on a plain
//! pool, except the position views, which report zero.

use tracing::{debug, info, warn};

use super::{ensure_not_reserved, StvPool};
use crate::access::Capability;
use crate::account::AccountId;
use crate::config::{VaultParameters, TOTAL_BASIS_POINTS};
use crate::error::LedgerError;
use crate::events::{
    LedgerEvent, LiabilitySharesBurned, LiabilitySharesMinted, LiabilitySharesRebalanced,
    MaxLossSocializationSet, SocializedLoss, VaultParametersUpdated,
};
use crate::external::Snapshot;
use crate::minting::{ForceRebalancePreview, MintForm};
use crate::rate::{mul_div, Rounding};

impl StvPool {
    // -----------------------------------------------------------------------
    // Mint & burn
    // -----------------------------------------------------------------------

    /// Mints `shares` of liability against the caller's pool position and
    /// credits the same number of tokens in `form`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ZeroAmount`], [`LedgerError::MintingNotSupported`],
    /// [`LedgerError::InsufficientMintingCapacity`].
    pub fn mint_liability_shares(
        &mut self,
        caller: &AccountId,
        shares: u128,
        form: MintForm,
        snapshot: &Snapshot,
    ) -> Result<LiabilitySharesMinted, LedgerError> {
        if shares == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        ensure_not_reserved(caller)?;

        let engine = self.engine()?;
        let mintable = engine.mintable_liability_shares(caller, &self.ledger, &snapshot.share_rate)?;
        if shares > mintable {
            return Err(LedgerError::InsufficientMintingCapacity {
                account: caller.clone(),
                mintable,
                requested: shares,
            });
        }
        let tokens = self.engine_mut()?.mint(caller, shares, form)?;

        debug!(account = %caller, shares = %shares, %form, "liability minted");
        let minted = LiabilitySharesMinted {
            account: caller.clone(),
            shares,
            form,
            tokens,
        };
        self.record(LedgerEvent::LiabilitySharesMinted(minted.clone()));
        Ok(minted)
    }

    /// Burns `tokens` of `form` held by the caller and repays the liability
    /// they represent.
    pub fn burn_liability_shares(
        &mut self,
        caller: &AccountId,
        tokens: u128,
        form: MintForm,
        snapshot: &Snapshot,
    ) -> Result<LiabilitySharesBurned, LedgerError> {
        if tokens == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let shares = self
            .engine_mut()?
            .burn(caller, tokens, form, &snapshot.share_rate)?;

        debug!(account = %caller, shares = %shares, tokens = %tokens, %form, "liability burned");
        let burned = LiabilitySharesBurned {
            account: caller.clone(),
            shares,
            form,
            tokens,
        };
        self.record(LedgerEvent::LiabilitySharesBurned(burned.clone()));
        Ok(burned)
    }

    // -----------------------------------------------------------------------
    // Forced rebalance
    // -----------------------------------------------------------------------

    /// What [`force_rebalance`](Self::force_rebalance) or the
    /// loss-socializing variant would do to `account` right now. The
    /// withdrawal queue's escrow is never rebalanced.
    pub fn preview_force_rebalance(
        &self,
        account: &AccountId,
        snapshot: &Snapshot,
    ) -> Result<ForceRebalancePreview, LedgerError> {
        let engine = self.engine()?;
        if account.as_str() == AccountId::WITHDRAWAL_QUEUE {
            return Ok(ForceRebalancePreview::default());
        }
        Ok(engine.preview_force_rebalance(
            account,
            &self.ledger,
            &snapshot.share_rate,
            snapshot.available_balance,
        )?)
    }

    /// Brings a breached position back to the reserve ratio by burning its
    /// pool shares and settling liability from vault liquidity. Anyone may
    /// call it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BadDebt`], [`LedgerError::Undercollateralized`],
    /// [`LedgerError::NothingToRebalance`].
    pub fn force_rebalance(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        snapshot: &Snapshot,
    ) -> Result<LiabilitySharesRebalanced, LedgerError> {
        let (rebalanced, _) = self.execute_force_rebalance(caller, account, snapshot, false)?;
        Ok(rebalanced)
    }

    /// Rebalances an undercollateralized position as far as its shares go
    /// and spreads the rest over every holder, within the configured cap.
    /// Returns the [`SocializedLoss`] when there was one.
    ///
    /// # Errors
    ///
    /// [`LedgerError::MissingCapability`] without `SocializeLoss`;
    /// [`LedgerError::NotUndercollateralized`];
    /// [`LedgerError::ExcessiveLossSocialization`] above the cap; the
    /// errors of [`force_rebalance`](Self::force_rebalance).
    pub fn force_rebalance_and_socialize_loss(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        snapshot: &Snapshot,
    ) -> Result<(LiabilitySharesRebalanced, Option<SocializedLoss>), LedgerError> {
        self.access.require(caller, Capability::SocializeLoss)?;
        self.execute_force_rebalance(caller, account, snapshot, true)
    }

    fn execute_force_rebalance(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        snapshot: &Snapshot,
        socialize: bool,
    ) -> Result<(LiabilitySharesRebalanced, Option<SocializedLoss>), LedgerError> {
        // escrowed shares belong to queued requests
        ensure_not_reserved(account)?;
        let rate = snapshot.share_rate;
        let engine = self.engine()?;
        engine.ensure_no_bad_debt(snapshot.total_value, &rate)?;
        let max_loss_bp = engine.max_loss_socialization_bp();

        let preview = engine.preview_force_rebalance(
            account,
            &self.ledger,
            &rate,
            snapshot.available_balance,
        )?;
        match (preview.is_undercollateralized, socialize) {
            (true, false) => return Err(LedgerError::Undercollateralized(account.clone())),
            (false, true) => return Err(LedgerError::NotUndercollateralized(account.clone())),
            _ => {}
        }
        if preview.is_noop() {
            return Err(LedgerError::NothingToRebalance(account.clone()));
        }

        let assets = rate.assets_for_shares_round_up(preview.liability_shares)?;

        let mut socialized = None;
        if socialize {
            let required = self.ledger.preview_withdraw(assets)?;
            if required > preview.stv {
                let shortfall = required - preview.stv;
                let shortfall_bp = mul_div(shortfall, TOTAL_BASIS_POINTS, required, Rounding::Up)?;
                if shortfall_bp > max_loss_bp {
                    return Err(LedgerError::ExcessiveLossSocialization {
                        shortfall_bp,
                        max_bp: max_loss_bp,
                    });
                }
                socialized = Some(SocializedLoss {
                    account: account.clone(),
                    stv: shortfall,
                    // priced before the rebalance moves the rate
                    assets: self.ledger.preview_redeem(shortfall)?,
                    max_loss_socialization_bp: max_loss_bp,
                });
            }
        }

        self.ledger.burn(account, preview.stv, assets)?;
        self.engine_mut()?.settle(account, preview.liability_shares)?;

        info!(
            account = %account,
            liability_shares = %preview.liability_shares,
            stv_burned = %preview.stv,
            assets = %assets,
            "position force-rebalanced"
        );
        let rebalanced = LiabilitySharesRebalanced {
            caller: caller.clone(),
            account: account.clone(),
            liability_shares: preview.liability_shares,
            stv_burned: preview.stv,
            assets,
        };
        self.record(LedgerEvent::LiabilitySharesRebalanced(rebalanced.clone()));

        if let Some(loss) = &socialized {
            warn!(
                account = %account,
                stv = %loss.stv,
                assets = %loss.assets,
                "loss socialized"
            );
            self.record(LedgerEvent::SocializedLoss(loss.clone()));
        }
        Ok((rebalanced, socialized))
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    /// Adopts vault-level risk parameters; the pool applies its gap on top.
    pub fn sync_vault_parameters(
        &mut self,
        vault: VaultParameters,
    ) -> Result<VaultParametersUpdated, LedgerError> {
        let pool = self.engine_mut()?.sync_vault_parameters(vault)?;

        info!(
            reserve_ratio_bp = %pool.reserve_ratio_bp,
            forced_rebalance_threshold_bp = %pool.forced_rebalance_threshold_bp,
            "vault parameters synced"
        );
        let updated = VaultParametersUpdated { vault, pool };
        self.record(LedgerEvent::VaultParametersUpdated(updated.clone()));
        Ok(updated)
    }

    pub fn set_max_loss_socialization_bp(
        &mut self,
        caller: &AccountId,
        bp: u128,
    ) -> Result<MaxLossSocializationSet, LedgerError> {
        self.access.require(caller, Capability::Admin)?;
        self.engine_mut()?.set_max_loss_socialization_bp(bp)?;

        let set = MaxLossSocializationSet {
            caller: caller.clone(),
            max_loss_socialization_bp: bp,
        };
        self.record(LedgerEvent::MaxLossSocializationSet(set.clone()));
        Ok(set)
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn minted_liability_shares_of(&self, account: &AccountId) -> u128 {
        self.minting
            .as_ref()
            .map_or(0, |engine| engine.minted_liability_shares_of(account))
    }

    pub fn liability_tokens_of(&self, account: &AccountId, form: MintForm) -> u128 {
        self.minting
            .as_ref()
            .map_or(0, |engine| engine.position(account).tokens(form))
    }

    pub fn mintable_liability_shares(
        &self,
        account: &AccountId,
        snapshot: &Snapshot,
    ) -> Result<u128, LedgerError> {
        Ok(self
            .engine()?
            .mintable_liability_shares(account, &self.ledger, &snapshot.share_rate)?)
    }

    pub fn total_minted_liability_shares(&self) -> u128 {
        self.minting
            .as_ref()
            .map_or(0, |engine| engine.total_minted_liability_shares())
    }

    pub fn total_liability_shares(&self) -> u128 {
        self.minting
            .as_ref()
            .map_or(0, |engine| engine.total_liability_shares())
    }

    pub fn total_unassigned_liability_shares(&self) -> u128 {
        self.minting
            .as_ref()
            .map_or(0, |engine| engine.total_unassigned_liability_shares())
    }

    pub fn total_exceeding_minted_liability_shares(&self) -> u128 {
        self.minting
            .as_ref()
            .map_or(0, |engine| engine.total_exceeding_minted_liability_shares())
    }

    pub fn reserve_ratio_bp(&self) -> Result<u128, LedgerError> {
        Ok(self.engine()?.reserve_ratio_bp())
    }

    pub fn forced_rebalance_threshold_bp(&self) -> Result<u128, LedgerError> {
        Ok(self.engine()?.forced_rebalance_threshold_bp())
    }

    pub fn max_loss_socialization_bp(&self) -> Result<u128, LedgerError> {
        Ok(self.engine()?.max_loss_socialization_bp())
    }

    pub fn calc_liability_shares_to_mint_for_assets(
        &self,
        assets: u128,
        snapshot: &Snapshot,
    ) -> Result<u128, LedgerError> {
        Ok(self
            .engine()?
            .liability_shares_to_mint_for_assets(assets, &snapshot.share_rate)?)
    }

    pub fn calc_assets_to_lock_for_liability_shares(
        &self,
        shares: u128,
        snapshot: &Snapshot,
    ) -> Result<u128, LedgerError> {
        Ok(self
            .engine()?
            .assets_to_lock_for_liability_shares(shares, &snapshot.share_rate)?)
    }

    pub fn calc_stv_to_lock_for_liability_shares(
        &self,
        shares: u128,
        snapshot: &Snapshot,
    ) -> Result<u128, LedgerError> {
        Ok(self
            .engine()?
            .stv_to_lock_for_liability_shares(shares, &snapshot.share_rate, &self.ledger)?)
    }
}
