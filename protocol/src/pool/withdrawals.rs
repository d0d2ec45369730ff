//! Withdrawal queue operations of [`StvPool`].

use tracing::{debug, info, warn};

use super::{ensure_not_reserved, StvPool};
use crate::access::Capability;
use crate::account::AccountId;
use crate::config::{MAX_GAS_COST_COVERAGE, MIN_WITHDRAWAL_ASSETS};
use crate::error::LedgerError;
use crate::events::{GasCostCoverageSet, LedgerEvent, WithdrawalClaimed, WithdrawalRequested, WithdrawalsFinalized};
use crate::external::Snapshot;
use crate::queue::{BatchLimits, Checkpoint, FinalizationRates, Planned, WithdrawalRequest};
use crate::rate::MathError;

impl StvPool {
    /// Escrows `stv` of the caller's shares in a new request owned by
    /// `owner`. In the minting variant the caller may hand
    /// `liability_shares` of its minted liability to the request, to be
    /// settled out of the withdrawal at finalization.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ZeroAmount`], [`LedgerError::RebalancingNotSupported`],
    /// [`LedgerError::RequestBelowMinimum`],
    /// [`LedgerError::InsufficientMintedShares`],
    /// [`LedgerError::InsufficientBalance`],
    /// [`LedgerError::InsufficientUnlockedBalance`].
    pub fn request_withdrawal(
        &mut self,
        caller: &AccountId,
        owner: &AccountId,
        stv: u128,
        liability_shares: u128,
        snapshot: &Snapshot,
    ) -> Result<WithdrawalRequested, LedgerError> {
        if stv == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        ensure_not_reserved(caller)?;
        ensure_not_reserved(owner)?;
        if liability_shares > 0 && self.minting.is_none() {
            return Err(LedgerError::RebalancingNotSupported);
        }

        let assets = self.ledger.preview_redeem(stv)?;
        if assets < MIN_WITHDRAWAL_ASSETS {
            return Err(LedgerError::RequestBelowMinimum {
                assets,
                minimum: MIN_WITHDRAWAL_ASSETS,
            });
        }

        let minted = self.minted_liability_shares_of(caller);
        let minted_after = minted
            .checked_sub(liability_shares)
            .ok_or_else(|| LedgerError::InsufficientMintedShares {
                account: caller.clone(),
                minted,
                requested: liability_shares,
            })?;
        self.ensure_unlocked(caller, stv, minted_after, &snapshot.share_rate)?;

        let escrow = AccountId::withdrawal_queue();
        if liability_shares > 0 {
            self.engine_mut()?.move_liability(caller, &escrow, liability_shares)?;
        }
        self.ledger.transfer(caller, &escrow, stv)?;
        let request_id = self
            .queue
            .enqueue(owner.clone(), stv, liability_shares, assets, snapshot.now);

        debug!(
            request_id,
            owner = %owner,
            stv = %stv,
            assets = %assets,
            liability_shares = %liability_shares,
            "withdrawal requested"
        );
        let requested = WithdrawalRequested {
            request_id,
            caller: caller.clone(),
            owner: owner.clone(),
            stv,
            liability_shares,
            assets,
            queued_at: snapshot.now,
        };
        self.record(LedgerEvent::WithdrawalRequested(requested.clone()));
        Ok(requested)
    }

    /// Finalizes up to `max_requests` pending requests in id order under a
    /// new checkpoint priced at the current rates.
    ///
    /// # Errors
    ///
    /// [`LedgerError::MissingCapability`] without `Finalize`;
    /// [`LedgerError::NoRequestsToFinalize`] when not even the first
    /// pending request qualifies; [`LedgerError::BadDebt`] when the batch
    /// would settle liability of an undercollateralized vault.
    pub fn finalize(
        &mut self,
        caller: &AccountId,
        max_requests: usize,
        gas_cost_coverage_recipient: &AccountId,
        snapshot: &Snapshot,
    ) -> Result<WithdrawalsFinalized, LedgerError> {
        self.access.require(caller, Capability::Finalize)?;

        let rates = FinalizationRates {
            stv_rate: self.calculate_current_stv_rate()?,
            liability_share_rate: self.calculate_current_liability_share_rate(snapshot)?,
            gas_cost_coverage: self.queue.gas_cost_coverage(),
        };
        let limits = BatchLimits {
            max_requests,
            withdrawable_value: snapshot.withdrawable_value,
            available_balance: snapshot.available_balance,
            now: snapshot.now,
            latest_report_timestamp: snapshot.latest_report_timestamp,
            min_withdrawal_delay_secs: self.queue.min_withdrawal_delay_secs(),
        };

        let plan = match self.queue.plan(rates, &limits)? {
            Planned::Batch(plan) => plan,
            Planned::Empty(stop) => {
                warn!(
                    %stop,
                    pending = self.queue.unfinalized_requests_number(),
                    "no requests to finalize"
                );
                return Err(LedgerError::NoRequestsToFinalize { stop });
            }
        };

        let escrow = AccountId::withdrawal_queue();
        if plan.liability_shares > 0 {
            let engine = self.engine()?;
            engine.ensure_no_bad_debt(snapshot.total_value, &snapshot.share_rate)?;
            let carried = engine.minted_liability_shares_of(&escrow);
            if carried < plan.liability_shares {
                return Err(LedgerError::InsufficientMintedShares {
                    account: escrow,
                    minted: carried,
                    requested: plan.liability_shares,
                });
            }
        }

        self.ledger
            .burn(&escrow, plan.total_stv()?, plan.total_outflow()?)?;
        if plan.liability_shares > 0 {
            self.engine_mut()?.settle(&escrow, plan.liability_shares)?;
        }
        let checkpoint_index = self.queue.commit(&plan, snapshot.now)?;

        info!(
            from_id = plan.from_id,
            to_id = plan.to_id,
            checkpoint_index,
            assets_locked = %plan.assets_to_claim,
            assets_rebalanced = %plan.assets_to_rebalance,
            gas_cost_coverage = %plan.gas_cost_coverage,
            stop = %plan.stop,
            "withdrawals finalized"
        );
        let finalized = WithdrawalsFinalized {
            from_id: plan.from_id,
            to_id: plan.to_id,
            checkpoint_index,
            stv_rate: rates.stv_rate,
            liability_share_rate: rates.liability_share_rate,
            assets_locked: plan.assets_to_claim,
            assets_rebalanced: plan.assets_to_rebalance,
            gas_cost_coverage: plan.gas_cost_coverage,
            gas_cost_coverage_recipient: gas_cost_coverage_recipient.clone(),
            stv_burned: plan.stv_burned,
            stv_rebalanced: plan.stv_rebalanced,
            liability_shares_rebalanced: plan.liability_shares,
            stop: plan.stop,
            finalized_at: snapshot.now,
        };
        self.record(LedgerEvent::WithdrawalsFinalized(finalized.clone()));
        Ok(finalized)
    }

    /// Pays out a finalized request to `recipient`. Only the owner may
    /// claim, and only once.
    pub fn claim_withdrawal(
        &mut self,
        caller: &AccountId,
        request_id: u64,
        recipient: &AccountId,
    ) -> Result<WithdrawalClaimed, LedgerError> {
        ensure_not_reserved(recipient)?;
        let (request, assets) = self.queue.claim(caller, request_id)?;

        debug!(request_id, recipient = %recipient, assets = %assets, "withdrawal claimed");
        let claimed = WithdrawalClaimed {
            request_id,
            owner: request.owner,
            recipient: recipient.clone(),
            assets,
        };
        self.record(LedgerEvent::WithdrawalClaimed(claimed.clone()));
        Ok(claimed)
    }

    /// Sets the flat fee withheld from each request at finalization.
    pub fn set_gas_cost_coverage(
        &mut self,
        caller: &AccountId,
        coverage: u128,
    ) -> Result<GasCostCoverageSet, LedgerError> {
        self.access.require(caller, Capability::SetGasCostCoverage)?;
        if coverage > MAX_GAS_COST_COVERAGE {
            return Err(LedgerError::GasCostCoverageTooLarge {
                requested: coverage,
                max: MAX_GAS_COST_COVERAGE,
            });
        }
        self.queue.set_gas_cost_coverage(coverage);

        let set = GasCostCoverageSet {
            caller: caller.clone(),
            coverage,
        };
        self.record(LedgerEvent::GasCostCoverageSet(set.clone()));
        Ok(set)
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn withdrawal_status(&self, request_id: u64) -> Result<&WithdrawalRequest, LedgerError> {
        self.queue.request(request_id)
    }

    /// Ids of the owner's unclaimed requests.
    pub fn withdrawal_requests_of(&self, owner: &AccountId) -> Vec<u64> {
        self.queue.unclaimed_request_ids(owner)
    }

    pub fn claimable_assets(&self, request_id: u64) -> Result<u128, LedgerError> {
        self.queue.claimable_assets(request_id)
    }

    pub fn checkpoint(&self, index: u64) -> Option<&Checkpoint> {
        self.queue.checkpoint(index)
    }

    pub fn find_checkpoint_index(&self, request_id: u64) -> Option<u64> {
        self.queue.find_checkpoint_index(request_id)
    }

    pub fn last_request_id(&self) -> u64 {
        self.queue.last_request_id()
    }

    pub fn last_finalized_request_id(&self) -> u64 {
        self.queue.last_finalized_request_id()
    }

    pub fn last_checkpoint_index(&self) -> u64 {
        self.queue.last_checkpoint_index()
    }

    pub fn unfinalized_requests_number(&self) -> u64 {
        self.queue.unfinalized_requests_number()
    }

    pub fn unfinalized_stv(&self) -> Result<u128, MathError> {
        self.queue.unfinalized_stv()
    }

    pub fn unfinalized_assets(&self) -> Result<u128, MathError> {
        self.queue.unfinalized_assets()
    }

    pub fn unfinalized_liability_shares(&self) -> Result<u128, MathError> {
        self.queue.unfinalized_liability_shares()
    }

    /// Assets held for finalized, unclaimed requests.
    pub fn locked_assets(&self) -> u128 {
        self.queue.locked_assets()
    }

    pub fn gas_cost_coverage(&self) -> u128 {
        self.queue.gas_cost_coverage()
    }

    /// Stv rate a checkpoint created now would carry (E36).
    pub fn calculate_current_stv_rate(&self) -> Result<u128, MathError> {
        self.ledger.stv_rate()
    }

    /// Liability share rate a checkpoint created now would carry (E27).
    pub fn calculate_current_liability_share_rate(&self, snapshot: &Snapshot) -> Result<u128, MathError> {
        snapshot.share_rate.rate_e27()
    }
}
