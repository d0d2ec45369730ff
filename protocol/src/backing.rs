//! # In-Memory Backing Vault
//!
//! A self-contained stand-in for the environment the pool runs against:
//! it answers all three collaborator traits from a liquid balance, a
//! deployed (staked, illiquid) balance, an oracle report time and a fixed
//! liability share rate.
//!
//! The backing follows the pool by replaying its journal through
//! [`InMemoryBacking::apply`]: deposits arrive liquid, rewards and slashes
//! hit the deployed balance, and finalizations and forced rebalances pay
//! out of the liquid balance. Everything else is left to the caller
//! (`deploy`, `unwind`, `report`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::events::LedgerEvent;
use crate::external::{CollateralOracle, LiquiditySource, ShareRate, ShareRateProvider, Snapshot};
use crate::rate::{self, MathError};

/// Liquid and deployed assets behind a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryBacking {
    liquid: u128,
    deployed: u128,
    latest_report_timestamp: DateTime<Utc>,
    share_rate: ShareRate,
}

impl InMemoryBacking {
    /// An empty vault last reported at `reported_at`, at a par share rate.
    pub fn new(reported_at: DateTime<Utc>) -> Self {
        Self {
            liquid: 0,
            deployed: 0,
            latest_report_timestamp: reported_at,
            share_rate: ShareRate::par(),
        }
    }

    pub fn with_share_rate(mut self, share_rate: ShareRate) -> Self {
        self.share_rate = share_rate;
        self
    }

    pub fn liquid(&self) -> u128 {
        self.liquid
    }

    pub fn deployed(&self) -> u128 {
        self.deployed
    }

    /// Reads the backing as of `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot::observe(now, self, self, self)
    }

    // -----------------------------------------------------------------------
    // Environment changes
    // -----------------------------------------------------------------------

    /// Moves liquid assets into the deployed balance.
    pub fn deploy(&mut self, assets: u128) -> Result<(), MathError> {
        let liquid = rate::sub(self.liquid, assets)?;
        let deployed = rate::add(self.deployed, assets)?;
        self.liquid = liquid;
        self.deployed = deployed;
        Ok(())
    }

    /// Brings deployed assets back to the liquid balance.
    pub fn unwind(&mut self, assets: u128) -> Result<(), MathError> {
        let deployed = rate::sub(self.deployed, assets)?;
        let liquid = rate::add(self.liquid, assets)?;
        self.liquid = liquid;
        self.deployed = deployed;
        Ok(())
    }

    /// Records an oracle report at `at`.
    pub fn report(&mut self, at: DateTime<Utc>) {
        self.latest_report_timestamp = at;
    }

    pub fn set_share_rate(&mut self, share_rate: ShareRate) {
        self.share_rate = share_rate;
    }

    // -----------------------------------------------------------------------
    // Journal replay
    // -----------------------------------------------------------------------

    /// Mirrors the asset movement of one pool record.
    pub fn apply(&mut self, event: &LedgerEvent) -> Result<(), MathError> {
        match event {
            LedgerEvent::Deposited(deposited) => {
                self.liquid = rate::add(self.liquid, deposited.assets)?;
            }
            LedgerEvent::RewardsAccrued(accrued) => {
                let magnitude = accrued.delta.unsigned_abs();
                if accrued.delta >= 0 {
                    self.deployed = rate::add(self.deployed, magnitude)?;
                } else {
                    // slashes eat into deployed assets first
                    let from_deployed = magnitude.min(self.deployed);
                    let liquid = rate::sub(self.liquid, magnitude - from_deployed)?;
                    self.deployed -= from_deployed;
                    self.liquid = liquid;
                }
            }
            LedgerEvent::WithdrawalsFinalized(finalized) => {
                let outflow = rate::add(
                    rate::add(finalized.assets_locked, finalized.gas_cost_coverage)?,
                    finalized.assets_rebalanced,
                )?;
                self.liquid = rate::sub(self.liquid, outflow)?;
            }
            LedgerEvent::LiabilitySharesRebalanced(rebalanced) => {
                self.liquid = rate::sub(self.liquid, rebalanced.assets)?;
            }
            _ => return Ok(()),
        }
        trace!(
            event = event.name(),
            liquid = %self.liquid,
            deployed = %self.deployed,
            "backing updated"
        );
        Ok(())
    }

    /// Replays every record in order.
    pub fn apply_all<'a, I>(&mut self, events: I) -> Result<(), MathError>
    where
        I: IntoIterator<Item = &'a LedgerEvent>,
    {
        events.into_iter().try_for_each(|event| self.apply(event))
    }
}

impl CollateralOracle for InMemoryBacking {
    fn total_value(&self) -> u128 {
        self.liquid.saturating_add(self.deployed)
    }

    fn latest_report_timestamp(&self) -> DateTime<Utc> {
        self.latest_report_timestamp
    }
}

impl LiquiditySource for InMemoryBacking {
    fn available_balance(&self) -> u128 {
        self.liquid
    }

    fn withdrawable_value(&self) -> u128 {
        self.liquid
    }
}

impl ShareRateProvider for InMemoryBacking {
    fn share_rate(&self) -> ShareRate {
        self.share_rate
    }
}
