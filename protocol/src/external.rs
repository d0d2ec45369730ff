//! # External Collaborators
//!
//! The engine never reaches out to its environment in the middle of an
//! operation. Each call receives a [`Snapshot`], a point-in-time reading of
//! every collaborator taken once at entry, so all checks of one operation
//! see the same world.
//!
//! Three traits describe what the environment must answer:
//!
//! - [`CollateralOracle`]: the reported value of the backing collateral and
//!   when it was last reported.
//! - [`LiquiditySource`]: assets the vault can pay out right now.
//! - [`ShareRateProvider`]: the liability-share conversion rate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::E27;
use crate::rate::{mul_div, MathError, Rounding};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Oracle view of the backing vault.
pub trait CollateralOracle {
    /// Total value of the backing collateral, in asset units.
    fn total_value(&self) -> u128;

    /// Time of the most recent oracle report.
    fn latest_report_timestamp(&self) -> DateTime<Utc>;
}

/// Liquidity view of the backing vault.
pub trait LiquiditySource {
    /// Assets held liquid by the vault.
    fn available_balance(&self) -> u128;

    /// Assets the pool may withdraw without breaking the vault's own locks.
    fn withdrawable_value(&self) -> u128;
}

/// Source of the liability-share conversion rate.
pub trait ShareRateProvider {
    /// The current rate.
    fn share_rate(&self) -> ShareRate;
}

// ---------------------------------------------------------------------------
// ShareRate
// ---------------------------------------------------------------------------

/// Liability-share pricing: `total_pooled_assets / total_shares` assets per
/// liability share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRate {
    /// Assets pooled behind the liability token.
    pub total_pooled_assets: u128,
    /// Outstanding liability shares.
    pub total_shares: u128,
}

impl ShareRate {
    /// One asset per share.
    pub const fn par() -> Self {
        Self {
            total_pooled_assets: 1,
            total_shares: 1,
        }
    }

    /// Liability shares worth `assets` (floor).
    pub fn shares_for_assets(&self, assets: u128) -> Result<u128, MathError> {
        mul_div(assets, self.total_shares, self.total_pooled_assets, Rounding::Down)
    }

    /// Asset value of `shares` (floor).
    pub fn assets_for_shares(&self, shares: u128) -> Result<u128, MathError> {
        mul_div(shares, self.total_pooled_assets, self.total_shares, Rounding::Down)
    }

    /// Asset value of `shares` (ceiling). Used wherever a liability is valued
    /// and the pool must not under-cover it.
    pub fn assets_for_shares_round_up(&self, shares: u128) -> Result<u128, MathError> {
        mul_div(shares, self.total_pooled_assets, self.total_shares, Rounding::Up)
    }

    /// Assets per share scaled by [`E27`] (floor). Zero with no shares.
    pub fn rate_e27(&self) -> Result<u128, MathError> {
        if self.total_shares == 0 {
            return Ok(0);
        }
        mul_div(self.total_pooled_assets, E27, self.total_shares, Rounding::Down)
    }
}

impl Default for ShareRate {
    fn default() -> Self {
        Self::par()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Environment readings taken once at the start of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current time.
    pub now: DateTime<Utc>,
    /// Oracle-reported total value of the backing collateral.
    pub total_value: u128,
    /// Time of the latest oracle report.
    pub latest_report_timestamp: DateTime<Utc>,
    /// Liquid assets in the vault.
    pub available_balance: u128,
    /// Assets withdrawable by the pool.
    pub withdrawable_value: u128,
    /// Liability-share conversion rate.
    pub share_rate: ShareRate,
}

impl Snapshot {
    /// Reads every collaborator once.
    pub fn observe<O, L, R>(now: DateTime<Utc>, oracle: &O, liquidity: &L, rates: &R) -> Self
    where
        O: CollateralOracle + ?Sized,
        L: LiquiditySource + ?Sized,
        R: ShareRateProvider + ?Sized,
    {
        Self {
            now,
            total_value: oracle.total_value(),
            latest_report_timestamp: oracle.latest_report_timestamp(),
            available_balance: liquidity.available_balance(),
            withdrawable_value: liquidity.withdrawable_value(),
            share_rate: rates.share_rate(),
        }
    }
}
