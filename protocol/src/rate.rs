//! # Rate Arithmetic
//!
//! Fixed-point conversion helpers between asset amounts, pool shares (stv)
//! and liability shares. Every conversion names its rounding direction
//! explicitly, because the direction decides who absorbs the dust:
//!
//! - **Down** whenever the pool pays out (redeem, deposit minting). The
//!   rounding error stays in the pool and accrues to remaining holders.
//! - **Up** whenever the caller must not under-pay (shares required to
//!   cover a target value, collateral locked against liability).
//!
//! Amounts are `u128`. A pool with 27-decimal shares and 18-decimal assets
//! multiplies values in the 10^45 range, so every product is evaluated in a
//! 256-bit intermediate and narrowed back with an overflow check.

use ethnum::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{E36, STV_PER_ASSET_AT_SEED};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Arithmetic failures. Every one of these aborts the enclosing operation
/// before any state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    /// The result does not fit in `u128`.
    #[error("arithmetic overflow")]
    Overflow,

    /// A subtraction would go below zero.
    #[error("arithmetic underflow")]
    Underflow,

    /// Division by a zero denominator (e.g. pricing against empty backing).
    #[error("division by zero")]
    DivisionByZero,
}

// ---------------------------------------------------------------------------
// Rounding
// ---------------------------------------------------------------------------

/// Rounding direction for integer division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rounding {
    /// Floor.
    Down,
    /// Ceiling.
    Up,
}

/// Computes `x * y / denominator` with a 256-bit intermediate product.
///
/// # Errors
///
/// [`MathError::DivisionByZero`] if `denominator == 0`,
/// [`MathError::Overflow`] if the quotient exceeds `u128::MAX`.
pub fn mul_div(x: u128, y: u128, denominator: u128, rounding: Rounding) -> Result<u128, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }

    let product = U256::from(x) * U256::from(y);
    let denominator = U256::from(denominator);
    let mut quotient = product / denominator;
    if rounding == Rounding::Up && product % denominator != U256::ZERO {
        quotient += U256::ONE;
    }

    narrow(quotient)
}

fn narrow(value: U256) -> Result<u128, MathError> {
    if value > U256::from(u128::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(value.as_u128())
}

/// Checked addition mapped onto [`MathError`].
pub fn add(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

/// Checked subtraction mapped onto [`MathError`].
pub fn sub(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_sub(b).ok_or(MathError::Underflow)
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Asset/share pricing derived from the ledger totals.
///
/// Share price is `total_assets / total_supply`. It is undefined while the
/// supply is zero; deposits then mint at the fixed seed ratio
/// ([`STV_PER_ASSET_AT_SEED`]) and redemptions price to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    /// Nominal assets backing the supply.
    pub total_assets: u128,
    /// Outstanding pool shares.
    pub total_supply: u128,
}

impl Pricing {
    /// Shares minted for a deposit of `assets` (floor).
    pub fn stv_for_deposit(&self, assets: u128) -> Result<u128, MathError> {
        if self.total_supply == 0 {
            return assets
                .checked_mul(STV_PER_ASSET_AT_SEED)
                .ok_or(MathError::Overflow);
        }
        mul_div(assets, self.total_supply, self.total_assets, Rounding::Down)
    }

    /// Asset value of `stv` shares.
    pub fn assets_for_stv(&self, stv: u128, rounding: Rounding) -> Result<u128, MathError> {
        if self.total_supply == 0 {
            return Ok(0);
        }
        mul_div(stv, self.total_assets, self.total_supply, rounding)
    }

    /// Shares worth `assets`.
    pub fn stv_for_assets(&self, assets: u128, rounding: Rounding) -> Result<u128, MathError> {
        if self.total_supply == 0 {
            return Ok(0);
        }
        mul_div(assets, self.total_supply, self.total_assets, rounding)
    }

    /// Assets per share scaled by [`E36`] (floor). Zero for an empty pool.
    pub fn stv_rate(&self) -> Result<u128, MathError> {
        if self.total_supply == 0 {
            return Ok(0);
        }
        mul_div(self.total_assets, E36, self.total_supply, Rounding::Down)
    }
}
