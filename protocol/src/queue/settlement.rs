//! # Settlement Math & Batch Planning
//!
//! Finalization runs as a two-stage pipeline:
//!
//! ```text
//! 1. PLAN    walk pending requests in id order, price each one against
//!            the new checkpoint, stop at the first that breaks a limit
//! 2. COMMIT  burn escrow, lock claims, append checkpoint
//! ```
//!
//! Planning is pure: it reads the queue and returns a [`BatchPlan`] or the
//! [`StopReason`] that kept the very first request out. Nothing is written
//! until the caller commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StopReason, WithdrawalRequest};
use crate::config::{E27, E36};
use crate::rate::{self, mul_div, MathError, Rounding};

// ---------------------------------------------------------------------------
// Per-request amounts
// ---------------------------------------------------------------------------

/// Rates a batch is finalized at. Stored verbatim in the checkpoint so that
/// claims can be priced again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationRates {
    /// Assets per pool share, E36.
    pub stv_rate: u128,
    /// Assets per liability share, E27.
    pub liability_share_rate: u128,
    /// Flat fee withheld from each request.
    pub gas_cost_coverage: u128,
}

/// What finalizing one request pays and burns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAmounts {
    /// Escrowed shares of the request.
    pub stv: u128,
    /// Assets the owner can claim.
    pub assets_to_claim: u128,
    /// Liability carried by the request.
    pub liability_shares: u128,
    /// Assets paid to settle that liability (ceiling).
    pub assets_to_rebalance: u128,
    /// Fee withheld for the finalizer.
    pub gas_cost_coverage: u128,
    /// Part of `stv` burned against the rebalance rather than the claim.
    pub stv_rebalanced: u128,
}

/// Prices a request at the given checkpoint rates.
///
/// The owner gets the value locked in at request time unless the pool has
/// since lost value, in which case the claim is discounted to the
/// checkpoint rate. Gains after the request are never paid out. Liability
/// settlement and then the gas fee come out of the claim, which never goes
/// below zero.
pub fn calc_request_amounts(
    request: &WithdrawalRequest,
    rates: &FinalizationRates,
) -> Result<RequestAmounts, MathError> {
    let stv = request.stv_amount;
    let liability_shares = request.liability_shares_amount;
    let mut assets_to_claim = request.asset_amount;

    let request_rate = mul_div(assets_to_claim, E36, stv, Rounding::Down)?;
    if request_rate > rates.stv_rate {
        assets_to_claim = mul_div(stv, rates.stv_rate, E36, Rounding::Down)?;
    }

    let mut assets_to_rebalance = 0;
    if liability_shares > 0 {
        assets_to_rebalance = mul_div(
            liability_shares,
            rates.liability_share_rate,
            E27,
            Rounding::Up,
        )?;
        assets_to_claim = assets_to_claim.saturating_sub(assets_to_rebalance);
    }

    let gas_cost_coverage = assets_to_claim.min(rates.gas_cost_coverage);
    assets_to_claim -= gas_cost_coverage;

    let stv_rebalanced = if assets_to_rebalance == 0 {
        0
    } else if rates.stv_rate == 0 {
        stv
    } else {
        mul_div(assets_to_rebalance, E36, rates.stv_rate, Rounding::Down)?.min(stv)
    };

    Ok(RequestAmounts {
        stv,
        assets_to_claim,
        liability_shares,
        assets_to_rebalance,
        gas_cost_coverage,
        stv_rebalanced,
    })
}

// ---------------------------------------------------------------------------
// Batch planning
// ---------------------------------------------------------------------------

/// Environment limits a batch must respect.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_requests: usize,
    pub withdrawable_value: u128,
    pub available_balance: u128,
    pub now: DateTime<Utc>,
    pub latest_report_timestamp: DateTime<Utc>,
    pub min_withdrawal_delay_secs: u64,
}

impl BatchLimits {
    /// Age and report gates for a single request.
    fn eligibility(&self, queued_at: DateTime<Utc>) -> Option<StopReason> {
        let delay = i64::try_from(self.min_withdrawal_delay_secs).unwrap_or(i64::MAX);
        if queued_at.timestamp().saturating_add(delay) > self.now.timestamp() {
            return Some(StopReason::MinDelay);
        }
        if queued_at > self.latest_report_timestamp {
            return Some(StopReason::AwaitingReport);
        }
        None
    }
}

/// A priced, not yet applied, finalization batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub from_id: u64,
    pub to_id: u64,
    pub rates: FinalizationRates,
    /// Per-request amounts in id order.
    pub requests: Vec<RequestAmounts>,
    pub assets_to_claim: u128,
    pub assets_to_rebalance: u128,
    pub gas_cost_coverage: u128,
    /// Escrow burned against claims: `Σ (stv - stv_rebalanced)`.
    pub stv_burned: u128,
    pub stv_rebalanced: u128,
    pub liability_shares: u128,
    /// Why the batch ended.
    pub stop: StopReason,
}

impl BatchPlan {
    /// Escrowed shares destroyed by the batch.
    pub fn total_stv(&self) -> Result<u128, MathError> {
        rate::add(self.stv_burned, self.stv_rebalanced)
    }

    /// Backing leaving the pool: claims, rebalance and gas coverage.
    pub fn total_outflow(&self) -> Result<u128, MathError> {
        rate::add(
            rate::add(self.assets_to_claim, self.gas_cost_coverage)?,
            self.assets_to_rebalance,
        )
    }
}

/// Outcome of planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Planned {
    /// At least one request qualifies.
    Batch(BatchPlan),
    /// The first pending request did not qualify.
    Empty(StopReason),
}

/// Walks `pending` (requests after the last finalized one, in id order) and
/// takes requests while every cumulative limit still holds.
pub fn plan_batch(
    pending: &[WithdrawalRequest],
    rates: FinalizationRates,
    limits: &BatchLimits,
) -> Result<Planned, MathError> {
    let mut requests = Vec::new();
    let mut assets_to_claim = 0u128;
    let mut assets_to_rebalance = 0u128;
    let mut gas_cost_coverage = 0u128;
    let mut stv_burned = 0u128;
    let mut stv_rebalanced = 0u128;
    let mut liability_shares = 0u128;
    let mut stop = StopReason::QueueDrained;

    for request in pending {
        if requests.len() >= limits.max_requests {
            stop = StopReason::BatchLimit;
            break;
        }

        let amounts = calc_request_amounts(request, &rates)?;

        let claim_with_gas = rate::add(
            rate::add(assets_to_claim, amounts.assets_to_claim)?,
            rate::add(gas_cost_coverage, amounts.gas_cost_coverage)?,
        )?;
        if claim_with_gas > limits.withdrawable_value {
            stop = StopReason::WithdrawableValue;
            break;
        }
        let outflow = rate::add(
            claim_with_gas,
            rate::add(assets_to_rebalance, amounts.assets_to_rebalance)?,
        )?;
        if outflow > limits.available_balance {
            stop = StopReason::AvailableBalance;
            break;
        }
        if let Some(reason) = limits.eligibility(request.queued_at) {
            stop = reason;
            break;
        }

        assets_to_claim = rate::add(assets_to_claim, amounts.assets_to_claim)?;
        assets_to_rebalance = rate::add(assets_to_rebalance, amounts.assets_to_rebalance)?;
        gas_cost_coverage = rate::add(gas_cost_coverage, amounts.gas_cost_coverage)?;
        stv_burned = rate::add(stv_burned, amounts.stv - amounts.stv_rebalanced)?;
        stv_rebalanced = rate::add(stv_rebalanced, amounts.stv_rebalanced)?;
        liability_shares = rate::add(liability_shares, amounts.liability_shares)?;
        requests.push(amounts);
    }

    if requests.is_empty() {
        return Ok(Planned::Empty(stop));
    }

    Ok(Planned::Batch(BatchPlan {
        from_id: pending[0].id,
        to_id: pending[requests.len() - 1].id,
        rates,
        requests,
        assets_to_claim,
        assets_to_rebalance,
        gas_cost_coverage,
        stv_burned,
        stv_rebalanced,
        liability_shares,
        stop,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountId;
    use crate::queue::RequestStatus;
    use chrono::TimeZone;

    const ETH: u128 = 1_000_000_000_000_000_000;
    /// Seed price: 1 asset per 1e9 shares.
    const SEED_RATE: u128 = E36 / 1_000_000_000;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn request(id: u64, stv: u128, assets: u128, liability: u128, queued_at: i64) -> WithdrawalRequest {
        WithdrawalRequest {
            id,
            owner: AccountId::from("alice"),
            stv_amount: stv,
            liability_shares_amount: liability,
            asset_amount: assets,
            queued_at: at(queued_at),
            status: RequestStatus::Pending,
        }
    }

    fn rates(stv_rate: u128, gas: u128) -> FinalizationRates {
        FinalizationRates {
            stv_rate,
            liability_share_rate: E27,
            gas_cost_coverage: gas,
        }
    }

    /// One asset's worth of shares at seed price.
    fn one_asset(id: u64, queued_at: i64) -> WithdrawalRequest {
        request(id, 1_000_000_000 * ETH, ETH, 0, queued_at)
    }

    fn open_limits() -> BatchLimits {
        BatchLimits {
            max_requests: 100,
            withdrawable_value: u128::MAX,
            available_balance: u128::MAX,
            now: at(1_000_000),
            latest_report_timestamp: at(1_000_000),
            min_withdrawal_delay_secs: 86_400,
        }
    }

    #[test]
    fn unchanged_rate_pays_request_value() {
        let req = request(1, 500_000_000 * ETH, ETH / 2, 0, 0);
        let amounts = calc_request_amounts(&req, &rates(SEED_RATE, 0)).unwrap();
        assert_eq!(amounts.assets_to_claim, ETH / 2);
        assert_eq!(amounts.stv_rebalanced, 0);
    }

    #[test]
    fn loss_discounts_to_checkpoint_rate() {
        let req = request(1, 500_000_000 * ETH, ETH / 2, 0, 0);
        // pool lost 10%
        let amounts = calc_request_amounts(&req, &rates(SEED_RATE / 10 * 9, 0)).unwrap();
        assert_eq!(amounts.assets_to_claim, ETH / 20 * 9);
    }

    #[test]
    fn gain_is_not_paid_out() {
        let req = request(1, 500_000_000 * ETH, ETH / 2, 0, 0);
        let amounts = calc_request_amounts(&req, &rates(SEED_RATE * 2, 0)).unwrap();
        assert_eq!(amounts.assets_to_claim, ETH / 2);
    }

    #[test]
    fn gas_coverage_capped_by_claim() {
        let req = request(1, 1_000_000_000_000_000_000_000_000, 1_000, 0, 0);
        let amounts = calc_request_amounts(&req, &rates(E36, 5_000)).unwrap();
        assert_eq!(amounts.gas_cost_coverage, 1_000);
        assert_eq!(amounts.assets_to_claim, 0);
    }

    #[test]
    fn rebalance_comes_out_of_claim_and_burns_matching_stv() {
        let stv = 1_000_000_000 * ETH; // 1 asset at seed price
        let req = request(1, stv, ETH, ETH / 4, 0);
        let amounts = calc_request_amounts(&req, &rates(SEED_RATE, 0)).unwrap();
        assert_eq!(amounts.assets_to_rebalance, ETH / 4);
        assert_eq!(amounts.assets_to_claim, ETH / 4 * 3);
        assert_eq!(amounts.stv_rebalanced, stv / 4);
    }

    #[test]
    fn rebalance_larger_than_value_floors_claim_and_caps_stv() {
        let stv = 1_000_000_000 * ETH;
        let req = request(1, stv, ETH, 2 * ETH, 0);
        let amounts = calc_request_amounts(&req, &rates(SEED_RATE, 1_000)).unwrap();
        assert_eq!(amounts.assets_to_claim, 0);
        assert_eq!(amounts.gas_cost_coverage, 0);
        assert_eq!(amounts.stv_rebalanced, stv);
    }

    #[test]
    fn young_requests_stop_the_batch() {
        let pending = vec![one_asset(1, 0), one_asset(2, 999_000)];
        let plan = plan_batch(&pending, rates(SEED_RATE, 0), &open_limits()).unwrap();
        match plan {
            Planned::Batch(batch) => {
                assert_eq!((batch.from_id, batch.to_id), (1, 1));
                assert_eq!(batch.stop, StopReason::MinDelay);
            }
            Planned::Empty(stop) => panic!("unexpected empty batch: {stop}"),
        }
    }

    #[test]
    fn requests_after_latest_report_wait() {
        let pending = vec![one_asset(1, 500_000)];
        let limits = BatchLimits {
            latest_report_timestamp: at(400_000),
            ..open_limits()
        };
        let plan = plan_batch(&pending, rates(SEED_RATE, 0), &limits).unwrap();
        assert_eq!(plan, Planned::Empty(StopReason::AwaitingReport));
    }

    #[test]
    fn liquidity_limits_are_cumulative() {
        let pending = vec![
            one_asset(1, 0),
            one_asset(2, 0),
            one_asset(3, 0),
        ];
        let limits = BatchLimits {
            withdrawable_value: 2 * ETH + ETH / 2,
            ..open_limits()
        };
        let Planned::Batch(batch) = plan_batch(&pending, rates(SEED_RATE, 0), &limits).unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.to_id, 2);
        assert_eq!(batch.stop, StopReason::WithdrawableValue);
        assert_eq!(batch.assets_to_claim, 2 * ETH);

        let limits = BatchLimits {
            available_balance: ETH,
            ..open_limits()
        };
        let Planned::Batch(batch) = plan_batch(&pending, rates(SEED_RATE, 0), &limits).unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.to_id, 1);
        assert_eq!(batch.stop, StopReason::AvailableBalance);
    }

    #[test]
    fn batch_limit_and_drained_queue() {
        let pending = vec![one_asset(1, 0), one_asset(2, 0)];
        let limits = BatchLimits {
            max_requests: 1,
            ..open_limits()
        };
        let Planned::Batch(batch) = plan_batch(&pending, rates(SEED_RATE, 0), &limits).unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.stop, StopReason::BatchLimit);

        assert_eq!(
            plan_batch(&[], rates(E36, 0), &open_limits()).unwrap(),
            Planned::Empty(StopReason::QueueDrained)
        );
    }
}
