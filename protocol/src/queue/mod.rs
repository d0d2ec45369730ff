//! # Withdrawal Queue
//!
//! A FIFO of withdrawal requests and the append-only list of checkpoints
//! they are finalized under.
//!
//! ## Request Lifecycle
//!
//! ```text
//!  request ──► Pending ──finalize──► Finalized ──claim──► Claimed
//! ```
//!
//! Requests are numbered from 1 and never deleted. Finalization always
//! takes a contiguous run starting right after the last finalized id, and
//! every run gets its own [`Checkpoint`] recording the rates it was priced
//! at. A claim looks the checkpoint up again and reprices the request, so
//! the queue keeps no per-request payout.

pub mod settlement;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::error::LedgerError;
use crate::rate::{self, MathError};

pub use settlement::{
    calc_request_amounts, plan_batch, BatchLimits, BatchPlan, FinalizationRates, Planned,
    RequestAmounts,
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Lifecycle status of a request. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Finalized,
    Claimed,
}

impl RequestStatus {
    /// `true` once the request has been finalized, claimed or not.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, RequestStatus::Finalized | RequestStatus::Claimed)
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, RequestStatus::Claimed)
    }
}

/// A queued withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: u64,
    pub owner: AccountId,
    /// Escrowed pool shares.
    pub stv_amount: u128,
    /// Minted liability settled out of this request at finalization.
    pub liability_shares_amount: u128,
    /// Value of `stv_amount` when the request was made.
    pub asset_amount: u128,
    pub queued_at: DateTime<Utc>,
    pub status: RequestStatus,
}

/// A finalized run of requests and the rates it was priced at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 1-based position in the checkpoint list.
    pub index: u64,
    pub from_id: u64,
    pub to_id: u64,
    pub rates: FinalizationRates,
    pub finalized_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn contains(&self, request_id: u64) -> bool {
        (self.from_id..=self.to_id).contains(&request_id)
    }
}

/// Why finalization stopped where it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `max_requests` reached.
    BatchLimit,
    /// Claims plus gas coverage would exceed the withdrawable value.
    WithdrawableValue,
    /// Claims, gas coverage and rebalance would exceed vault liquidity.
    AvailableBalance,
    /// The request is younger than the minimum delay.
    MinDelay,
    /// The request was made after the latest oracle report.
    AwaitingReport,
    /// Every request is finalized.
    QueueDrained,
}

impl StopReason {
    /// `true` for the age and report gates: the request will qualify later
    /// on its own.
    pub fn is_not_yet_eligible(&self) -> bool {
        matches!(self, StopReason::MinDelay | StopReason::AwaitingReport)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::BatchLimit => write!(f, "batch limit reached"),
            StopReason::WithdrawableValue => write!(f, "withdrawable value exhausted"),
            StopReason::AvailableBalance => write!(f, "available balance exhausted"),
            StopReason::MinDelay => write!(f, "not yet eligible: minimum delay"),
            StopReason::AwaitingReport => write!(f, "not yet eligible: awaiting oracle report"),
            StopReason::QueueDrained => write!(f, "queue drained"),
        }
    }
}

// ---------------------------------------------------------------------------
// WithdrawalQueue
// ---------------------------------------------------------------------------

/// Requests, checkpoints and the assets locked for claims.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalQueue {
    requests: Vec<WithdrawalRequest>,
    checkpoints: Vec<Checkpoint>,
    last_finalized_request_id: u64,
    locked_assets: u128,
    gas_cost_coverage: u128,
    min_withdrawal_delay_secs: u64,
}

impl WithdrawalQueue {
    pub fn new(min_withdrawal_delay_secs: u64, gas_cost_coverage: u128) -> Self {
        Self {
            requests: Vec::new(),
            checkpoints: Vec::new(),
            last_finalized_request_id: 0,
            locked_assets: 0,
            gas_cost_coverage,
            min_withdrawal_delay_secs,
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn last_request_id(&self) -> u64 {
        self.requests.len() as u64
    }

    pub fn last_finalized_request_id(&self) -> u64 {
        self.last_finalized_request_id
    }

    pub fn last_checkpoint_index(&self) -> u64 {
        self.checkpoints.len() as u64
    }

    pub fn unfinalized_requests_number(&self) -> u64 {
        self.last_request_id() - self.last_finalized_request_id
    }

    /// Assets reserved for finalized, unclaimed requests.
    pub fn locked_assets(&self) -> u128 {
        self.locked_assets
    }

    pub fn gas_cost_coverage(&self) -> u128 {
        self.gas_cost_coverage
    }

    pub fn min_withdrawal_delay_secs(&self) -> u64 {
        self.min_withdrawal_delay_secs
    }

    pub fn request(&self, id: u64) -> Result<&WithdrawalRequest, LedgerError> {
        id.checked_sub(1)
            .and_then(|index| self.requests.get(index as usize))
            .ok_or(LedgerError::UnknownRequest(id))
    }

    /// Requests not yet finalized, in id order.
    pub fn pending(&self) -> &[WithdrawalRequest] {
        &self.requests[self.last_finalized_request_id as usize..]
    }

    /// Ids of the owner's unclaimed requests.
    pub fn unclaimed_request_ids(&self, owner: &AccountId) -> Vec<u64> {
        self.requests
            .iter()
            .filter(|r| &r.owner == owner && !r.status.is_claimed())
            .map(|r| r.id)
            .collect()
    }

    pub fn unfinalized_stv(&self) -> Result<u128, MathError> {
        self.pending()
            .iter()
            .try_fold(0u128, |acc, r| rate::add(acc, r.stv_amount))
    }

    pub fn unfinalized_assets(&self) -> Result<u128, MathError> {
        self.pending()
            .iter()
            .try_fold(0u128, |acc, r| rate::add(acc, r.asset_amount))
    }

    pub fn unfinalized_liability_shares(&self) -> Result<u128, MathError> {
        self.pending()
            .iter()
            .try_fold(0u128, |acc, r| rate::add(acc, r.liability_shares_amount))
    }

    /// Checkpoint by 1-based index.
    pub fn checkpoint(&self, index: u64) -> Option<&Checkpoint> {
        index
            .checked_sub(1)
            .and_then(|i| self.checkpoints.get(i as usize))
    }

    /// Index of the checkpoint a finalized request belongs to. `None` for
    /// unknown or pending ids.
    pub fn find_checkpoint_index(&self, request_id: u64) -> Option<u64> {
        if request_id == 0 || request_id > self.last_finalized_request_id {
            return None;
        }
        // Checkpoints cover contiguous ascending id ranges.
        let position = self.checkpoints.partition_point(|c| c.to_id < request_id);
        self.checkpoints
            .get(position)
            .filter(|c| c.contains(request_id))
            .map(|c| c.index)
    }

    /// What the owner can claim for `request_id` right now: zero unless the
    /// request is finalized and unclaimed.
    pub fn claimable_assets(&self, request_id: u64) -> Result<u128, LedgerError> {
        let request = self.request(request_id)?;
        if request.status != RequestStatus::Finalized {
            return Ok(0);
        }
        Ok(self.price_finalized(request)?.assets_to_claim)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Appends a pending request and returns its id.
    pub fn enqueue(
        &mut self,
        owner: AccountId,
        stv_amount: u128,
        liability_shares_amount: u128,
        asset_amount: u128,
        queued_at: DateTime<Utc>,
    ) -> u64 {
        let id = self.last_request_id() + 1;
        self.requests.push(WithdrawalRequest {
            id,
            owner,
            stv_amount,
            liability_shares_amount,
            asset_amount,
            queued_at,
            status: RequestStatus::Pending,
        });
        id
    }

    /// Plans the next batch against `rates`. Does not mutate.
    pub fn plan(
        &self,
        rates: FinalizationRates,
        limits: &BatchLimits,
    ) -> Result<Planned, MathError> {
        plan_batch(self.pending(), rates, limits)
    }

    /// Applies a plan produced by [`plan`](Self::plan) against the current
    /// queue state. Returns the new checkpoint index.
    pub fn commit(&mut self, plan: &BatchPlan, finalized_at: DateTime<Utc>) -> Result<u64, LedgerError> {
        let locked_assets = rate::add(self.locked_assets, plan.assets_to_claim)?;

        for id in plan.from_id..=plan.to_id {
            if let Some(request) = self.requests.get_mut((id - 1) as usize) {
                request.status = RequestStatus::Finalized;
            }
        }

        let index = self.last_checkpoint_index() + 1;
        self.checkpoints.push(Checkpoint {
            index,
            from_id: plan.from_id,
            to_id: plan.to_id,
            rates: plan.rates,
            finalized_at,
        });
        self.last_finalized_request_id = plan.to_id;
        self.locked_assets = locked_assets;
        Ok(index)
    }

    /// Marks a finalized request claimed and releases its locked assets.
    /// Returns the request and the amount paid.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownRequest`], [`LedgerError::NotRequestOwner`],
    /// [`LedgerError::NotFinalized`], [`LedgerError::AlreadyClaimed`].
    pub fn claim(
        &mut self,
        caller: &AccountId,
        request_id: u64,
    ) -> Result<(WithdrawalRequest, u128), LedgerError> {
        let request = self.request(request_id)?;
        if &request.owner != caller {
            return Err(LedgerError::NotRequestOwner {
                request_id,
                caller: caller.clone(),
            });
        }
        match request.status {
            RequestStatus::Pending => return Err(LedgerError::NotFinalized(request_id)),
            RequestStatus::Claimed => return Err(LedgerError::AlreadyClaimed(request_id)),
            RequestStatus::Finalized => {}
        }

        let assets = self.price_finalized(request)?.assets_to_claim;
        let locked_assets = rate::sub(self.locked_assets, assets)?;

        let index = (request_id - 1) as usize;
        self.requests[index].status = RequestStatus::Claimed;
        self.locked_assets = locked_assets;
        Ok((self.requests[index].clone(), assets))
    }

    pub fn set_gas_cost_coverage(&mut self, coverage: u128) {
        self.gas_cost_coverage = coverage;
    }

    /// Reprices a finalized request from its checkpoint.
    fn price_finalized(&self, request: &WithdrawalRequest) -> Result<RequestAmounts, LedgerError> {
        let checkpoint = self
            .find_checkpoint_index(request.id)
            .and_then(|index| self.checkpoint(index))
            .ok_or(LedgerError::NotFinalized(request.id))?;
        Ok(calc_request_amounts(request, &checkpoint.rates)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{E27, E36};
    use chrono::TimeZone;

    const ETH: u128 = 1_000_000_000_000_000_000;
    const STV: u128 = 1_000_000_000 * ETH;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn alice() -> AccountId {
        AccountId::from("alice")
    }

    fn rates() -> FinalizationRates {
        FinalizationRates {
            stv_rate: E36 / 1_000_000_000,
            liability_share_rate: E27,
            gas_cost_coverage: 0,
        }
    }

    fn limits(max_requests: usize) -> BatchLimits {
        BatchLimits {
            max_requests,
            withdrawable_value: u128::MAX,
            available_balance: u128::MAX,
            now: at(1_000_000),
            latest_report_timestamp: at(1_000_000),
            min_withdrawal_delay_secs: 0,
        }
    }

    fn queue_with(n: u64) -> WithdrawalQueue {
        let mut queue = WithdrawalQueue::new(0, 0);
        for _ in 0..n {
            queue.enqueue(alice(), STV, 0, ETH, at(0));
        }
        queue
    }

    fn finalize(queue: &mut WithdrawalQueue, max: usize) -> u64 {
        match queue.plan(rates(), &limits(max)).unwrap() {
            Planned::Batch(plan) => queue.commit(&plan, at(1_000_000)).unwrap(),
            Planned::Empty(stop) => panic!("nothing to finalize: {stop}"),
        }
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let queue = queue_with(3);
        assert_eq!(queue.last_request_id(), 3);
        assert_eq!(queue.request(1).unwrap().id, 1);
        assert!(matches!(queue.request(0), Err(LedgerError::UnknownRequest(0))));
        assert!(matches!(queue.request(4), Err(LedgerError::UnknownRequest(4))));
        assert_eq!(queue.unfinalized_requests_number(), 3);
        assert_eq!(queue.unfinalized_stv().unwrap(), 3 * STV);
    }

    #[test]
    fn checkpoints_cover_contiguous_ranges() {
        let mut queue = queue_with(5);
        assert_eq!(finalize(&mut queue, 2), 1);
        assert_eq!(finalize(&mut queue, 1), 2);
        assert_eq!(finalize(&mut queue, 10), 3);

        assert_eq!(queue.find_checkpoint_index(1), Some(1));
        assert_eq!(queue.find_checkpoint_index(2), Some(1));
        assert_eq!(queue.find_checkpoint_index(3), Some(2));
        assert_eq!(queue.find_checkpoint_index(5), Some(3));
        assert_eq!(queue.find_checkpoint_index(6), None);

        let third = queue.checkpoint(3).unwrap();
        assert_eq!((third.from_id, third.to_id), (4, 5));
        assert_eq!(queue.unfinalized_requests_number(), 0);
        assert_eq!(queue.locked_assets(), 5 * ETH);
    }

    #[test]
    fn claim_releases_locked_assets_once() {
        let mut queue = queue_with(2);
        finalize(&mut queue, 1);
        assert_eq!(queue.claimable_assets(1).unwrap(), ETH);
        assert_eq!(queue.claimable_assets(2).unwrap(), 0);

        let (request, assets) = queue.claim(&alice(), 1).unwrap();
        assert_eq!(assets, ETH);
        assert!(request.status.is_claimed());
        assert_eq!(queue.locked_assets(), 0);

        assert!(matches!(queue.claim(&alice(), 1), Err(LedgerError::AlreadyClaimed(1))));
        assert!(matches!(queue.claim(&alice(), 2), Err(LedgerError::NotFinalized(2))));
    }

    #[test]
    fn only_owner_claims() {
        let mut queue = queue_with(1);
        finalize(&mut queue, 1);
        let bob = AccountId::from("bob");
        assert!(matches!(
            queue.claim(&bob, 1),
            Err(LedgerError::NotRequestOwner { request_id: 1, .. })
        ));
        assert_eq!(queue.unclaimed_request_ids(&alice()), vec![1]);
    }
}
