// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # STV Pool Accounting Engine
//!
//! The accounting core of a share-based staking pool. Depositors receive
//! pool shares (stv) priced against the assets backing the pool, leave
//! through a FIFO withdrawal queue that is settled in batches at locked-in
//! rates, and may mint liability shares against their position as long as
//! they keep enough collateral behind it.
//!
//! ## Architecture
//!
//! - **rate**: 256-bit `mul_div` and the stv/asset pricing formulas.
//! - **ledger**: Share balances, supply and asset backing.
//! - **queue**: Withdrawal requests, batch planning and checkpoints.
//! - **minting**: Liability positions, reserve-ratio locks, forced
//!   rebalance math.
//! - **pool**: [`StvPool`], the aggregate every operation goes through.
//! - **access**: Capability checks at privileged entry points.
//! - **external**: Oracle, liquidity and share-rate traits, read once per
//!   operation into a [`Snapshot`].
//! - **backing**: An in-memory vault implementing those traits.
//! - **events**: The typed record each operation returns and journals.
//! - **config**: Protocol constants and pool parameters.
//!
//! ## Design Philosophy
//!
//! 1. Every operation validates and prices first, then writes. A failed
//!    call leaves nothing behind.
//! 2. Every division names its rounding. The pool never rounds in the
//!    caller's favour.
//! 3. The engine never calls out mid-operation; the environment arrives as
//!    a snapshot.

pub mod access;
pub mod account;
pub mod backing;
pub mod config;
pub mod error;
pub mod events;
pub mod external;
pub mod ledger;
pub mod minting;
pub mod pool;
pub mod queue;
pub mod rate;

pub use access::{AccessPolicy, Capability};
pub use account::AccountId;
pub use backing::InMemoryBacking;
pub use config::{MintingConfig, PoolConfig, VaultParameters};
pub use error::LedgerError;
pub use events::LedgerEvent;
pub use external::{CollateralOracle, LiquiditySource, ShareRate, ShareRateProvider, Snapshot};
pub use minting::{ForceRebalancePreview, MintForm};
pub use pool::{Genesis, SharedPool, StvPool};
pub use queue::{Checkpoint, RequestStatus, StopReason, WithdrawalRequest};
pub use rate::{MathError, Rounding};
