//! Error types for the pool accounting engine.
//!
//! Every mutating operation that can fail returns a [`LedgerError`]. Failed
//! operations leave the pool untouched, so callers may retry with adjusted
//! parameters (a smaller batch, a later time) without cleanup.

use thiserror::Error;

use crate::access::Capability;
use crate::account::AccountId;
use crate::queue::StopReason;
use crate::rate::MathError;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Zero amounts are never meaningful.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The deposit is too small to mint a single share at the current rate.
    #[error("deposit of {assets} mints zero shares")]
    ZeroShares {
        /// Assets offered.
        assets: u128,
    },

    /// The account does not hold enough pool shares.
    #[error("insufficient balance: {account} has {available}, requested {requested}")]
    InsufficientBalance {
        /// The account being debited.
        account: AccountId,
        /// Current share balance.
        available: u128,
        /// Shares requested.
        requested: u128,
    },

    /// The shares would leave too little behind to back minted liability.
    #[error("insufficient unlocked balance: {account} can move {unlocked}, requested {requested}")]
    InsufficientUnlockedBalance {
        /// The account being debited.
        account: AccountId,
        /// Shares not locked against minted liability.
        unlocked: u128,
        /// Shares requested.
        requested: u128,
    },

    /// Collateral value is below total liability; deposits and rebalances
    /// are blocked until the vault recovers.
    #[error("vault in bad debt: collateral worth {collateral_shares} liability shares, liability {liability_shares}")]
    BadDebt {
        /// Oracle total value converted to liability shares.
        collateral_shares: u128,
        /// Total outstanding liability shares.
        liability_shares: u128,
    },

    /// The withdrawal queue's escrow account cannot send or receive shares
    /// directly.
    #[error("account {0} is reserved")]
    ReservedAccount(AccountId),

    /// Deposits are allowlisted and the sender is not on the list.
    #[error("account {0} is not allowlisted")]
    NotAllowlisted(AccountId),

    /// Withdrawal requests must be worth at least the configured minimum.
    #[error("withdrawal worth {assets} is below the minimum {minimum}")]
    RequestBelowMinimum {
        /// Value of the request at the current rate.
        assets: u128,
        /// The configured floor.
        minimum: u128,
    },

    /// Liability rebalancing was requested on a pool without minting.
    #[error("liability rebalancing is not supported by this pool")]
    RebalancingNotSupported,

    /// A minting operation was called on a pool without minting.
    #[error("minting is not supported by this pool")]
    MintingNotSupported,

    /// No request with this id exists.
    #[error("unknown withdrawal request {0}")]
    UnknownRequest(u64),

    /// The request has not been finalized yet.
    #[error("withdrawal request {0} is not finalized")]
    NotFinalized(u64),

    /// The request was already claimed.
    #[error("withdrawal request {0} is already claimed")]
    AlreadyClaimed(u64),

    /// Not a single request qualified for finalization.
    #[error("no requests to finalize ({stop})")]
    NoRequestsToFinalize {
        /// Why the scan stopped at the first candidate.
        stop: StopReason,
    },

    /// Unauthorized: the caller lacks the capability.
    #[error("unauthorized: {account} lacks capability {capability}")]
    MissingCapability {
        /// The caller.
        account: AccountId,
        /// The capability the operation requires.
        capability: Capability,
    },

    /// Unauthorized: only the request owner may claim.
    #[error("unauthorized: {caller} does not own withdrawal request {request_id}")]
    NotRequestOwner {
        /// The request.
        request_id: u64,
        /// The caller.
        caller: AccountId,
    },

    /// The account cannot cure itself; use the loss-socializing path.
    #[error("account {0} is undercollateralized")]
    Undercollateralized(AccountId),

    /// Loss socialization is reserved for undercollateralized accounts.
    #[error("account {0} is not undercollateralized")]
    NotUndercollateralized(AccountId),

    /// The account is healthy or no liquidity is available.
    #[error("nothing to rebalance for account {0}")]
    NothingToRebalance(AccountId),

    /// Minting would exceed the account's capacity.
    #[error("minting capacity exceeded for {account}: mintable {mintable}, requested {requested}")]
    InsufficientMintingCapacity {
        /// The minting account.
        account: AccountId,
        /// Liability shares still mintable.
        mintable: u128,
        /// Liability shares requested.
        requested: u128,
    },

    /// Burning or rebalancing more liability than the account minted.
    #[error("insufficient minted liability for {account}: minted {minted}, requested {requested}")]
    InsufficientMintedShares {
        /// The account.
        account: AccountId,
        /// Liability shares minted by the account.
        minted: u128,
        /// Liability shares requested.
        requested: u128,
    },

    /// The account does not hold enough liability tokens to burn.
    #[error("insufficient liability tokens for {account}: held {held}, requested {requested}")]
    InsufficientLiabilityTokens {
        /// The account.
        account: AccountId,
        /// Tokens held in the requested form.
        held: u128,
        /// Tokens requested.
        requested: u128,
    },

    /// The unrecoverable part of a rebalance is above the socialization cap.
    #[error("loss socialization of {shortfall_bp} bp exceeds the {max_bp} bp cap")]
    ExcessiveLossSocialization {
        /// Shortfall relative to the required burn, in basis points (ceil).
        shortfall_bp: u128,
        /// Configured cap.
        max_bp: u128,
    },

    /// Gas cost coverage above the protocol ceiling.
    #[error("gas cost coverage {requested} exceeds the maximum {max}")]
    GasCostCoverageTooLarge {
        /// Requested coverage.
        requested: u128,
        /// Ceiling.
        max: u128,
    },

    /// A configuration or risk parameter is out of range.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A slash that would leave outstanding shares without backing.
    #[error("slash of {slash} would exhaust total assets {total_assets}")]
    SlashExceedsBacking {
        /// Current total assets.
        total_assets: u128,
        /// Requested slash magnitude.
        slash: u128,
    },

    /// Arithmetic failure.
    #[error("math error: {0}")]
    Math(#[from] MathError),
}
