//! # STV Pool
//!
//! [`StvPool`] is the single owned aggregate of the engine. It holds the
//! share ledger, the withdrawal queue, the minting engine (minting-capable
//! variant only), the access policy and the journal of records, and it is
//! the only place operations are exposed.
//!
//! Every operation:
//!
//! 1. checks the caller's capability, if it needs one;
//! 2. validates and prices everything against the [`Snapshot`] it was
//!    given, without writing;
//! 3. applies the changes and appends one record to the journal.
//!
//! A failure in step 1 or 2 leaves no trace. The operations are split over
//! three files: ledger and administration here, the withdrawal queue in
//! `withdrawals`, minting and forced rebalancing in `rebalance`.
//!
//! ## Sharing
//!
//! The pool is a plain value. Callers that need it from several threads
//! wrap it with [`StvPool::into_shared`], which serializes all operations
//! behind one `parking_lot::RwLock`.

mod rebalance;
mod withdrawals;

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::{AccessPolicy, Capability};
use crate::account::AccountId;
use crate::config::PoolConfig;
use crate::error::LedgerError;
use crate::events::{
    AllowlistUpdated, Deposited, LedgerEvent, RewardsAccrued, RoleChanged, Transfer,
    VaultParametersUpdated,
};
use crate::external::{ShareRate, Snapshot};
use crate::ledger::Ledger;
use crate::minting::MintingEngine;
use crate::queue::WithdrawalQueue;
use crate::rate::MathError;

/// A pool behind a shared lock.
pub type SharedPool = Arc<RwLock<StvPool>>;

/// Seed deposit made when the pool is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub holder: AccountId,
    pub assets: u128,
}

/// The pool aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StvPool {
    config: PoolConfig,
    ledger: Ledger,
    queue: WithdrawalQueue,
    minting: Option<MintingEngine>,
    access: AccessPolicy,
    allowlist: BTreeSet<AccountId>,
    journal: Vec<LedgerEvent>,
}

impl StvPool {
    /// Creates a pool, grants `Admin` to `admin` and mints the seed
    /// deposit at the fixed seed ratio.
    ///
    /// # Errors
    ///
    /// Configuration errors from [`PoolConfig::validate`],
    /// [`LedgerError::ZeroAmount`] for an empty seed.
    pub fn new(config: PoolConfig, admin: AccountId, genesis: Genesis) -> Result<Self, LedgerError> {
        config.validate()?;
        if genesis.assets == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        ensure_not_reserved(&genesis.holder)?;

        let minting = config
            .minting
            .as_ref()
            .map(|minting| MintingEngine::new(minting, config.max_loss_socialization_bp))
            .transpose()?;

        let mut ledger = Ledger::new();
        let stv = ledger.preview_deposit(genesis.assets)?;
        ledger.mint(&genesis.holder, stv, genesis.assets)?;

        let mut pool = Self {
            queue: WithdrawalQueue::new(config.min_withdrawal_delay_secs, config.gas_cost_coverage),
            config,
            ledger,
            minting,
            access: AccessPolicy::with_admin(admin),
            allowlist: BTreeSet::new(),
            journal: Vec::new(),
        };

        pool.record(LedgerEvent::Deposited(Deposited {
            sender: genesis.holder.clone(),
            recipient: genesis.holder,
            referral: None,
            assets: genesis.assets,
            stv,
        }));
        if let Some(engine) = &pool.minting {
            let updated = VaultParametersUpdated {
                vault: engine.vault_parameters(),
                pool: engine.parameters(),
            };
            pool.record(LedgerEvent::VaultParametersUpdated(updated));
        }

        info!(
            seed_assets = %genesis.assets,
            seed_stv = %stv,
            minting = pool.minting.is_some(),
            "pool created"
        );
        Ok(pool)
    }

    /// Wraps the pool for shared use.
    pub fn into_shared(self) -> SharedPool {
        Arc::new(RwLock::new(self))
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn queue(&self) -> &WithdrawalQueue {
        &self.queue
    }

    pub fn minting(&self) -> Option<&MintingEngine> {
        self.minting.as_ref()
    }

    pub fn access(&self) -> &AccessPolicy {
        &self.access
    }

    pub fn is_minting_supported(&self) -> bool {
        self.minting.is_some()
    }

    // -----------------------------------------------------------------------
    // Journal
    // -----------------------------------------------------------------------

    /// Records emitted since creation or the last drain.
    pub fn events(&self) -> &[LedgerEvent] {
        &self.journal
    }

    /// Takes the journal, leaving it empty.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.journal)
    }

    fn record(&mut self, event: LedgerEvent) {
        debug!(event = event.name(), "record");
        self.journal.push(event);
    }

    // -----------------------------------------------------------------------
    // Ledger views
    // -----------------------------------------------------------------------

    pub fn total_supply(&self) -> u128 {
        self.ledger.total_supply()
    }

    pub fn total_assets(&self) -> u128 {
        self.ledger.total_assets()
    }

    pub fn balance_of(&self, account: &AccountId) -> u128 {
        self.ledger.balance_of(account)
    }

    pub fn assets_of(&self, account: &AccountId) -> Result<u128, MathError> {
        self.ledger.assets_of(account)
    }

    pub fn preview_deposit(&self, assets: u128) -> Result<u128, MathError> {
        self.ledger.preview_deposit(assets)
    }

    pub fn preview_redeem(&self, stv: u128) -> Result<u128, MathError> {
        self.ledger.preview_redeem(stv)
    }

    pub fn preview_withdraw(&self, assets: u128) -> Result<u128, MathError> {
        self.ledger.preview_withdraw(assets)
    }

    pub fn is_allowlisted(&self, account: &AccountId) -> bool {
        self.allowlist.contains(account)
    }

    // -----------------------------------------------------------------------
    // Ledger operations
    // -----------------------------------------------------------------------

    /// Deposits `assets` from `sender` and mints pool shares to
    /// `recipient`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ZeroAmount`], [`LedgerError::NotAllowlisted`],
    /// [`LedgerError::BadDebt`], [`LedgerError::ZeroShares`].
    pub fn deposit(
        &mut self,
        sender: &AccountId,
        recipient: &AccountId,
        referral: Option<AccountId>,
        assets: u128,
        snapshot: &Snapshot,
    ) -> Result<Deposited, LedgerError> {
        if assets == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        ensure_not_reserved(recipient)?;
        if self.config.allowlist_enabled && !self.allowlist.contains(sender) {
            return Err(LedgerError::NotAllowlisted(sender.clone()));
        }
        if let Some(engine) = &self.minting {
            engine.ensure_no_bad_debt(snapshot.total_value, &snapshot.share_rate)?;
        }

        let stv = self.ledger.preview_deposit(assets)?;
        if stv == 0 {
            return Err(LedgerError::ZeroShares { assets });
        }
        self.ledger.mint(recipient, stv, assets)?;

        debug!(
            sender = %sender,
            recipient = %recipient,
            assets = %assets,
            stv = %stv,
            "deposit"
        );
        let deposited = Deposited {
            sender: sender.clone(),
            recipient: recipient.clone(),
            referral,
            assets,
            stv,
        };
        self.record(LedgerEvent::Deposited(deposited.clone()));
        Ok(deposited)
    }

    /// Moves pool shares between holders. The sender must keep enough
    /// shares to back any liability it has minted.
    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        stv: u128,
        snapshot: &Snapshot,
    ) -> Result<Transfer, LedgerError> {
        if stv == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        ensure_not_reserved(from)?;
        ensure_not_reserved(to)?;
        let minted = self.minted_liability_shares_of(from);
        self.ensure_unlocked(from, stv, minted, &snapshot.share_rate)?;

        self.ledger.transfer(from, to, stv)?;

        let transfer = Transfer {
            from: from.clone(),
            to: to.clone(),
            stv,
        };
        self.record(LedgerEvent::Transfer(transfer.clone()));
        Ok(transfer)
    }

    /// Applies an oracle-reported reward (positive) or slash (negative) to
    /// the backing. Share supply is unchanged, so the share price moves.
    pub fn accrue_reward_or_slash(&mut self, delta: i128) -> Result<RewardsAccrued, LedgerError> {
        let total_assets = self.ledger.adjust_assets(delta)?;

        info!(delta = %delta, total_assets = %total_assets, "backing adjusted");
        let accrued = RewardsAccrued {
            delta,
            total_assets,
        };
        self.record(LedgerEvent::RewardsAccrued(accrued.clone()));
        Ok(accrued)
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Grants `capability` to `account`. Returns `false` (and records
    /// nothing) if it was already held.
    pub fn grant_role(
        &mut self,
        admin: &AccountId,
        account: &AccountId,
        capability: Capability,
    ) -> Result<bool, LedgerError> {
        let changed = self.access.grant(admin, account.clone(), capability)?;
        if changed {
            info!(account = %account, capability = %capability, "capability granted");
            self.record(LedgerEvent::RoleGranted(RoleChanged {
                admin: admin.clone(),
                account: account.clone(),
                capability,
            }));
        }
        Ok(changed)
    }

    /// Revokes `capability` from `account`. Returns `false` (and records
    /// nothing) if it was not held.
    pub fn revoke_role(
        &mut self,
        admin: &AccountId,
        account: &AccountId,
        capability: Capability,
    ) -> Result<bool, LedgerError> {
        let changed = self.access.revoke(admin, account, capability)?;
        if changed {
            info!(account = %account, capability = %capability, "capability revoked");
            self.record(LedgerEvent::RoleRevoked(RoleChanged {
                admin: admin.clone(),
                account: account.clone(),
                capability,
            }));
        }
        Ok(changed)
    }

    /// Adds or removes `account` from the deposit allowlist.
    pub fn set_allowlisted(
        &mut self,
        admin: &AccountId,
        account: &AccountId,
        allowed: bool,
    ) -> Result<AllowlistUpdated, LedgerError> {
        self.access.require(admin, Capability::Admin)?;
        if allowed {
            self.allowlist.insert(account.clone());
        } else {
            self.allowlist.remove(account);
        }

        let updated = AllowlistUpdated {
            admin: admin.clone(),
            account: account.clone(),
            allowed,
        };
        self.record(LedgerEvent::AllowlistUpdated(updated.clone()));
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Shared checks
    // -----------------------------------------------------------------------

    /// Fails unless `account` can part with `stv` shares while still
    /// backing `minted_after` liability shares.
    fn ensure_unlocked(
        &self,
        account: &AccountId,
        stv: u128,
        minted_after: u128,
        rate: &ShareRate,
    ) -> Result<(), LedgerError> {
        let balance = self.ledger.balance_of(account);
        if stv > balance {
            return Err(LedgerError::InsufficientBalance {
                account: account.clone(),
                available: balance,
                requested: stv,
            });
        }
        if let Some(engine) = &self.minting {
            let unlocked = engine.unlocked_stv(account, minted_after, &self.ledger, rate)?;
            if stv > unlocked {
                return Err(LedgerError::InsufficientUnlockedBalance {
                    account: account.clone(),
                    unlocked,
                    requested: stv,
                });
            }
        }
        Ok(())
    }

    fn engine(&self) -> Result<&MintingEngine, LedgerError> {
        self.minting.as_ref().ok_or(LedgerError::MintingNotSupported)
    }

    fn engine_mut(&mut self) -> Result<&mut MintingEngine, LedgerError> {
        self.minting.as_mut().ok_or(LedgerError::MintingNotSupported)
    }
}

fn ensure_not_reserved(account: &AccountId) -> Result<(), LedgerError> {
    if account.as_str() == AccountId::WITHDRAWAL_QUEUE {
        return Err(LedgerError::ReservedAccount(account.clone()));
    }
    Ok(())
}
