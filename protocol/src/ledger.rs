//! # Vault Ledger
//!
//! The share ledger of the pool: total supply of pool shares ("stv"), the
//! nominal assets backing them, and per-account share balances. The
//! withdrawal queue's escrow is an ordinary balance held under
//! [`AccountId::withdrawal_queue`].
//!
//! The ledger enforces two invariants on every mutation:
//!
//! - the balances always sum to `total_supply`;
//! - `total_assets == 0` implies `total_supply == 0`; a slash that would
//!   empty the backing of outstanding shares is rejected.
//!
//! Every mutator validates first and writes last, so an `Err` leaves the
//! ledger unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::error::LedgerError;
use crate::rate::{self, MathError, Pricing, Rounding};

/// Supply, backing and share balances.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ledger {
    total_supply: u128,
    total_assets: u128,
    balances: BTreeMap<AccountId, u128>,
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn total_assets(&self) -> u128 {
        self.total_assets
    }

    /// Share balance of `account`; zero for unknown accounts.
    pub fn balance_of(&self, account: &AccountId) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Accounts with a nonzero balance, in id order.
    pub fn holders(&self) -> impl Iterator<Item = (&AccountId, u128)> {
        self.balances.iter().map(|(account, stv)| (account, *stv))
    }

    /// Pricing at the current totals.
    pub fn pricing(&self) -> Pricing {
        Pricing {
            total_assets: self.total_assets,
            total_supply: self.total_supply,
        }
    }

    // -----------------------------------------------------------------------
    // Previews
    // -----------------------------------------------------------------------

    /// Shares a deposit of `assets` would mint (floor).
    pub fn preview_deposit(&self, assets: u128) -> Result<u128, MathError> {
        self.pricing().stv_for_deposit(assets)
    }

    /// Assets `stv` shares redeem for (floor).
    pub fn preview_redeem(&self, stv: u128) -> Result<u128, MathError> {
        self.pricing().assets_for_stv(stv, Rounding::Down)
    }

    /// Shares that must be given up to withdraw `assets` (ceiling).
    pub fn preview_withdraw(&self, assets: u128) -> Result<u128, MathError> {
        self.pricing().stv_for_assets(assets, Rounding::Up)
    }

    /// Current redemption value of the account's whole balance.
    pub fn assets_of(&self, account: &AccountId) -> Result<u128, MathError> {
        self.preview_redeem(self.balance_of(account))
    }

    /// Assets per share scaled by `E36`.
    pub fn stv_rate(&self) -> Result<u128, MathError> {
        self.pricing().stv_rate()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Credits `stv` new shares to `account` against `assets` of new backing.
    pub fn mint(&mut self, account: &AccountId, stv: u128, assets: u128) -> Result<(), LedgerError> {
        let total_supply = rate::add(self.total_supply, stv)?;
        let total_assets = rate::add(self.total_assets, assets)?;
        let balance = rate::add(self.balance_of(account), stv)?;

        self.total_supply = total_supply;
        self.total_assets = total_assets;
        self.balances.insert(account.clone(), balance);
        Ok(())
    }

    /// Destroys `stv` of the account's shares and removes `assets` of
    /// backing. The two amounts are independent: the caller decides how
    /// much backing leaves with the shares.
    pub fn burn(&mut self, account: &AccountId, stv: u128, assets: u128) -> Result<(), LedgerError> {
        let balance = self.checked_debit(account, stv)?;
        let total_supply = rate::sub(self.total_supply, stv)?;
        let total_assets = rate::sub(self.total_assets, assets)?;

        self.total_supply = total_supply;
        self.total_assets = total_assets;
        self.set_balance(account, balance);
        Ok(())
    }

    /// Moves `stv` shares between accounts.
    pub fn transfer(&mut self, from: &AccountId, to: &AccountId, stv: u128) -> Result<(), LedgerError> {
        if from == to {
            self.checked_debit(from, stv)?;
            return Ok(());
        }
        let from_balance = self.checked_debit(from, stv)?;
        let to_balance = rate::add(self.balance_of(to), stv)?;

        self.set_balance(from, from_balance);
        self.balances.insert(to.clone(), to_balance);
        Ok(())
    }

    /// Applies a signed change to the backing without touching supply.
    /// Returns the new `total_assets`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::SlashExceedsBacking`] when the slash would take
    /// `total_assets` to zero or below while shares are outstanding.
    pub fn adjust_assets(&mut self, delta: i128) -> Result<u128, LedgerError> {
        let magnitude = delta.unsigned_abs();
        let exhausted = LedgerError::SlashExceedsBacking {
            total_assets: self.total_assets,
            slash: magnitude,
        };
        let total_assets = if delta >= 0 {
            rate::add(self.total_assets, magnitude)?
        } else {
            match self.total_assets.checked_sub(magnitude) {
                Some(0) if self.total_supply > 0 => return Err(exhausted),
                Some(remaining) => remaining,
                None => return Err(exhausted),
            }
        };
        self.total_assets = total_assets;
        Ok(total_assets)
    }

    /// New balance of `account` after debiting `stv`, without writing it.
    fn checked_debit(&self, account: &AccountId, stv: u128) -> Result<u128, LedgerError> {
        let available = self.balance_of(account);
        available
            .checked_sub(stv)
            .ok_or_else(|| LedgerError::InsufficientBalance {
                account: account.clone(),
                available,
                requested: stv,
            })
    }

    fn set_balance(&mut self, account: &AccountId, balance: u128) {
        if balance == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(account.clone(), balance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH: u128 = 1_000_000_000_000_000_000;

    fn alice() -> AccountId {
        AccountId::from("alice")
    }

    fn bob() -> AccountId {
        AccountId::from("bob")
    }

    fn seeded() -> Ledger {
        let mut ledger = Ledger::new();
        let stv = ledger.preview_deposit(ETH).unwrap();
        ledger.mint(&alice(), stv, ETH).unwrap();
        ledger
    }

    #[test]
    fn seed_mint_uses_fixed_ratio() {
        let ledger = seeded();
        assert_eq!(ledger.total_supply(), ETH * 1_000_000_000);
        assert_eq!(ledger.total_assets(), ETH);
        assert_eq!(ledger.balance_of(&alice()), ledger.total_supply());
    }

    #[test]
    fn previews_round_against_the_caller() {
        let mut ledger = seeded();
        ledger.adjust_assets(1).unwrap(); // 1e18 + 1 assets behind 1e27 shares

        let stv = ledger.preview_withdraw(ETH / 2).unwrap();
        assert!(ledger.preview_redeem(stv).unwrap() >= ETH / 2);
        let redeemed = ledger.preview_redeem(1_000_000_000).unwrap();
        assert_eq!(redeemed, 1);
    }

    #[test]
    fn transfer_moves_shares_and_keeps_supply() {
        let mut ledger = seeded();
        ledger.transfer(&alice(), &bob(), 10).unwrap();
        assert_eq!(ledger.balance_of(&bob()), 10);
        let sum: u128 = ledger.holders().map(|(_, stv)| stv).sum();
        assert_eq!(sum, ledger.total_supply());
    }

    #[test]
    fn overdraft_leaves_ledger_untouched() {
        let mut ledger = seeded();
        let before = ledger.balance_of(&alice());
        let err = ledger.burn(&alice(), before + 1, 0).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance_of(&alice()), before);
        assert_eq!(ledger.total_supply(), before);
    }

    #[test]
    fn slash_larger_than_backing_rejected() {
        let mut ledger = seeded();
        let err = ledger.adjust_assets(-(ETH as i128) - 1).unwrap_err();
        assert!(matches!(err, LedgerError::SlashExceedsBacking { .. }));
        assert_eq!(ledger.total_assets(), ETH);

        assert_eq!(ledger.adjust_assets(-(ETH as i128) / 2).unwrap(), ETH / 2);
    }

    #[test]
    fn slash_cannot_empty_backing_of_live_shares() {
        let mut ledger = seeded();
        let err = ledger.adjust_assets(-(ETH as i128)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::SlashExceedsBacking { total_assets: ETH, slash: ETH }
        ));
        assert_eq!(ledger.total_assets(), ETH);

        // still priced, still open for deposits
        assert_eq!(ledger.preview_deposit(ETH).unwrap(), ETH * 1_000_000_000);
        assert_eq!(ledger.adjust_assets(-(ETH as i128) + 1).unwrap(), 1);
    }

    #[test]
    fn emptied_accounts_disappear() {
        let mut ledger = seeded();
        let all = ledger.balance_of(&alice());
        ledger.burn(&alice(), all, ETH).unwrap();
        assert_eq!(ledger.holders().count(), 0);
        assert_eq!(ledger.total_assets(), 0);
        assert_eq!(ledger.total_supply(), 0);
    }
}
