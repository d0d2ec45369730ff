//! # Access Policy
//!
//! Privileged operations check a single capability at entry through
//! [`AccessPolicy::require`]. Capabilities are granted per account and are
//! independent: holding [`Capability::Admin`] lets an account grant and
//! revoke capabilities, it does not let it finalize or socialize losses
//! itself.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::error::LedgerError;

/// A privileged capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Finalize queued withdrawal requests.
    Finalize,
    /// Change the flat per-request gas cost coverage.
    SetGasCostCoverage,
    /// Force-rebalance undercollateralized accounts with loss socialization.
    SocializeLoss,
    /// Grant and revoke capabilities, manage the allowlist and risk limits.
    Admin,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Finalize => write!(f, "finalize"),
            Capability::SetGasCostCoverage => write!(f, "set-gas-cost-coverage"),
            Capability::SocializeLoss => write!(f, "socialize-loss"),
            Capability::Admin => write!(f, "admin"),
        }
    }
}

/// Capability grants keyed by account.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    grants: HashMap<AccountId, BTreeSet<Capability>>,
}

impl AccessPolicy {
    /// Creates a policy whose only grant is `Admin` to `admin`.
    pub fn with_admin(admin: AccountId) -> Self {
        let mut policy = Self::default();
        policy.insert(admin, Capability::Admin);
        policy
    }

    /// Returns `true` if `account` holds `capability`.
    pub fn has(&self, account: &AccountId, capability: Capability) -> bool {
        self.grants
            .get(account)
            .is_some_and(|caps| caps.contains(&capability))
    }

    /// Fails with [`LedgerError::MissingCapability`] unless `account` holds
    /// `capability`.
    pub fn require(&self, account: &AccountId, capability: Capability) -> Result<(), LedgerError> {
        if self.has(account, capability) {
            Ok(())
        } else {
            Err(LedgerError::MissingCapability {
                account: account.clone(),
                capability,
            })
        }
    }

    /// Grants `capability` to `account` on behalf of `admin`. Returns
    /// `false` if the account already held it.
    pub fn grant(
        &mut self,
        admin: &AccountId,
        account: AccountId,
        capability: Capability,
    ) -> Result<bool, LedgerError> {
        self.require(admin, Capability::Admin)?;
        Ok(self.insert(account, capability))
    }

    /// Revokes `capability` from `account` on behalf of `admin`. Returns
    /// `false` if the account did not hold it.
    pub fn revoke(
        &mut self,
        admin: &AccountId,
        account: &AccountId,
        capability: Capability,
    ) -> Result<bool, LedgerError> {
        self.require(admin, Capability::Admin)?;
        let removed = match self.grants.get_mut(account) {
            Some(caps) => caps.remove(&capability),
            None => false,
        };
        if self.grants.get(account).is_some_and(BTreeSet::is_empty) {
            self.grants.remove(account);
        }
        Ok(removed)
    }

    /// Accounts currently holding `capability`, sorted.
    pub fn holders(&self, capability: Capability) -> Vec<AccountId> {
        let mut holders: Vec<AccountId> = self
            .grants
            .iter()
            .filter(|(_, caps)| caps.contains(&capability))
            .map(|(account, _)| account.clone())
            .collect();
        holders.sort();
        holders
    }

    fn insert(&mut self, account: AccountId, capability: Capability) -> bool {
        self.grants.entry(account).or_default().insert(capability)
    }
}
