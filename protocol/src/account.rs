//! Account identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque account identifier (an address, a key fingerprint, a test label).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Reserved account holding shares escrowed by pending withdrawals and
    /// liability shares carried by co-rebalancing requests.
    pub const WITHDRAWAL_QUEUE: &'static str = "@withdrawal-queue";

    /// Creates an identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The withdrawal queue's own account.
    pub fn withdrawal_queue() -> Self {
        Self::new(Self::WITHDRAWAL_QUEUE)
    }

    /// Borrows the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
