use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::amount::{Amount, AssetId};
use ember_crypto::{PublicKey, Signature};

/// Identifier of an approval group.
pub type GroupId = u32;

/// A ledger account.
///
/// Mutated only through transaction process/orphan and block reward
/// distribution; validation never writes to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    /// Known once the account has authored a transaction.
    pub public_key: Option<PublicKey>,
    /// Signature of the account's most recent transaction; the next
    /// transaction must reference it exactly.
    pub last_reference: Option<Signature>,
    /// Confirmed balance per asset.
    pub balances: BTreeMap<AssetId, Amount>,
}

impl Account {
    pub fn new(address: String) -> Self {
        Account {
            address,
            public_key: None,
            last_reference: None,
            balances: BTreeMap::new(),
        }
    }

    pub fn balance(&self, asset: AssetId) -> Amount {
        self.balances.get(&asset).copied().unwrap_or(Amount::ZERO)
    }
}

/// A proxy-forge delegation: rewards and fees earned by `generator` are
/// split with `delegate_address`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgingDelegation {
    pub delegate_address: String,
    /// Delegate's percentage, 0-100. The delegate share rounds down.
    pub share_percent: u8,
}

/// A governing group whose member transactions require threshold approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGroup {
    pub id: GroupId,
    pub name: String,
    /// In-favour admin votes required for approval.
    pub approval_threshold: u32,
    /// Blocks after inclusion before the sweep may resolve the transaction.
    pub min_block_delay: u32,
    /// Blocks after inclusion at which a pending transaction expires.
    pub max_block_delay: u32,
    /// Addresses allowed to vote.
    pub admins: Vec<String>,
}

impl ApprovalGroup {
    pub fn is_admin(&self, address: &str) -> bool {
        self.admins.iter().any(|a| a == address)
    }
}
