//! The transactional storage contract consumed by the consensus core.
//!
//! The core never talks to a database directly; it drives this trait and the
//! repository's savepoint discipline. An in-memory reference implementation
//! lives in `ember-state`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::{Account, ApprovalGroup, ForgingDelegation, GroupId};
use crate::amount::{Amount, AssetId};
use crate::at::AtState;
use crate::block::Block;
use crate::transaction::{ApprovalStatus, Transaction};
use ember_crypto::{PublicKey, Signature};

/// Storage-level failure. Strictly separate from validation outcomes, which
/// are data; a `RepositoryError` propagates up through validate/process/
/// orphan and is handled at the forging loop's outermost scope.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("arithmetic overflow in ledger math")]
    ArithmeticOverflow,

    #[error("illegal ledger state: {0}")]
    IllegalState(String),
}

/// Confirmation and approval metadata kept alongside a stored transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMeta {
    /// Height of the containing block, `None` while unconfirmed.
    pub height: Option<u32>,
    /// Composite signature of the containing block.
    pub block_signature: Option<Vec<u8>>,
    pub approval: ApprovalStatus,
    /// Height at which the approval sweep resolved this transaction.
    pub resolution_height: Option<u32>,
}

impl TransactionMeta {
    pub fn unconfirmed() -> Self {
        TransactionMeta {
            height: None,
            block_signature: None,
            approval: ApprovalStatus::NotRequired,
            resolution_height: None,
        }
    }
}

/// One recorded approval vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalVoteRecord {
    pub voter: String,
    pub in_favour: bool,
}

/// Per-entity accessors plus savepoint/rollback/commit control.
///
/// Mutating methods only touch the repository's working state; nothing is
/// durable until [`Repository::commit`]. `process`/`orphan` are atomic with
/// respect to that commit boundary: the caller commits once afterwards.
pub trait Repository {
    // --- blocks ---
    fn chain_height(&self) -> Result<u32, RepositoryError>;
    fn block_by_height(&self, height: u32) -> Result<Option<Block>, RepositoryError>;
    fn block_by_signature(&self, signature: &[u8]) -> Result<Option<Block>, RepositoryError>;
    /// The block whose reference equals `signature`, if any (child lookup).
    fn child_of(&self, signature: &[u8]) -> Result<Option<Block>, RepositoryError>;
    fn block_transactions(&self, signature: &[u8]) -> Result<Vec<Transaction>, RepositoryError>;
    fn save_block(&mut self, block: &Block) -> Result<(), RepositoryError>;
    fn delete_block(&mut self, signature: &[u8]) -> Result<(), RepositoryError>;

    // --- transactions ---
    fn transaction_by_signature(
        &self,
        signature: &Signature,
    ) -> Result<Option<Transaction>, RepositoryError>;
    fn transaction_meta(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionMeta>, RepositoryError>;
    /// Insert or refresh a transaction record. New records start unconfirmed.
    fn save_transaction(&mut self, transaction: &Transaction) -> Result<(), RepositoryError>;
    fn delete_transaction(&mut self, signature: &Signature) -> Result<(), RepositoryError>;
    /// Link (or with `None`, unlink) a transaction to a containing block.
    fn set_transaction_block(
        &mut self,
        signature: &Signature,
        block_signature: Option<Vec<u8>>,
        height: Option<u32>,
    ) -> Result<(), RepositoryError>;
    fn set_approval_status(
        &mut self,
        signature: &Signature,
        status: ApprovalStatus,
        resolution_height: Option<u32>,
    ) -> Result<(), RepositoryError>;
    /// Unconfirmed transactions in pool order (timestamp, then signature).
    fn unconfirmed_transactions(&self) -> Result<Vec<Transaction>, RepositoryError>;
    /// Confirmed transactions still awaiting group approval, in pool order.
    fn approval_pending(&self) -> Result<Vec<Transaction>, RepositoryError>;
    /// Transactions whose approval was resolved at exactly this height.
    fn transactions_resolved_at(&self, height: u32) -> Result<Vec<Transaction>, RepositoryError>;
    fn add_approval_vote(
        &mut self,
        pending: &Signature,
        voter: String,
        in_favour: bool,
    ) -> Result<(), RepositoryError>;
    fn remove_approval_vote(
        &mut self,
        pending: &Signature,
        voter: &str,
    ) -> Result<(), RepositoryError>;
    fn approval_votes(
        &self,
        pending: &Signature,
    ) -> Result<Vec<ApprovalVoteRecord>, RepositoryError>;
    fn save_participants(
        &mut self,
        signature: &Signature,
        addresses: &[String],
    ) -> Result<(), RepositoryError>;
    fn delete_participants(&mut self, signature: &Signature) -> Result<(), RepositoryError>;
    /// Address-indexed lookup over saved participant lists.
    fn transactions_for_address(
        &self,
        address: &str,
    ) -> Result<Vec<Signature>, RepositoryError>;

    // --- AT state ---
    fn at_states_at_height(&self, height: u32) -> Result<Vec<AtState>, RepositoryError>;
    /// Persist one AT-state record, keyed by `state.height`.
    fn save_at_state(&mut self, state: &AtState) -> Result<(), RepositoryError>;
    fn delete_at_states_at_height(&mut self, height: u32) -> Result<(), RepositoryError>;

    // --- accounts ---
    fn account(&self, address: &str) -> Result<Option<Account>, RepositoryError>;
    fn confirmed_balance(
        &self,
        address: &str,
        asset: AssetId,
    ) -> Result<Amount, RepositoryError>;
    fn set_confirmed_balance(
        &mut self,
        address: &str,
        asset: AssetId,
        balance: Amount,
    ) -> Result<(), RepositoryError>;
    fn last_reference(&self, address: &str) -> Result<Option<Signature>, RepositoryError>;
    /// Record the public key behind an address once it is seen on-chain.
    fn set_public_key(
        &mut self,
        address: &str,
        key: &PublicKey,
    ) -> Result<(), RepositoryError>;
    fn set_last_reference(
        &mut self,
        address: &str,
        reference: Option<Signature>,
    ) -> Result<(), RepositoryError>;
    fn delegation(
        &self,
        generator: &PublicKey,
    ) -> Result<Option<ForgingDelegation>, RepositoryError>;
    fn set_delegation(
        &mut self,
        generator: &PublicKey,
        delegation: Option<ForgingDelegation>,
    ) -> Result<(), RepositoryError>;
    fn group(&self, id: GroupId) -> Result<Option<ApprovalGroup>, RepositoryError>;
    fn save_group(&mut self, group: &ApprovalGroup) -> Result<(), RepositoryError>;

    // --- transactional control ---
    fn begin_savepoint(&mut self) -> Result<(), RepositoryError>;
    fn rollback_savepoint(&mut self) -> Result<(), RepositoryError>;
    /// Make all working changes durable and drop open savepoints.
    fn commit(&mut self) -> Result<(), RepositoryError>;
    /// Drop all uncommitted working changes.
    fn discard(&mut self) -> Result<(), RepositoryError>;
}

/// RAII savepoint for speculative processing during validation.
///
/// Opens a savepoint on construction and rolls it back when dropped, on
/// every exit path: normal return, early return, or error unwind.
/// Validation must never leave persisted side effects.
pub struct SpeculativeScope<'a> {
    repo: &'a mut dyn Repository,
}

impl<'a> SpeculativeScope<'a> {
    pub fn begin(repo: &'a mut dyn Repository) -> Result<Self, RepositoryError> {
        repo.begin_savepoint()?;
        Ok(SpeculativeScope { repo })
    }

    pub fn repo(&mut self) -> &mut dyn Repository {
        self.repo
    }
}

impl Drop for SpeculativeScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.repo.rollback_savepoint() {
            log::error!("failed to roll back speculative savepoint: {e}");
        }
    }
}

/// Credit an account balance, creating the account if needed.
pub fn credit(
    repo: &mut dyn Repository,
    address: &str,
    asset: AssetId,
    amount: Amount,
) -> Result<(), RepositoryError> {
    let balance = repo.confirmed_balance(address, asset)?;
    let updated = balance
        .checked_add(amount)
        .ok_or(RepositoryError::ArithmeticOverflow)?;
    repo.set_confirmed_balance(address, asset, updated)
}

/// Debit an account balance. Driving a confirmed balance negative is an
/// illegal-state failure: validation is supposed to have excluded it.
pub fn debit(
    repo: &mut dyn Repository,
    address: &str,
    asset: AssetId,
    amount: Amount,
) -> Result<(), RepositoryError> {
    let balance = repo.confirmed_balance(address, asset)?;
    let updated = balance
        .checked_sub(amount)
        .ok_or(RepositoryError::ArithmeticOverflow)?;
    if updated.is_negative() {
        return Err(RepositoryError::IllegalState(format!(
            "debit of {amount} would leave {address} asset {asset} at {updated}"
        )));
    }
    repo.set_confirmed_balance(address, asset, updated)
}
