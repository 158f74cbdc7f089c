//! In-memory repository with copy-on-savepoint semantics.
//!
//! The full table set is cloned when a savepoint opens; rollback restores
//! the clone wholesale. Cheap for the table sizes validation works with,
//! and it makes the savepoint contract trivially correct.

use std::collections::{BTreeMap, HashMap};

use ember_core::account::{Account, ApprovalGroup, ForgingDelegation, GroupId};
use ember_core::amount::{Amount, AssetId};
use ember_core::at::AtState;
use ember_core::block::Block;
use ember_core::repository::{
    ApprovalVoteRecord, Repository, RepositoryError, TransactionMeta,
};
use ember_core::transaction::{ApprovalStatus, Transaction};
use ember_crypto::{PublicKey, Signature};

#[derive(Clone, Default)]
struct Tables {
    blocks_by_signature: HashMap<Vec<u8>, Block>,
    signature_by_height: BTreeMap<u32, Vec<u8>>,
    transactions: HashMap<Signature, Transaction>,
    meta: HashMap<Signature, TransactionMeta>,
    votes: HashMap<Signature, Vec<ApprovalVoteRecord>>,
    participants: HashMap<Signature, Vec<String>>,
    at_states: BTreeMap<u32, Vec<AtState>>,
    accounts: HashMap<String, Account>,
    delegations: HashMap<PublicKey, ForgingDelegation>,
    groups: HashMap<GroupId, ApprovalGroup>,
}

/// In-memory [`Repository`]. Working state diverges from the committed
/// baseline until `commit` or `discard`; savepoints stack on top of the
/// working state.
#[derive(Default)]
pub struct MemoryRepository {
    committed: Tables,
    working: Tables,
    savepoints: Vec<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        MemoryRepository::default()
    }

    pub fn open_savepoints(&self) -> usize {
        self.savepoints.len()
    }

    fn require_meta(&mut self, signature: &Signature) -> Result<&mut TransactionMeta, RepositoryError> {
        self.working.meta.get_mut(signature).ok_or_else(|| {
            RepositoryError::IllegalState(format!(
                "no metadata for transaction {}",
                hex::encode(&signature.0[..8])
            ))
        })
    }

    fn pool_sorted(&self, mut txs: Vec<Transaction>) -> Vec<Transaction> {
        txs.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.require_signature().0.cmp(&b.require_signature().0))
        });
        txs
    }
}

impl Repository for MemoryRepository {
    fn chain_height(&self) -> Result<u32, RepositoryError> {
        Ok(self
            .working
            .signature_by_height
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    fn block_by_height(&self, height: u32) -> Result<Option<Block>, RepositoryError> {
        Ok(self
            .working
            .signature_by_height
            .get(&height)
            .and_then(|sig| self.working.blocks_by_signature.get(sig))
            .cloned())
    }

    fn block_by_signature(&self, signature: &[u8]) -> Result<Option<Block>, RepositoryError> {
        Ok(self.working.blocks_by_signature.get(signature).cloned())
    }

    fn child_of(&self, signature: &[u8]) -> Result<Option<Block>, RepositoryError> {
        Ok(self
            .working
            .blocks_by_signature
            .values()
            .find(|b| b.reference() == signature)
            .cloned())
    }

    fn block_transactions(&self, signature: &[u8]) -> Result<Vec<Transaction>, RepositoryError> {
        Ok(self
            .working
            .blocks_by_signature
            .get(signature)
            .map(|b| b.transactions().to_vec())
            .unwrap_or_default())
    }

    fn save_block(&mut self, block: &Block) -> Result<(), RepositoryError> {
        let height = block.height().ok_or_else(|| {
            RepositoryError::IllegalState("saving a block without a height".into())
        })?;
        let signature = block.signature();
        self.working
            .signature_by_height
            .insert(height, signature.clone());
        self.working
            .blocks_by_signature
            .insert(signature, block.clone());
        Ok(())
    }

    fn delete_block(&mut self, signature: &[u8]) -> Result<(), RepositoryError> {
        if let Some(block) = self.working.blocks_by_signature.remove(signature) {
            if let Some(height) = block.height() {
                self.working.signature_by_height.remove(&height);
            }
        }
        Ok(())
    }

    fn transaction_by_signature(
        &self,
        signature: &Signature,
    ) -> Result<Option<Transaction>, RepositoryError> {
        Ok(self.working.transactions.get(signature).cloned())
    }

    fn transaction_meta(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionMeta>, RepositoryError> {
        Ok(self.working.meta.get(signature).cloned())
    }

    fn save_transaction(&mut self, transaction: &Transaction) -> Result<(), RepositoryError> {
        let signature = *transaction.require_signature();
        self.working.transactions.insert(signature, transaction.clone());
        self.working
            .meta
            .entry(signature)
            .or_insert_with(TransactionMeta::unconfirmed);
        Ok(())
    }

    fn delete_transaction(&mut self, signature: &Signature) -> Result<(), RepositoryError> {
        self.working.transactions.remove(signature);
        self.working.meta.remove(signature);
        self.working.votes.remove(signature);
        Ok(())
    }

    fn set_transaction_block(
        &mut self,
        signature: &Signature,
        block_signature: Option<Vec<u8>>,
        height: Option<u32>,
    ) -> Result<(), RepositoryError> {
        let meta = self.require_meta(signature)?;
        meta.block_signature = block_signature;
        meta.height = height;
        Ok(())
    }

    fn set_approval_status(
        &mut self,
        signature: &Signature,
        status: ApprovalStatus,
        resolution_height: Option<u32>,
    ) -> Result<(), RepositoryError> {
        let meta = self.require_meta(signature)?;
        meta.approval = status;
        meta.resolution_height = resolution_height;
        Ok(())
    }

    fn unconfirmed_transactions(&self) -> Result<Vec<Transaction>, RepositoryError> {
        let txs = self
            .working
            .meta
            .iter()
            .filter(|(_, m)| m.height.is_none())
            .filter_map(|(sig, _)| self.working.transactions.get(sig).cloned())
            .collect();
        Ok(self.pool_sorted(txs))
    }

    fn approval_pending(&self) -> Result<Vec<Transaction>, RepositoryError> {
        let txs = self
            .working
            .meta
            .iter()
            .filter(|(_, m)| m.approval == ApprovalStatus::Pending)
            .filter_map(|(sig, _)| self.working.transactions.get(sig).cloned())
            .collect();
        Ok(self.pool_sorted(txs))
    }

    fn transactions_resolved_at(&self, height: u32) -> Result<Vec<Transaction>, RepositoryError> {
        let txs = self
            .working
            .meta
            .iter()
            .filter(|(_, m)| m.resolution_height == Some(height))
            .filter_map(|(sig, _)| self.working.transactions.get(sig).cloned())
            .collect();
        Ok(self.pool_sorted(txs))
    }

    fn add_approval_vote(
        &mut self,
        pending: &Signature,
        voter: String,
        in_favour: bool,
    ) -> Result<(), RepositoryError> {
        self.working
            .votes
            .entry(*pending)
            .or_default()
            .push(ApprovalVoteRecord { voter, in_favour });
        Ok(())
    }

    fn remove_approval_vote(
        &mut self,
        pending: &Signature,
        voter: &str,
    ) -> Result<(), RepositoryError> {
        if let Some(votes) = self.working.votes.get_mut(pending) {
            if let Some(pos) = votes.iter().position(|v| v.voter == voter) {
                votes.remove(pos);
            }
        }
        Ok(())
    }

    fn approval_votes(
        &self,
        pending: &Signature,
    ) -> Result<Vec<ApprovalVoteRecord>, RepositoryError> {
        Ok(self.working.votes.get(pending).cloned().unwrap_or_default())
    }

    fn save_participants(
        &mut self,
        signature: &Signature,
        addresses: &[String],
    ) -> Result<(), RepositoryError> {
        self.working
            .participants
            .insert(*signature, addresses.to_vec());
        Ok(())
    }

    fn delete_participants(&mut self, signature: &Signature) -> Result<(), RepositoryError> {
        self.working.participants.remove(signature);
        Ok(())
    }

    fn transactions_for_address(
        &self,
        address: &str,
    ) -> Result<Vec<Signature>, RepositoryError> {
        let mut matches: Vec<Signature> = self
            .working
            .participants
            .iter()
            .filter(|(_, addresses)| addresses.iter().any(|a| a == address))
            .map(|(sig, _)| *sig)
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }

    fn at_states_at_height(&self, height: u32) -> Result<Vec<AtState>, RepositoryError> {
        Ok(self
            .working
            .at_states
            .get(&height)
            .cloned()
            .unwrap_or_default())
    }

    fn save_at_state(&mut self, state: &AtState) -> Result<(), RepositoryError> {
        self.working
            .at_states
            .entry(state.height)
            .or_default()
            .push(state.clone());
        Ok(())
    }

    fn delete_at_states_at_height(&mut self, height: u32) -> Result<(), RepositoryError> {
        self.working.at_states.remove(&height);
        Ok(())
    }

    fn account(&self, address: &str) -> Result<Option<Account>, RepositoryError> {
        Ok(self.working.accounts.get(address).cloned())
    }

    fn confirmed_balance(
        &self,
        address: &str,
        asset: AssetId,
    ) -> Result<Amount, RepositoryError> {
        Ok(self
            .working
            .accounts
            .get(address)
            .map(|a| a.balance(asset))
            .unwrap_or(Amount::ZERO))
    }

    fn set_confirmed_balance(
        &mut self,
        address: &str,
        asset: AssetId,
        balance: Amount,
    ) -> Result<(), RepositoryError> {
        let account = self
            .working
            .accounts
            .entry(address.to_string())
            .or_insert_with(|| Account::new(address.to_string()));
        account.balances.insert(asset, balance);
        Ok(())
    }

    fn last_reference(&self, address: &str) -> Result<Option<Signature>, RepositoryError> {
        Ok(self
            .working
            .accounts
            .get(address)
            .and_then(|a| a.last_reference))
    }

    fn set_public_key(
        &mut self,
        address: &str,
        key: &PublicKey,
    ) -> Result<(), RepositoryError> {
        let account = self
            .working
            .accounts
            .entry(address.to_string())
            .or_insert_with(|| Account::new(address.to_string()));
        account.public_key = Some(*key);
        Ok(())
    }

    fn set_last_reference(
        &mut self,
        address: &str,
        reference: Option<Signature>,
    ) -> Result<(), RepositoryError> {
        let account = self
            .working
            .accounts
            .entry(address.to_string())
            .or_insert_with(|| Account::new(address.to_string()));
        account.last_reference = reference;
        Ok(())
    }

    fn delegation(
        &self,
        generator: &PublicKey,
    ) -> Result<Option<ForgingDelegation>, RepositoryError> {
        Ok(self.working.delegations.get(generator).cloned())
    }

    fn set_delegation(
        &mut self,
        generator: &PublicKey,
        delegation: Option<ForgingDelegation>,
    ) -> Result<(), RepositoryError> {
        match delegation {
            Some(d) => {
                self.working.delegations.insert(*generator, d);
            }
            None => {
                self.working.delegations.remove(generator);
            }
        }
        Ok(())
    }

    fn group(&self, id: GroupId) -> Result<Option<ApprovalGroup>, RepositoryError> {
        Ok(self.working.groups.get(&id).cloned())
    }

    fn save_group(&mut self, group: &ApprovalGroup) -> Result<(), RepositoryError> {
        self.working.groups.insert(group.id, group.clone());
        Ok(())
    }

    fn begin_savepoint(&mut self) -> Result<(), RepositoryError> {
        self.savepoints.push(self.working.clone());
        Ok(())
    }

    fn rollback_savepoint(&mut self) -> Result<(), RepositoryError> {
        let snapshot = self.savepoints.pop().ok_or_else(|| {
            RepositoryError::IllegalState("rollback without an open savepoint".into())
        })?;
        self.working = snapshot;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), RepositoryError> {
        if !self.savepoints.is_empty() {
            log::warn!(
                "commit with {} open savepoint(s); collapsing them",
                self.savepoints.len()
            );
            self.savepoints.clear();
        }
        self.committed = self.working.clone();
        Ok(())
    }

    fn discard(&mut self) -> Result<(), RepositoryError> {
        self.savepoints.clear();
        self.working = self.committed.clone();
        Ok(())
    }
}
