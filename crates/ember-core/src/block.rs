//! The block entity: candidate construction, chained signatures, ordered
//! validation, and the process/orphan ledger state machine.

use std::cell::OnceCell;

use chrono::Utc;

use crate::amount::{Amount, NATIVE_ASSET};
use crate::at::{AtEngine, AtState};
use crate::forging;
use crate::params::{ChainParams, Feature};
use crate::repository::{
    debit, credit, Repository, RepositoryError, SpeculativeScope,
};
use crate::transaction::{
    compare_order, ApprovalStatus, Transaction, TransactionOutcome,
};
use ember_crypto::{address_from_public_key, doubled_digest, PrivateKey, PublicKey, Signature};

/// Width of the composite block signature: generator signature followed by
/// transactions signature.
pub const COMPOSITE_SIGNATURE_LENGTH: usize = 128;

/// Serialized size of the block header, for block-size accounting.
pub const BLOCK_HEADER_BYTES: u64 = 320;

/// Blocks from this protocol version onward append the height to the
/// generator-signature pre-image and re-execute ATs during validation.
pub const VERSION_AT_RECONCILE: u32 = 4;

/// Standard blocks are forged and signed; the genesis block is sealed once
/// at chain bootstrap with relaxed rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Standard,
    Genesis,
}

/// Block validation outcome: a closed, ordered set. `is_valid` performs its
/// checks in exactly this order and short-circuits on the first failure;
/// later checks assume earlier ones hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    Ok,
    ParentMissing,
    ChainNotEmpty,
    DuplicateChild,
    TimestampBeforeParent,
    TimestampInFuture,
    TimestampTooSoon,
    VersionMismatch,
    FeatureNotActive,
    GeneratorNotAccepted,
    GenesisTransactionsForbidden,
    TransactionTimestampInvalid,
    TransactionInvalid(TransactionOutcome),
    TransactionProcessingFailed,
    AtStateMismatch,
}

impl BlockOutcome {
    pub fn is_ok(self) -> bool {
        self == BlockOutcome::Ok
    }
}

/// A block over an ordered transaction list and an AT-state list.
///
/// The transaction and AT-state lists are explicit optionals: a block loaded
/// without them cannot be mutated or validated, and trying is a caller bug.
/// `next_generating_balance` is populated at most once per value and treated
/// as immutable afterwards; a `Block` is not meant to be shared across
/// concurrent mutators.
#[derive(Clone, Debug)]
pub struct Block {
    pub(crate) kind: BlockKind,
    pub(crate) version: u32,
    /// Composite signature of the parent block; zeroes for genesis.
    pub(crate) reference: Vec<u8>,
    /// Milliseconds since the Unix epoch, second-granular.
    pub(crate) timestamp: u64,
    pub(crate) generating_balance: Amount,
    pub(crate) generator: PublicKey,
    pub(crate) generator_signature: Option<Signature>,
    pub(crate) transactions_signature: Option<Signature>,
    /// `None` until committed by `process` (or supplied by the loader).
    pub(crate) height: Option<u32>,
    pub(crate) transactions: Option<Vec<Transaction>>,
    pub(crate) at_states: Option<Vec<AtState>>,
    pub(crate) at_fees: Amount,
    pub(crate) next_generating_balance: OnceCell<Amount>,
}

impl Block {
    /// Rebuild a block from storage or wire data with all fields supplied.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        kind: BlockKind,
        version: u32,
        reference: Vec<u8>,
        timestamp: u64,
        generating_balance: Amount,
        generator: PublicKey,
        generator_signature: Option<Signature>,
        transactions_signature: Option<Signature>,
        height: Option<u32>,
        transactions: Option<Vec<Transaction>>,
        at_states: Option<Vec<AtState>>,
        at_fees: Amount,
    ) -> Self {
        Block {
            kind,
            version,
            reference,
            timestamp,
            generating_balance,
            generator,
            generator_signature,
            transactions_signature,
            height,
            transactions,
            at_states,
            at_fees,
            next_generating_balance: OnceCell::new(),
        }
    }

    /// Build a fresh candidate extending `parent` for forging. The AT engine
    /// runs immediately to seed AT-generated transactions and state; the
    /// timestamp is the generator's earliest legal slot.
    pub fn forge(
        repo: &dyn Repository,
        params: &ChainParams,
        parent: &Block,
        generator: PublicKey,
        at_engine: &dyn AtEngine,
    ) -> Result<Block, RepositoryError> {
        let height = parent.require_height() + 1;
        let timestamp = forging::minimum_timestamp(parent, &generator, params);
        let generating_balance = forging::next_generating_balance(repo, parent, params)?;

        let mut block = Block {
            kind: BlockKind::Standard,
            version: params.block_version_at(height),
            reference: parent.signature(),
            timestamp,
            generating_balance,
            generator,
            generator_signature: None,
            transactions_signature: None,
            height: Some(height),
            transactions: Some(Vec::new()),
            at_states: Some(Vec::new()),
            at_fees: Amount::ZERO,
            next_generating_balance: OnceCell::new(),
        };

        if params.is_active(Feature::AutomatedTransactions, height, timestamp) {
            let executions = at_engine.run(repo, timestamp)?;
            let transactions = block.transactions.as_mut().expect("just populated");
            let at_states = block.at_states.as_mut().expect("just populated");
            for execution in executions {
                block.at_fees = block
                    .at_fees
                    .checked_add(execution.fee())
                    .ok_or(RepositoryError::ArithmeticOverflow)?;
                transactions.push(execution.transaction);
                let mut state = execution.state;
                state.height = height;
                at_states.push(state);
            }
            transactions.sort_by(compare_order);
        }
        Ok(block)
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn reference(&self) -> &[u8] {
        &self.reference
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn generating_balance(&self) -> Amount {
        self.generating_balance
    }

    pub fn generator(&self) -> &PublicKey {
        &self.generator
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn at_fees(&self) -> Amount {
        self.at_fees
    }

    pub fn transactions_loaded(&self) -> bool {
        self.transactions.is_some()
    }

    /// The ordered transaction list. Calling this on a block loaded without
    /// its transactions is a caller bug.
    pub fn transactions(&self) -> &[Transaction] {
        self.transactions
            .as_deref()
            .unwrap_or_else(|| panic!("block transaction list was never loaded"))
    }

    /// The AT-state list. Same loading contract as [`Block::transactions`].
    pub fn at_states(&self) -> &[AtState] {
        self.at_states
            .as_deref()
            .unwrap_or_else(|| panic!("block AT-state list was never loaded"))
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions().len()
    }

    /// Total fees carried by this block: sum of transaction fees plus AT
    /// fees, exactly.
    pub fn total_fees(&self) -> Amount {
        self.transactions()
            .iter()
            .map(|t| t.fee)
            .sum::<Amount>()
            .checked_add(self.at_fees)
            .expect("block fee overflow")
    }

    /// Serialized size used against the block-size cap.
    pub fn serialized_size(&self) -> u64 {
        BLOCK_HEADER_BYTES
            + self
                .transactions()
                .iter()
                .map(|t| t.serialized_len())
                .sum::<u64>()
    }

    pub fn is_signed(&self) -> bool {
        self.generator_signature.is_some() && self.transactions_signature.is_some()
    }

    /// Composite signature: generator signature followed by transactions
    /// signature. Calling this on an unsigned block is a caller bug.
    pub fn signature(&self) -> Vec<u8> {
        let generator_signature = self
            .generator_signature
            .as_ref()
            .unwrap_or_else(|| panic!("block is unsigned"));
        let transactions_signature = self
            .transactions_signature
            .as_ref()
            .unwrap_or_else(|| panic!("block is unsigned"));
        let mut composite = Vec::with_capacity(COMPOSITE_SIGNATURE_LENGTH);
        composite.extend_from_slice(&generator_signature.0);
        composite.extend_from_slice(&transactions_signature.0);
        composite
    }

    fn require_height(&self) -> u32 {
        self.height
            .unwrap_or_else(|| panic!("block height is not set"))
    }

    /// Pre-image of the generator signature. From protocol version 4 the
    /// block height is appended, so the height must be known by then.
    fn generator_signature_preimage(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(128);
        // First half of the parent composite signature is the parent's
        // generator signature.
        bytes.extend_from_slice(&self.reference[..64]);
        bytes.extend_from_slice(&self.generating_balance.raw().to_be_bytes());
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(self.generator.as_bytes());
        if self.version >= VERSION_AT_RECONCILE {
            bytes.extend_from_slice(&self.require_height().to_be_bytes());
        }
        bytes
    }

    /// Pre-image of the transactions signature: the generator signature
    /// followed by every transaction signature in block order. This is why
    /// any mutation of the transaction set forces a re-sign.
    fn transactions_signature_preimage(&self, generator_signature: &Signature) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64 + 64 * self.transaction_count());
        bytes.extend_from_slice(&generator_signature.0);
        for tx in self.transactions() {
            bytes.extend_from_slice(&tx.require_signature().0);
        }
        bytes
    }

    /// Sign both chained signatures with the generator's key. Signing a
    /// genesis block or signing with a foreign key is a caller bug.
    pub fn sign(&mut self, key: &PrivateKey) {
        if self.kind == BlockKind::Genesis {
            panic!("genesis blocks are sealed, not signed");
        }
        if key.public_key() != self.generator {
            panic!("block signed with a key that is not the generator's");
        }
        let generator_signature = key.sign(&self.generator_signature_preimage());
        let transactions_signature =
            key.sign(&self.transactions_signature_preimage(&generator_signature));
        self.generator_signature = Some(generator_signature);
        self.transactions_signature = Some(transactions_signature);
    }

    /// Seal a genesis block with the deterministic doubled digest; no
    /// private key exists for the genesis identity.
    pub(crate) fn seal_genesis(&mut self) {
        let generator_signature =
            Signature(doubled_digest(&self.generator_signature_preimage()));
        let transactions_signature = Signature(doubled_digest(
            &self.transactions_signature_preimage(&generator_signature),
        ));
        self.generator_signature = Some(generator_signature);
        self.transactions_signature = Some(transactions_signature);
    }

    /// Verify both chained signatures and every transaction signature.
    pub fn is_signature_valid(&self) -> bool {
        let (Some(generator_signature), Some(transactions_signature)) =
            (&self.generator_signature, &self.transactions_signature)
        else {
            return false;
        };
        // A reference shorter than a generator signature cannot have come
        // from a real parent; wire data like that is simply invalid.
        if self.reference.len() < 64 {
            return false;
        }
        let chained_ok = match self.kind {
            BlockKind::Genesis => {
                generator_signature.0 == doubled_digest(&self.generator_signature_preimage())
                    && transactions_signature.0
                        == doubled_digest(
                            &self.transactions_signature_preimage(generator_signature),
                        )
            }
            BlockKind::Standard => {
                self.generator
                    .verify(&self.generator_signature_preimage(), generator_signature)
                    && self.generator.verify(
                        &self.transactions_signature_preimage(generator_signature),
                        transactions_signature,
                    )
            }
        };
        chained_ok && self.transactions().iter().all(|t| t.is_signature_valid())
    }

    /// Add a signed transaction, keeping block order and invalidating the
    /// transactions signature. Refused (false) for genesis blocks, unsigned
    /// transactions, and additions that would exceed the block-size cap.
    pub fn add_transaction(&mut self, tx: Transaction, params: &ChainParams) -> bool {
        if self.kind == BlockKind::Genesis {
            return false;
        }
        if tx.signature.is_none() {
            return false;
        }
        if self.serialized_size() + tx.serialized_len() > params.max_block_bytes {
            return false;
        }
        let transactions = self
            .transactions
            .as_mut()
            .unwrap_or_else(|| panic!("block transaction list was never loaded"));
        transactions.push(tx);
        transactions.sort_by(compare_order);
        self.transactions_signature = None;
        true
    }

    /// Remove a transaction by signature, invalidating the transactions
    /// signature. Returns whether anything was removed.
    pub fn remove_transaction(&mut self, signature: &Signature) -> bool {
        if self.kind == BlockKind::Genesis {
            return false;
        }
        let transactions = self
            .transactions
            .as_mut()
            .unwrap_or_else(|| panic!("block transaction list was never loaded"));
        let before = transactions.len();
        transactions.retain(|t| t.signature.as_ref() != Some(signature));
        if transactions.len() == before {
            return false;
        }
        self.transactions_signature = None;
        true
    }

    /// Validate this block against the current chain state.
    ///
    /// Transactions are checked and then speculatively processed under a
    /// storage savepoint so later transactions in the same candidate see
    /// correct intermediate balances and references; the savepoint is rolled
    /// back unconditionally before this returns, on every path.
    pub fn is_valid(
        &self,
        repo: &mut dyn Repository,
        at_engine: &dyn AtEngine,
        params: &ChainParams,
    ) -> Result<BlockOutcome, RepositoryError> {
        use BlockOutcome as O;

        if self.kind == BlockKind::Genesis {
            // Genesis skips parent/timestamp/version checks entirely.
            if repo.chain_height()? != 0 {
                return Ok(O::ChainNotEmpty);
            }
            for tx in self.transactions() {
                let outcome = tx.validate(repo, params)?;
                if !outcome.is_ok() {
                    return Ok(O::TransactionInvalid(outcome));
                }
            }
            return Ok(O::Ok);
        }

        let Some(parent) = repo.block_by_signature(&self.reference)? else {
            return Ok(O::ParentMissing);
        };
        if repo.child_of(&self.reference)?.is_some() {
            return Ok(O::DuplicateChild);
        }
        if self.timestamp <= parent.timestamp {
            return Ok(O::TimestampBeforeParent);
        }
        let now = Utc::now().timestamp_millis() as u64;
        if self.timestamp > now + params.max_time_drift_ms {
            return Ok(O::TimestampInFuture);
        }
        if self.timestamp < forging::minimum_timestamp(&parent, &self.generator, params) {
            return Ok(O::TimestampTooSoon);
        }
        let height = parent.require_height() + 1;
        if self.version != params.block_version_at(height) {
            return Ok(O::VersionMismatch);
        }
        if !self.at_states().is_empty()
            && !params.is_active(Feature::AutomatedTransactions, height, self.timestamp)
        {
            return Ok(O::FeatureNotActive);
        }
        if self.generating_balance != forging::next_generating_balance(repo, &parent, params)? {
            return Ok(O::GeneratorNotAccepted);
        }
        let generator_address = address_from_public_key(&self.generator);
        if repo.confirmed_balance(&generator_address, NATIVE_ASSET)?
            < params.min_generating_balance
        {
            return Ok(O::GeneratorNotAccepted);
        }
        if self.transactions().iter().any(|t| t.is_genesis()) {
            return Ok(O::GenesisTransactionsForbidden);
        }

        // AT executions are computed against pre-block state, read-only;
        // the comparison happens after the transaction checks.
        let at_executions = if self.version >= VERSION_AT_RECONCILE {
            Some(at_engine.run(repo, self.timestamp)?)
        } else {
            // Legacy bridge rule: AT state authored elsewhere is trusted
            // unconditionally below version 4.
            None
        };

        {
            let mut scope = SpeculativeScope::begin(repo)?;
            for tx in self.transactions() {
                if tx.timestamp > self.timestamp || tx.deadline() <= self.timestamp {
                    return Ok(O::TransactionTimestampInvalid);
                }
                let outcome = tx.validate(scope.repo(), params)?;
                if !outcome.is_ok() {
                    return Ok(O::TransactionInvalid(outcome));
                }
                let applied = if tx.effects_deferred() {
                    tx.process_pending(scope.repo())
                } else {
                    tx.process(scope.repo())
                };
                match applied {
                    Ok(()) => {}
                    Err(e @ RepositoryError::Backend(_)) => return Err(e),
                    Err(e) => {
                        log::debug!("speculative processing failed: {e}");
                        return Ok(O::TransactionProcessingFailed);
                    }
                }
            }
        }

        if let Some(executions) = at_executions {
            let declared = self.at_states();
            if executions.len() != declared.len() {
                return Ok(O::AtStateMismatch);
            }
            let mut total = Amount::ZERO;
            for (execution, state) in executions.iter().zip(declared) {
                if execution.state.at_address != state.at_address
                    || execution.state.state_hash != state.state_hash
                    || execution.state.fees != state.fees
                {
                    return Ok(O::AtStateMismatch);
                }
                total = total
                    .checked_add(execution.fee())
                    .ok_or(RepositoryError::ArithmeticOverflow)?;
            }
            if total != self.at_fees {
                return Ok(O::AtStateMismatch);
            }
        }

        Ok(O::Ok)
    }

    /// Commit this block's ledger effects. The caller must have validated
    /// first; processing a block that does not extend the current tip is a
    /// caller bug. All repository changes become durable with the caller's
    /// single commit afterwards.
    pub fn process(
        &mut self,
        repo: &mut dyn Repository,
        params: &ChainParams,
    ) -> Result<(), RepositoryError> {
        let chain_height = repo.chain_height()?;

        if self.kind == BlockKind::Genesis {
            if chain_height != 0 {
                panic!("genesis block processed onto a non-empty chain");
            }
            self.height = Some(1);
            for tx in self.transactions().to_vec() {
                tx.process(repo)?;
            }
            return self.persist(repo, 1);
        }

        let tip = repo
            .block_by_height(chain_height)?
            .ok_or_else(|| RepositoryError::IllegalState("chain has no tip".into()))?;
        if self.reference != tip.signature() {
            panic!("processed block does not extend the current tip");
        }
        let height = chain_height + 1;
        self.height = Some(height);

        // Block reward, split with the proxy-forge delegate when one is
        // registered for the generator key.
        self.pay_generator(repo, params.reward_at(height), false)?;

        let transactions = self.transactions().to_vec();
        let mut fees = Amount::ZERO;
        for tx in &transactions {
            fees = fees
                .checked_add(tx.fee)
                .ok_or(RepositoryError::ArithmeticOverflow)?;
            if tx.effects_deferred() {
                tx.process_pending(repo)?;
                repo.set_approval_status(tx.require_signature(), ApprovalStatus::Pending, None)?;
            } else {
                tx.process(repo)?;
                repo.set_approval_status(
                    tx.require_signature(),
                    ApprovalStatus::NotRequired,
                    None,
                )?;
            }
        }

        sweep_approvals(repo, height)?;

        // Accumulated transaction fees go to the generator under the same
        // split rule as the reward.
        self.pay_generator(repo, fees, false)?;

        for mut state in self.at_states().to_vec() {
            debit(repo, &state.at_address, NATIVE_ASSET, state.fees)?;
            // Blocks assembled from wire data may carry unstamped records.
            state.height = height;
            repo.save_at_state(&state)?;
        }

        self.persist(repo, height)
    }

    fn persist(&self, repo: &mut dyn Repository, height: u32) -> Result<(), RepositoryError> {
        repo.save_block(self)?;
        let block_signature = self.signature();
        for tx in self.transactions() {
            let signature = tx.require_signature();
            repo.set_transaction_block(signature, Some(block_signature.clone()), Some(height))?;
            repo.save_participants(signature, &tx.participants())?;
        }
        Ok(())
    }

    /// Exact mirror of `process`, in reverse transaction order. Restores
    /// every touched balance and reference and removes the block.
    pub fn orphan(
        &mut self,
        repo: &mut dyn Repository,
        params: &ChainParams,
    ) -> Result<(), RepositoryError> {
        let height = self.require_height();

        // Undo this block's approval-sweep resolutions first: transactions
        // resolved here go back to pending, reverting approved payloads.
        for tx in repo.transactions_resolved_at(height)? {
            let signature = *tx.require_signature();
            let meta = repo.transaction_meta(&signature)?.ok_or_else(|| {
                RepositoryError::IllegalState("resolved transaction without metadata".into())
            })?;
            if meta.approval == ApprovalStatus::Approved {
                tx.revert_payload(repo)?;
            }
            repo.set_approval_status(&signature, ApprovalStatus::Pending, None)?;
        }

        let transactions = self.transactions().to_vec();
        let mut fees = Amount::ZERO;
        for tx in transactions.iter().rev() {
            let signature = *tx.require_signature();
            let meta = repo.transaction_meta(&signature)?.ok_or_else(|| {
                RepositoryError::IllegalState("confirmed transaction without metadata".into())
            })?;
            tx.orphan(repo, meta.approval == ApprovalStatus::NotRequired)?;
            fees = fees
                .checked_add(tx.fee)
                .ok_or(RepositoryError::ArithmeticOverflow)?;
            repo.delete_participants(&signature)?;
            if tx.is_at_generated() || tx.is_genesis() {
                // AT-authored transactions are deleted outright; they are
                // regenerated by the engine, never pooled.
                repo.delete_transaction(&signature)?;
            } else {
                repo.set_transaction_block(&signature, None, None)?;
                repo.set_approval_status(&signature, ApprovalStatus::NotRequired, None)?;
            }
        }

        if self.kind == BlockKind::Standard {
            self.pay_generator(repo, fees, true)?;
            self.pay_generator(repo, params.reward_at(height), true)?;
            for state in self.at_states().to_vec() {
                credit(repo, &state.at_address, NATIVE_ASSET, state.fees)?;
            }
            repo.delete_at_states_at_height(height)?;
        }

        repo.delete_block(&self.signature())?;
        self.height = None;
        Ok(())
    }

    /// Credit (or with `reverse`, debit) a forging payout, splitting with
    /// the registered delegate. The delegate share rounds down; the forger
    /// receives the remainder, so the parts sum exactly.
    fn pay_generator(
        &self,
        repo: &mut dyn Repository,
        amount: Amount,
        reverse: bool,
    ) -> Result<(), RepositoryError> {
        if amount.is_zero() {
            return Ok(());
        }
        let generator_address = address_from_public_key(&self.generator);
        let mut payouts: Vec<(String, Amount)> = Vec::with_capacity(2);
        match repo.delegation(&self.generator)? {
            Some(delegation) => {
                let delegate_share =
                    amount.scale_down(u64::from(delegation.share_percent), 100);
                let forger_share = amount
                    .checked_sub(delegate_share)
                    .ok_or(RepositoryError::ArithmeticOverflow)?;
                payouts.push((delegation.delegate_address, delegate_share));
                payouts.push((generator_address, forger_share));
            }
            None => payouts.push((generator_address, amount)),
        }
        for (address, share) in payouts {
            if share.is_zero() {
                continue;
            }
            if reverse {
                debit(repo, &address, NATIVE_ASSET, share)?;
            } else {
                credit(repo, &address, NATIVE_ASSET, share)?;
            }
        }
        Ok(())
    }
}

/// The once-per-block group-approval sweep: resolve pending transactions
/// whose vote threshold is met within their group's delay window.
fn sweep_approvals(repo: &mut dyn Repository, height: u32) -> Result<(), RepositoryError> {
    for tx in repo.approval_pending()? {
        let signature = *tx.require_signature();
        let meta = repo.transaction_meta(&signature)?.ok_or_else(|| {
            RepositoryError::IllegalState("pending transaction without metadata".into())
        })?;
        let Some(included_at) = meta.height else {
            continue;
        };
        let Some(group_id) = tx.approval_group else {
            continue;
        };
        let group = repo.group(group_id)?.ok_or_else(|| {
            RepositoryError::IllegalState("pending transaction references unknown group".into())
        })?;
        if height < included_at + group.min_block_delay {
            continue;
        }
        let votes = repo.approval_votes(&signature)?;
        let in_favour = votes.iter().filter(|v| v.in_favour).count() as u32;
        let against = votes.len() as u32 - in_favour;
        if in_favour >= group.approval_threshold {
            tx.apply_payload(repo)?;
            repo.set_approval_status(&signature, ApprovalStatus::Approved, Some(height))?;
            log::debug!("approved pending transaction at height {height}");
        } else if against >= group.approval_threshold {
            repo.set_approval_status(&signature, ApprovalStatus::Rejected, Some(height))?;
        } else if height >= included_at + group.max_block_delay {
            repo.set_approval_status(&signature, ApprovalStatus::Expired, Some(height))?;
        }
    }
    Ok(())
}
