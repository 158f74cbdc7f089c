//! The transaction contract: every payload kind plugs into the block
//! pipeline through `validate` / `process` / `orphan` against a repository
//! handle. `validate` is pure; `process` and `orphan` are exact inverses.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::account::GroupId;
use crate::amount::{Amount, AssetId, NATIVE_ASSET};
use crate::params::{ChainParams, Feature};
use crate::repository::{credit, debit, Repository, RepositoryError};
use ember_crypto::{
    address_from_public_key, doubled_digest, validate_address, PrivateKey, PublicKey, Signature,
};

/// How long a signed transaction stays eligible for inclusion.
pub const DEADLINE_MS: u64 = 24 * 60 * 60 * 1000;

/// Group-approval state of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    NotRequired,
    Pending,
    Approved,
    Rejected,
    Expired,
    Invalid,
}

/// Transaction-level validation outcome. Data, not failure: an invalid
/// transaction is discarded or skipped, never treated as a crash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    Ok,
    NegativeFee,
    InsufficientFee,
    InvalidAddress,
    NegativeAmount,
    NoBalance,
    InvalidReference,
    FeatureNotActive,
    UnknownGroup,
    GenesisForbidden,
    PendingNotFound,
    NotPending,
    NotGroupAdmin,
    DuplicateVote,
}

impl TransactionOutcome {
    pub fn is_ok(self) -> bool {
        self == TransactionOutcome::Ok
    }
}

/// The closed set of transaction payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TransactionPayload {
    /// Initial balance grant; only legal inside the genesis block.
    GenesisGrant { recipient: String, amount: Amount },
    /// Transfer of an asset balance.
    Payment {
        recipient: String,
        asset: AssetId,
        amount: Amount,
    },
    /// Admin vote on a pending group-approval transaction.
    ApprovalVote {
        pending: Signature,
        in_favour: bool,
    },
    /// AT-authored payment out of an AT account.
    AtPayment {
        at_address: String,
        recipient: String,
        amount: Amount,
    },
}

/// A transaction: common envelope fields plus one payload.
///
/// Created unsigned, then signed (fixing the signature), then either
/// confirmed into a block or left in the unconfirmed pool until inclusion
/// or deadline expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Signature of the creator's previous transaction. Strict chaining:
    /// must equal the creator's last-reference at validation time.
    pub reference: Signature,
    pub creator: PublicKey,
    pub fee: Amount,
    /// Group whose approval this transaction needs, if any.
    pub approval_group: Option<GroupId>,
    pub payload: TransactionPayload,
    /// `None` until signed.
    pub signature: Option<Signature>,
}

impl Transaction {
    pub fn new_unsigned(
        timestamp: u64,
        reference: Signature,
        creator: PublicKey,
        fee: Amount,
        approval_group: Option<GroupId>,
        payload: TransactionPayload,
    ) -> Self {
        Transaction {
            timestamp,
            reference,
            creator,
            fee,
            approval_group,
            payload,
            signature: None,
        }
    }

    pub fn creator_address(&self) -> String {
        address_from_public_key(&self.creator)
    }

    pub fn is_at_generated(&self) -> bool {
        matches!(self.payload, TransactionPayload::AtPayment { .. })
    }

    pub fn is_genesis(&self) -> bool {
        matches!(self.payload, TransactionPayload::GenesisGrant { .. })
    }

    /// Whether payload effects wait for the group-approval sweep.
    pub fn effects_deferred(&self) -> bool {
        self.approval_group.is_some()
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        bincode::serialize(&(
            &self.timestamp,
            &self.reference,
            &self.creator,
            &self.fee,
            &self.approval_group,
            &self.payload,
        ))
        .expect("transaction serialization")
    }

    /// Sign with the creator's key. Signing with a foreign key is a caller
    /// bug, not a runtime condition.
    pub fn sign(&mut self, key: &PrivateKey) {
        if key.public_key() != self.creator {
            panic!("transaction signed with a key that is not the creator's");
        }
        self.signature = Some(key.sign(&self.signing_bytes()));
    }

    /// Fix the signature of a keyless transaction (genesis grants and
    /// AT-authored payments) with the deterministic doubled digest.
    pub fn seal_deterministic(&mut self) {
        let digest = doubled_digest(&self.signing_bytes());
        self.signature = Some(Signature(digest));
    }

    /// The signature, which the caller has guaranteed exists.
    pub fn require_signature(&self) -> &Signature {
        self.signature
            .as_ref()
            .unwrap_or_else(|| panic!("transaction is unsigned"))
    }

    pub fn is_signature_valid(&self) -> bool {
        let Some(signature) = &self.signature else {
            return false;
        };
        if self.is_genesis() || self.is_at_generated() {
            return signature.0 == doubled_digest(&self.signing_bytes());
        }
        self.creator.verify(&self.signing_bytes(), signature)
    }

    /// Serialized size, used for fee-per-byte and block-size accounting.
    pub fn serialized_len(&self) -> u64 {
        bincode::serialized_size(self).expect("transaction serialization")
    }

    /// Latest block timestamp this transaction may still be included at.
    pub fn deadline(&self) -> u64 {
        self.timestamp + DEADLINE_MS
    }

    /// Fee floor for this transaction's serialized size.
    pub fn min_fee(&self, params: &ChainParams) -> Amount {
        let unit = params.max_bytes_per_unit_fee.max(1);
        let units = (self.serialized_len() + unit - 1) / unit;
        Amount::from_raw(
            params
                .unit_fee
                .raw()
                .checked_mul(units.max(1) as i64)
                .unwrap_or(i64::MAX),
        )
    }

    /// Every address whose ledger state this transaction touches, for the
    /// address-indexed transaction lookup.
    pub fn participants(&self) -> Vec<String> {
        let mut addresses = vec![self.creator_address()];
        match &self.payload {
            TransactionPayload::GenesisGrant { recipient, .. } => {
                addresses.push(recipient.clone());
            }
            TransactionPayload::Payment { recipient, .. } => {
                addresses.push(recipient.clone());
            }
            TransactionPayload::ApprovalVote { .. } => {}
            TransactionPayload::AtPayment {
                at_address,
                recipient,
                ..
            } => {
                addresses.push(at_address.clone());
                addresses.push(recipient.clone());
            }
        }
        addresses.dedup();
        addresses
    }

    /// Pure validation against current ledger state; never mutates.
    pub fn validate(
        &self,
        repo: &dyn Repository,
        params: &ChainParams,
    ) -> Result<TransactionOutcome, RepositoryError> {
        use TransactionOutcome as O;
        use TransactionPayload as P;

        let chain_height = repo.chain_height()?;
        let next_height = chain_height + 1;

        // Fee rules: user transactions pay a positive fee covering their
        // serialized size; keyless system transactions may carry zero.
        if self.is_genesis() || self.is_at_generated() {
            if self.fee.is_negative() {
                return Ok(O::NegativeFee);
            }
        } else {
            if !self.fee.is_positive() {
                return Ok(O::NegativeFee);
            }
            if self.fee < self.min_fee(params) {
                return Ok(O::InsufficientFee);
            }
        }

        if let Some(group_id) = self.approval_group {
            if !params.is_active(Feature::GroupApproval, next_height, self.timestamp) {
                return Ok(O::FeatureNotActive);
            }
            if repo.group(group_id)?.is_none() {
                return Ok(O::UnknownGroup);
            }
        }

        match &self.payload {
            P::GenesisGrant { recipient, amount } => {
                if chain_height > 0 {
                    return Ok(O::GenesisForbidden);
                }
                if !validate_address(recipient) {
                    return Ok(O::InvalidAddress);
                }
                if amount.is_negative() {
                    return Ok(O::NegativeAmount);
                }
            }
            P::Payment {
                recipient,
                asset,
                amount,
            } => {
                if !validate_address(recipient) {
                    return Ok(O::InvalidAddress);
                }
                if !amount.is_positive() {
                    return Ok(O::NegativeAmount);
                }
                let creator_address = self.creator_address();
                if *asset == NATIVE_ASSET {
                    let needed = amount
                        .checked_add(self.fee)
                        .ok_or(RepositoryError::ArithmeticOverflow)?;
                    if repo.confirmed_balance(&creator_address, NATIVE_ASSET)? < needed {
                        return Ok(O::NoBalance);
                    }
                } else {
                    if repo.confirmed_balance(&creator_address, *asset)? < *amount {
                        return Ok(O::NoBalance);
                    }
                    if repo.confirmed_balance(&creator_address, NATIVE_ASSET)? < self.fee {
                        return Ok(O::NoBalance);
                    }
                }
            }
            P::ApprovalVote { pending, .. } => {
                if !params.is_active(Feature::GroupApproval, next_height, self.timestamp) {
                    return Ok(O::FeatureNotActive);
                }
                let Some(meta) = repo.transaction_meta(pending)? else {
                    return Ok(O::PendingNotFound);
                };
                if meta.approval != ApprovalStatus::Pending {
                    return Ok(O::NotPending);
                }
                let Some(pending_tx) = repo.transaction_by_signature(pending)? else {
                    return Ok(O::PendingNotFound);
                };
                let Some(group_id) = pending_tx.approval_group else {
                    return Ok(O::NotPending);
                };
                let Some(group) = repo.group(group_id)? else {
                    return Ok(O::UnknownGroup);
                };
                let voter = self.creator_address();
                if !group.is_admin(&voter) {
                    return Ok(O::NotGroupAdmin);
                }
                if repo
                    .approval_votes(pending)?
                    .iter()
                    .any(|vote| vote.voter == voter)
                {
                    return Ok(O::DuplicateVote);
                }
                if repo.confirmed_balance(&voter, NATIVE_ASSET)? < self.fee {
                    return Ok(O::NoBalance);
                }
            }
            P::AtPayment {
                at_address,
                recipient,
                amount,
            } => {
                if !params.is_active(Feature::AutomatedTransactions, next_height, self.timestamp) {
                    return Ok(O::FeatureNotActive);
                }
                if !validate_address(recipient) || !validate_address(at_address) {
                    return Ok(O::InvalidAddress);
                }
                if amount.is_negative() {
                    return Ok(O::NegativeAmount);
                }
                if repo.confirmed_balance(at_address, NATIVE_ASSET)? < *amount {
                    return Ok(O::NoBalance);
                }
            }
        }

        // Strict reference chaining for user transactions: the reference
        // must equal the creator's current last-reference, no gaps, no
        // reordering.
        if !self.is_genesis() && !self.is_at_generated() {
            match repo.last_reference(&self.creator_address())? {
                Some(last) if last == self.reference => {}
                _ => return Ok(O::InvalidReference),
            }
        }

        Ok(O::Ok)
    }

    /// Apply full ledger effects: persist the record, charge the fee,
    /// advance the creator's last-reference, apply the payload.
    pub fn process(&self, repo: &mut dyn Repository) -> Result<(), RepositoryError> {
        self.charge_common(repo)?;
        self.apply_payload(repo)
    }

    /// Inclusion effects for a group-approval transaction still awaiting its
    /// sweep: fee and reference advance now, payload deferred.
    pub fn process_pending(&self, repo: &mut dyn Repository) -> Result<(), RepositoryError> {
        self.charge_common(repo)
    }

    fn charge_common(&self, repo: &mut dyn Repository) -> Result<(), RepositoryError> {
        repo.save_transaction(self)?;
        let creator_address = self.creator_address();
        if !self.fee.is_zero() {
            debit(repo, &creator_address, NATIVE_ASSET, self.fee)?;
        }
        if !self.is_genesis() && !self.is_at_generated() {
            repo.set_public_key(&creator_address, &self.creator)?;
            repo.set_last_reference(&creator_address, Some(*self.require_signature()))?;
        }
        Ok(())
    }

    /// Exact inverse of `process` (or of `process_pending` when
    /// `payload_applied` is false): restores balances and the creator's
    /// prior reference byte-for-byte.
    pub fn orphan(
        &self,
        repo: &mut dyn Repository,
        payload_applied: bool,
    ) -> Result<(), RepositoryError> {
        if payload_applied {
            self.revert_payload(repo)?;
        }
        let creator_address = self.creator_address();
        if !self.fee.is_zero() {
            credit(repo, &creator_address, NATIVE_ASSET, self.fee)?;
        }
        if !self.is_genesis() && !self.is_at_generated() {
            repo.set_last_reference(&creator_address, Some(self.reference))?;
        }
        Ok(())
    }

    /// Payload-only ledger effects. Called at processing for transactions
    /// without approval requirements, or by the sweep once approved.
    pub fn apply_payload(&self, repo: &mut dyn Repository) -> Result<(), RepositoryError> {
        use TransactionPayload as P;
        match &self.payload {
            P::GenesisGrant { recipient, amount } => {
                credit(repo, recipient, NATIVE_ASSET, *amount)?;
                // A grant seeds the recipient's reference chain.
                repo.set_last_reference(recipient, Some(*self.require_signature()))
            }
            P::Payment {
                recipient,
                asset,
                amount,
            } => {
                debit(repo, &self.creator_address(), *asset, *amount)?;
                credit(repo, recipient, *asset, *amount)
            }
            P::ApprovalVote { pending, in_favour } => {
                repo.add_approval_vote(pending, self.creator_address(), *in_favour)
            }
            P::AtPayment {
                at_address,
                recipient,
                amount,
            } => {
                debit(repo, at_address, NATIVE_ASSET, *amount)?;
                credit(repo, recipient, NATIVE_ASSET, *amount)
            }
        }
    }

    /// Exact inverse of `apply_payload`; used by transaction orphaning and
    /// by the sweep reversal when a block is orphaned.
    pub(crate) fn revert_payload(&self, repo: &mut dyn Repository) -> Result<(), RepositoryError> {
        use TransactionPayload as P;
        match &self.payload {
            P::GenesisGrant { recipient, amount } => {
                repo.set_last_reference(recipient, None)?;
                debit(repo, recipient, NATIVE_ASSET, *amount)
            }
            P::Payment {
                recipient,
                asset,
                amount,
            } => {
                debit(repo, recipient, *asset, *amount)?;
                credit(repo, &self.creator_address(), *asset, *amount)
            }
            P::ApprovalVote { pending, .. } => {
                repo.remove_approval_vote(pending, &self.creator_address())
            }
            P::AtPayment {
                at_address,
                recipient,
                amount,
            } => {
                debit(repo, recipient, NATIVE_ASSET, *amount)?;
                credit(repo, at_address, NATIVE_ASSET, *amount)
            }
        }
    }
}

/// Number of confirmations given the transaction's recorded height.
/// Zero while unconfirmed.
pub fn confirmations(height: Option<u32>, chain_height: u32) -> u32 {
    match height {
        Some(h) if h <= chain_height => chain_height - h + 1,
        _ => 0,
    }
}

/// The total order of transactions inside a block: AT-generated
/// transactions sort before user transactions, then by timestamp, then by
/// signature bytes. Stable and deterministic.
pub fn compare_order(a: &Transaction, b: &Transaction) -> Ordering {
    let class = |t: &Transaction| u8::from(!t.is_at_generated());
    class(a)
        .cmp(&class(b))
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| {
            let sig = |t: &Transaction| t.signature.map(|s| s.0).unwrap_or([0u8; 64]);
            sig(a).cmp(&sig(b))
        })
}
