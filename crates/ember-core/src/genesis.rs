//! Genesis-block construction and chain bootstrap seeding.

use std::cell::OnceCell;

use crate::amount::Amount;
use crate::block::{Block, BlockKind, COMPOSITE_SIGNATURE_LENGTH};
use crate::params::ChainParams;
use crate::repository::{Repository, RepositoryError};
use crate::transaction::{Transaction, TransactionPayload};
use crate::account::{ApprovalGroup, ForgingDelegation};
use ember_crypto::{PublicKey, Signature};

/// The genesis identity. All zero bytes, deliberately not a curve point;
/// genesis signatures go through the doubled-digest scheme instead.
pub const GENESIS_GENERATOR: PublicKey = PublicKey([0u8; 32]);

/// Build the sealed genesis block from chain parameters. Deterministic:
/// every node derives the identical block and signatures.
pub fn build_genesis_block(params: &ChainParams) -> Block {
    let mut transactions = Vec::with_capacity(params.genesis_grants.len());
    for grant in &params.genesis_grants {
        let mut tx = Transaction::new_unsigned(
            params.genesis_timestamp,
            Signature([0u8; 64]),
            GENESIS_GENERATOR,
            Amount::ZERO,
            None,
            TransactionPayload::GenesisGrant {
                recipient: grant.recipient.clone(),
                amount: grant.amount,
            },
        );
        tx.seal_deterministic();
        transactions.push(tx);
    }

    let mut block = Block {
        kind: BlockKind::Genesis,
        version: params.block_version_at(1),
        reference: vec![0u8; COMPOSITE_SIGNATURE_LENGTH],
        timestamp: params.genesis_timestamp,
        generating_balance: params.genesis_generating_balance,
        generator: GENESIS_GENERATOR,
        generator_signature: None,
        transactions_signature: None,
        height: Some(1),
        transactions: Some(transactions),
        at_states: Some(Vec::new()),
        at_fees: Amount::ZERO,
        next_generating_balance: OnceCell::new(),
    };
    block.seal_genesis();
    block
}

/// Seed non-block bootstrap records: approval groups and proxy-forge
/// delegations declared in the chain parameters.
pub fn seed_chain_records(
    repo: &mut dyn Repository,
    params: &ChainParams,
) -> Result<(), RepositoryError> {
    for entry in &params.genesis_groups {
        repo.save_group(&ApprovalGroup {
            id: entry.id,
            name: entry.name.clone(),
            approval_threshold: entry.threshold,
            min_block_delay: entry.min_delay,
            max_block_delay: entry.max_delay,
            admins: entry.admins.clone(),
        })?;
    }
    for entry in &params.genesis_delegations {
        repo.set_delegation(
            &entry.generator,
            Some(ForgingDelegation {
                delegate_address: entry.delegate.clone(),
                share_percent: entry.share_percent,
            }),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GenesisGrantEntry;

    fn params_with_grants() -> ChainParams {
        let mut params = ChainParams::default();
        params.genesis_grants = vec![
            GenesisGrantEntry {
                recipient: "eb00112233445566778899aabbccddeeff001122".into(),
                amount: Amount::from_coins(1000),
            },
            GenesisGrantEntry {
                recipient: "ebffeeddccbbaa99887766554433221100ffeedd".into(),
                amount: Amount::from_coins(250),
            },
        ];
        params
    }

    #[test]
    fn test_genesis_block_is_deterministic() {
        let params = params_with_grants();
        let a = build_genesis_block(&params);
        let b = build_genesis_block(&params);
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.transaction_count(), 2);
    }

    #[test]
    fn test_genesis_signatures_verify_without_a_key() {
        let block = build_genesis_block(&params_with_grants());
        assert!(block.is_signature_valid());
    }

    #[test]
    fn test_genesis_seal_changes_with_grants() {
        let plain = build_genesis_block(&ChainParams::default());
        let granted = build_genesis_block(&params_with_grants());
        assert_ne!(plain.signature(), granted.signature());
    }

    #[test]
    fn test_genesis_refuses_transaction_mutation() {
        let params = params_with_grants();
        let mut block = build_genesis_block(&params);
        let signature = *block.transactions()[0].require_signature();
        let tx = block.transactions()[0].clone();
        assert!(!block.add_transaction(tx, &params));
        assert!(!block.remove_transaction(&signature));
        assert_eq!(block.transaction_count(), 2);
    }
}
