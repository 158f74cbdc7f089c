//! Property test: process followed by orphan restores the ledger exactly,
//! whatever the payment amounts.

use proptest::prelude::*;

use ember_core::amount::{Amount, NATIVE_ASSET};
use ember_core::block::{Block, BlockOutcome};
use ember_core::params::{ChainParams, GenesisGrantEntry};
use ember_core::repository::Repository;
use ember_core::transaction::{Transaction, TransactionPayload};
use ember_core::{build_genesis_block, seed_chain_records, NullAtEngine};
use ember_crypto::{address_from_public_key, PrivateKey};
use ember_state::MemoryRepository;

const FORGER_SEED: [u8; 32] = [11u8; 32];
const SENDER_SEED: [u8; 32] = [22u8; 32];
const RECIPIENT_SEED: [u8; 32] = [55u8; 32];

fn addr(seed: [u8; 32]) -> String {
    address_from_public_key(&PrivateKey::from_seed(seed).public_key())
}

fn snapshot(repo: &MemoryRepository) -> Vec<(String, Amount, Option<[u8; 64]>)> {
    [FORGER_SEED, SENDER_SEED, RECIPIENT_SEED]
        .iter()
        .map(|seed| {
            let address = addr(*seed);
            let balance = repo.confirmed_balance(&address, NATIVE_ASSET).unwrap();
            let reference = repo.last_reference(&address).unwrap().map(|s| s.0);
            (address, balance, reference)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn process_then_orphan_is_identity(
        amounts in proptest::collection::vec(1i64..=50, 1..4),
    ) {
        let mut params = ChainParams::default();
        params.genesis_grants = vec![
            GenesisGrantEntry { recipient: addr(FORGER_SEED), amount: Amount::from_coins(1000) },
            GenesisGrantEntry { recipient: addr(SENDER_SEED), amount: Amount::from_coins(500) },
        ];

        let mut repo = MemoryRepository::new();
        let mut genesis = build_genesis_block(&params);
        genesis.process(&mut repo, &params).unwrap();
        seed_chain_records(&mut repo, &params).unwrap();
        repo.commit().unwrap();

        let forger = PrivateKey::from_seed(FORGER_SEED);
        let sender = PrivateKey::from_seed(SENDER_SEED);
        let parent = repo.block_by_height(1).unwrap().unwrap();
        let mut block = Block::forge(&repo, &params, &parent, forger.public_key(), &NullAtEngine).unwrap();

        // Chain the payments through the sender's advancing reference.
        let mut reference = repo.last_reference(&addr(SENDER_SEED)).unwrap().unwrap();
        for (i, coins) in amounts.iter().enumerate() {
            let mut tx = Transaction::new_unsigned(
                params.genesis_timestamp + 1 + i as u64,
                reference,
                sender.public_key(),
                Amount::from_coins(1),
                None,
                TransactionPayload::Payment {
                    recipient: addr(RECIPIENT_SEED),
                    asset: NATIVE_ASSET,
                    amount: Amount::from_coins(*coins),
                },
            );
            tx.sign(&sender);
            reference = *tx.require_signature();
            prop_assert!(block.add_transaction(tx, &params));
        }
        block.sign(&forger);

        let before = snapshot(&repo);
        let outcome = block.is_valid(&mut repo, &NullAtEngine, &params).unwrap();
        prop_assert_eq!(outcome, BlockOutcome::Ok);

        block.process(&mut repo, &params).unwrap();
        block.orphan(&mut repo, &params).unwrap();

        prop_assert_eq!(snapshot(&repo), before);
        prop_assert_eq!(repo.chain_height().unwrap(), 1);
    }
}
