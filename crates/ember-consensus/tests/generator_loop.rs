//! Generator loop tests against an in-memory chain.

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;

use ember_consensus::{BlockGenerator, GeneratorConfig};
use ember_core::amount::{Amount, NATIVE_ASSET};
use ember_core::params::{ChainParams, GenesisGrantEntry};
use ember_core::repository::Repository;
use ember_core::transaction::{Transaction, TransactionPayload};
use ember_core::{build_genesis_block, seed_chain_records, NullAtEngine};
use ember_crypto::{address_from_public_key, PrivateKey, Signature};
use ember_state::MemoryRepository;

const FORGER_SEED: [u8; 32] = [11u8; 32];

fn params_with_stake(stake: Amount) -> ChainParams {
    let forger = PrivateKey::from_seed(FORGER_SEED);
    let mut params = ChainParams::default();
    params.genesis_grants = vec![GenesisGrantEntry {
        recipient: address_from_public_key(&forger.public_key()),
        amount: stake,
    }];
    params
}

fn bootstrapped(params: &ChainParams) -> Arc<Mutex<MemoryRepository>> {
    let mut repo = MemoryRepository::new();
    let mut genesis = build_genesis_block(params);
    genesis.process(&mut repo, params).unwrap();
    seed_chain_records(&mut repo, params).unwrap();
    repo.commit().unwrap();
    Arc::new(Mutex::new(repo))
}

fn fast_config() -> GeneratorConfig {
    GeneratorConfig {
        poll_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(50),
    }
}

#[test]
fn test_generator_forges_onto_genesis() {
    let params = params_with_stake(Amount::from_coins(1000));
    let repo = bootstrapped(&params);

    let (publisher, forged) = mpsc::channel();
    let generator = BlockGenerator::new(
        Arc::clone(&repo),
        params,
        vec![PrivateKey::from_seed(FORGER_SEED)],
        Arc::new(NullAtEngine),
        fast_config(),
        Some(publisher),
    );
    let shutdown = generator.shutdown_flag();
    let handle = generator.spawn();

    let block = forged
        .recv_timeout(Duration::from_secs(10))
        .expect("generator produced no block");
    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();

    assert_eq!(block.height(), Some(2));
    assert!(block.is_signature_valid());
    assert!(repo.lock().chain_height().unwrap() >= 2);
}

#[test]
fn test_forging_deletes_expired_pool_transactions() {
    let params = params_with_stake(Amount::from_coins(1000));
    let repo = bootstrapped(&params);

    // A signed payment whose 24h deadline lies long before any candidate
    // timestamp. It must never be included, and forging must purge it.
    let sender = PrivateKey::from_seed([77u8; 32]);
    let mut stale = Transaction::new_unsigned(
        1_000,
        Signature([0u8; 64]),
        sender.public_key(),
        Amount::from_coins(1),
        None,
        TransactionPayload::Payment {
            recipient: address_from_public_key(
                &PrivateKey::from_seed(FORGER_SEED).public_key(),
            ),
            asset: NATIVE_ASSET,
            amount: Amount::from_coins(1),
        },
    );
    stale.sign(&sender);
    let stale_sig = *stale.require_signature();
    {
        let mut guard = repo.lock();
        guard.save_transaction(&stale).unwrap();
        guard.commit().unwrap();
    }

    let (publisher, forged) = mpsc::channel();
    let generator = BlockGenerator::new(
        Arc::clone(&repo),
        params,
        vec![PrivateKey::from_seed(FORGER_SEED)],
        Arc::new(NullAtEngine),
        fast_config(),
        Some(publisher),
    );
    let shutdown = generator.shutdown_flag();
    let handle = generator.spawn();

    let block = forged
        .recv_timeout(Duration::from_secs(10))
        .expect("generator produced no block");
    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();

    assert_eq!(block.transaction_count(), 0);
    let guard = repo.lock();
    assert!(guard.transaction_by_signature(&stale_sig).unwrap().is_none());
    assert!(guard.unconfirmed_transactions().unwrap().is_empty());
}

#[test]
fn test_generator_idle_below_stake_floor() {
    // Grant below the minimum generating balance: the key never forges.
    let mut params = params_with_stake(Amount::from_raw(1));
    params.min_generating_balance = Amount::from_coins(1);
    let repo = bootstrapped(&params);

    let (publisher, forged) = mpsc::channel();
    let generator = BlockGenerator::new(
        Arc::clone(&repo),
        params,
        vec![PrivateKey::from_seed(FORGER_SEED)],
        Arc::new(NullAtEngine),
        fast_config(),
        Some(publisher),
    );
    let shutdown = generator.shutdown_flag();
    let handle = generator.spawn();

    assert!(forged.recv_timeout(Duration::from_millis(300)).is_err());
    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();

    assert_eq!(repo.lock().chain_height().unwrap(), 1);
}

#[test]
fn test_shutdown_stops_the_loop() {
    let params = params_with_stake(Amount::from_coins(1000));
    let repo = bootstrapped(&params);

    let generator = BlockGenerator::new(
        repo,
        params,
        Vec::new(),
        Arc::new(NullAtEngine),
        fast_config(),
        None,
    );
    let shutdown = generator.shutdown_flag();
    let handle = generator.spawn();

    shutdown.store(true, Ordering::Relaxed);
    // Must exit promptly once the flag is set.
    handle.join().unwrap();
}
