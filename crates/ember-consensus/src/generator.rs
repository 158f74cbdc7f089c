//! Background block generator.
//!
//! Polls the chain tip and, for each local forging key, waits until the
//! key's eligibility window has elapsed, then builds, fills, signs,
//! validates, and commits a candidate block. The repository lock is taken
//! with `try_lock` so a node busy importing blocks is never stalled by the
//! forger; a missed poll just means trying again next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use ember_core::amount::NATIVE_ASSET;
use ember_core::at::AtEngine;
use ember_core::block::Block;
use ember_core::forging;
use ember_core::params::ChainParams;
use ember_core::repository::{Repository, RepositoryError, SpeculativeScope};
use ember_crypto::{address_from_public_key, PrivateKey};

/// Tuning knobs for the generator loop.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// How often the loop wakes to check eligibility.
    pub poll_interval: Duration,
    /// Back-off after a storage failure.
    pub error_backoff: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            // Block timestamps are second-granular; polling faster gains
            // nothing.
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Forges blocks with a set of local keys against a shared repository.
pub struct BlockGenerator<R: Repository> {
    repo: Arc<Mutex<R>>,
    params: ChainParams,
    keys: Vec<PrivateKey>,
    at_engine: Arc<dyn AtEngine + Send + Sync>,
    config: GeneratorConfig,
    shutdown: Arc<AtomicBool>,
    /// Freshly forged blocks are handed off here for broadcast.
    publisher: Option<Sender<Block>>,
}

impl<R: Repository> BlockGenerator<R> {
    pub fn new(
        repo: Arc<Mutex<R>>,
        params: ChainParams,
        keys: Vec<PrivateKey>,
        at_engine: Arc<dyn AtEngine + Send + Sync>,
        config: GeneratorConfig,
        publisher: Option<Sender<Block>>,
    ) -> Self {
        BlockGenerator {
            repo,
            params,
            keys,
            at_engine,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            publisher,
        }
    }

    /// Flag shared with the loop; set it to stop forging after the current
    /// tick.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the forging loop on the current thread until shut down.
    pub fn run(&self) {
        log::info!("block generator started with {} key(s)", self.keys.len());
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.tick() {
                Ok(Some(block)) => {
                    log::info!(
                        "forged block at height {} with {} transaction(s)",
                        block.height().unwrap_or(0),
                        block.transaction_count()
                    );
                    if let Some(publisher) = &self.publisher {
                        // A closed receiver just means nobody is listening.
                        let _ = publisher.send(block);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("forging tick failed: {e}");
                    thread::sleep(self.config.error_backoff);
                }
            }
            thread::sleep(self.config.poll_interval);
        }
        log::info!("block generator stopped");
    }

    /// One forging attempt. Returns the committed block, if any.
    fn tick(&self) -> Result<Option<Block>, RepositoryError> {
        let Some(mut guard) = self.repo.try_lock() else {
            return Ok(None);
        };
        let repo: &mut R = &mut guard;

        let height = repo.chain_height()?;
        if height == 0 {
            // Nothing to extend until the chain is bootstrapped.
            return Ok(None);
        }
        let tip = repo.block_by_height(height)?.ok_or_else(|| {
            RepositoryError::IllegalState("chain height set but tip block missing".into())
        })?;
        let now = Utc::now().timestamp_millis() as u64;

        for key in &self.keys {
            let generator = key.public_key();
            let stake = repo
                .confirmed_balance(&address_from_public_key(&generator), NATIVE_ASSET)?;
            if stake < self.params.min_generating_balance {
                continue;
            }
            if now < forging::minimum_timestamp(&tip, &generator, &self.params) {
                continue;
            }

            match self.try_forge(repo, &tip, key) {
                Ok(Some(block)) => return Ok(Some(block)),
                Ok(None) => continue,
                Err(e) => {
                    repo.discard()?;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Build, fill, sign, validate, process, commit. Discards working state
    /// when the candidate does not validate.
    fn try_forge(
        &self,
        repo: &mut R,
        tip: &Block,
        key: &PrivateKey,
    ) -> Result<Option<Block>, RepositoryError> {
        let mut candidate = Block::forge(
            repo,
            &self.params,
            tip,
            key.public_key(),
            self.at_engine.as_ref(),
        )?;
        self.fill_from_pool(repo, &mut candidate)?;
        candidate.sign(key);

        let outcome = candidate.is_valid(repo, self.at_engine.as_ref(), &self.params)?;
        if !outcome.is_ok() {
            log::warn!("discarding own candidate: {outcome:?}");
            repo.discard()?;
            return Ok(None);
        }

        candidate.process(repo, &self.params)?;
        repo.commit()?;
        Ok(Some(candidate))
    }

    /// Fill a candidate from the unconfirmed pool, oldest first, skipping
    /// transactions that do not validate against the speculative state and
    /// stopping at the block-size cap.
    ///
    /// Pool hygiene happens first: transactions past their deadline or with
    /// a bad signature can never confirm, so they are deleted from the pool
    /// rather than skipped. The deletions become durable with the block's
    /// commit.
    fn fill_from_pool(
        &self,
        repo: &mut R,
        candidate: &mut Block,
    ) -> Result<(), RepositoryError> {
        let mut pool = Vec::new();
        for tx in repo.unconfirmed_transactions()? {
            if tx.deadline() <= candidate.timestamp() || !tx.is_signature_valid() {
                log::debug!("dropping dead pool transaction");
                repo.delete_transaction(tx.require_signature())?;
                continue;
            }
            pool.push(tx);
        }

        let mut scope = SpeculativeScope::begin(repo)?;
        for tx in pool {
            if tx.timestamp > candidate.timestamp() {
                continue;
            }
            let outcome = tx.validate(scope.repo(), &self.params)?;
            if !outcome.is_ok() {
                log::debug!("pool transaction skipped: {outcome:?}");
                continue;
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
                    log::debug!("pool transaction unprocessable: {e}");
                    continue;
                }
            }
            if !candidate.add_transaction(tx, &self.params) {
                // Size cap reached.
                break;
            }
        }
        Ok(())
    }
}

impl<R: Repository + Send + 'static> BlockGenerator<R> {
    /// Spawn the loop on a named background thread.
    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("block-generator".into())
            .spawn(move || self.run())
            .expect("spawning generator thread")
    }
}
