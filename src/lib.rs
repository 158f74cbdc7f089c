//! Node-level wiring: settings loading and chain bootstrap.

pub mod settings;

pub use settings::Settings;

use anyhow::Context;

use ember_core::block::BlockOutcome;
use ember_core::params::ChainParams;
use ember_core::repository::Repository;
use ember_core::{build_genesis_block, seed_chain_records, NullAtEngine};

/// Bring an empty repository up to a committed genesis state. A repository
/// that already holds blocks is left untouched.
pub fn bootstrap_chain(repo: &mut dyn Repository, params: &ChainParams) -> anyhow::Result<()> {
    if repo.chain_height()? > 0 {
        log::debug!("chain already bootstrapped");
        return Ok(());
    }
    let mut genesis = build_genesis_block(params);
    let outcome = genesis
        .is_valid(repo, &NullAtEngine, params)
        .context("validating genesis block")?;
    if outcome != BlockOutcome::Ok {
        anyhow::bail!("genesis block rejected: {outcome:?}");
    }
    genesis.process(repo, params).context("processing genesis block")?;
    seed_chain_records(repo, params).context("seeding bootstrap records")?;
    repo.commit().context("committing genesis state")?;
    log::info!(
        "chain bootstrapped: genesis with {} grant(s)",
        genesis.transaction_count()
    );
    Ok(())
}
