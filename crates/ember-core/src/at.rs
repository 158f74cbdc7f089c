//! Boundary to the automated-transaction (AT) execution engine.
//!
//! The engine itself is external and pluggable; the consensus core treats
//! its output as opaque input to prepend into a block and fold into fee
//! totals. Executions must be deterministic in (ledger state, timestamp).

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::repository::{Repository, RepositoryError};
use crate::transaction::Transaction;

/// State emitted by one AT execution, persisted once per block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtState {
    pub at_address: String,
    /// Height of the containing block. The engine leaves this zero; it is
    /// stamped when the execution is placed into a candidate.
    pub height: u32,
    /// Block timestamp the AT executed against.
    pub timestamp: u64,
    /// Opaque machine state after execution.
    pub state: Vec<u8>,
    /// Digest of `state`, compared during AT reconciliation.
    pub state_hash: Vec<u8>,
    /// Fees charged to the AT account for this execution.
    pub fees: Amount,
}

/// One AT execution: a generated transaction plus the state it produced.
/// The fee of the triple is `state.fees`.
#[derive(Clone, Debug)]
pub struct AtExecution {
    pub transaction: Transaction,
    pub state: AtState,
}

impl AtExecution {
    pub fn fee(&self) -> Amount {
        self.state.fees
    }
}

/// The AT engine contract: run all executable ATs against the current
/// ledger state for a given block timestamp.
pub trait AtEngine {
    fn run(
        &self,
        repo: &dyn Repository,
        block_timestamp: u64,
    ) -> Result<Vec<AtExecution>, RepositoryError>;
}

/// Engine used on chains without AT support: never produces executions.
pub struct NullAtEngine;

impl AtEngine for NullAtEngine {
    fn run(
        &self,
        _repo: &dyn Repository,
        _block_timestamp: u64,
    ) -> Result<Vec<AtExecution>, RepositoryError> {
        Ok(Vec::new())
    }
}
