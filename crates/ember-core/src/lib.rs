//! Consensus core: blocks, transactions, forging rules, and the storage
//! contract they are processed against.

pub mod account;
pub mod amount;
pub mod at;
pub mod block;
pub mod forging;
pub mod genesis;
pub mod params;
pub mod repository;
pub mod transaction;

pub use account::{Account, ApprovalGroup, ForgingDelegation, GroupId};
pub use amount::{Amount, AssetId, NATIVE_ASSET};
pub use at::{AtEngine, AtExecution, AtState, NullAtEngine};
pub use block::{Block, BlockKind, BlockOutcome, COMPOSITE_SIGNATURE_LENGTH};
pub use genesis::{build_genesis_block, seed_chain_records, GENESIS_GENERATOR};
pub use params::{ActivationTrigger, ChainParams, Feature};
pub use repository::{
    ApprovalVoteRecord, Repository, RepositoryError, SpeculativeScope, TransactionMeta,
};
pub use transaction::{
    compare_order, confirmations, ApprovalStatus, Transaction, TransactionOutcome,
    TransactionPayload,
};
