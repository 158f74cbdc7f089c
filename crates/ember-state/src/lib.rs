//! Storage backends for the consensus core.
//!
//! Currently a single in-memory implementation of the repository contract,
//! with the savepoint discipline validation relies on.

pub mod memory;

pub use memory::MemoryRepository;
