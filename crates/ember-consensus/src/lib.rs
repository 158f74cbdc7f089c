//! The forging loop: turns eligible stake into new blocks.

pub mod generator;

pub use generator::{BlockGenerator, GeneratorConfig};
