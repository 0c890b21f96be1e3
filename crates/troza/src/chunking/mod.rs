//! Partitioning modules into chunks

pub mod assigner;
pub mod auto;
pub mod rules;

pub use assigner::{Assignment, MatchReason, assign};
pub use auto::{AutoChunkOptions, auto_chunk_rules};
pub use rules::{CompiledRule, RuleSet};
