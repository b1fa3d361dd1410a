//! ShameBlock Block List Compiler
//!
//! This crate turns block list text (plain domain lists, hosts files, adblock
//! `||host^` lines) into declarative redirect rulesets, for bundling as a
//! static ruleset or importing into the synced block list.

pub mod parser;
pub mod optimizer;
pub mod builder;

pub use builder::{build_ruleset, ruleset_json, BuildError, Ruleset};
pub use optimizer::{optimize_domains, OptimizeStats};
pub use parser::parse_block_list;
