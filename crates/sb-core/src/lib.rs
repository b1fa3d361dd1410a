//! ShameBlock Core Library
//!
//! This crate provides the rule reconciliation engine for the ShameBlock site
//! blocker. It turns the persisted (blocked sites, enabled flag, temporary
//! whitelist) state into the set of declarative redirect rules the browser
//! enforces, and keeps that set in step with the state.
//!
//! # Architecture
//!
//! Every reconciliation pass is a full re-derivation: read state, expire
//! whitelist entries, compute the active domain list, compile it into rules and
//! replace whatever the browser currently has installed. Passes are serialized
//! by an update lock; a trigger that arrives mid-pass is dropped because the
//! next trigger re-derives the same state anyway.
//!
//! Platform access goes through two traits, [`StateStore`] and [`RuleTable`],
//! so the same engine runs against `chrome.*` APIs in the wasm bindings and
//! against in-memory doubles in tests and the CLI.
//!
//! # Modules
//!
//! - `config`: Storage keys, defaults and timing constants
//! - `types`: Declarative rule records and cross-context messages
//! - `url`: Hostname extraction and percent-encoding
//! - `whitelist`: Pure whitelist expiry / filtering functions
//! - `rules`: Domain list to redirect rule compiler
//! - `storage`: Typed access to the synced and local stores
//! - `rule_table`: Platform rule table access and full replacement
//! - `reconcile`: Update lock and reconciliation orchestrator
//! - `sites`: Block list editing and temporary bypass operations
//! - `stats`: Block and per-site visit counters

pub mod clock;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod rule_table;
pub mod rules;
pub mod sites;
pub mod stats;
pub mod storage;
pub mod types;
pub mod url;
pub mod whitelist;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ReconcileError, RuleTableError, StorageError};
pub use reconcile::{PassOutcome, PassReport, Reconciler, Trigger, UpdateLock};
pub use rule_table::{install_rules, InstallReport, MemoryRuleTable, RuleTable, RuleUpdate};
pub use rules::{compile_rules, RuleOptions};
pub use storage::{MemoryStore, Scope, StateStore, Storage};
pub use types::{Message, MessageResponse, ResourceType, Rule, RuleActionType, RuleId};
pub use whitelist::{cleanup_expired, dedupe, filter_active, TempWhitelist};
