//! Ruleset builder
//!
//! Wraps the core rule compiler for offline use: the output is the JSON array
//! a manifest's `declarative_net_request.rule_resources` entry points at.

use sb_core::config::MAX_DYNAMIC_RULES;
use sb_core::rules::{compile_rules, RuleOptions};
use sb_core::Rule;

use crate::optimizer::{optimize_domains, OptimizeStats};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{count} rules exceed the limit of {limit}")]
    TooManyRules { count: usize, limit: usize },
    #[error("failed to serialize ruleset: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Compiled rules together with the domain list they came from.
pub struct Ruleset {
    pub domains: Vec<String>,
    pub rules: Vec<Rule>,
    pub stats: OptimizeStats,
}

/// Optimize `domains` and compile them into rules.
pub fn build_ruleset(mut domains: Vec<String>, options: &RuleOptions) -> Result<Ruleset, BuildError> {
    let stats = optimize_domains(&mut domains);
    let rules = compile_rules(&domains, options);

    if rules.len() > MAX_DYNAMIC_RULES {
        return Err(BuildError::TooManyRules {
            count: rules.len(),
            limit: MAX_DYNAMIC_RULES,
        });
    }

    Ok(Ruleset { domains, rules, stats })
}

/// Pretty-printed JSON array of rules.
pub fn ruleset_json(rules: &[Rule]) -> Result<String, BuildError> {
    Ok(serde_json::to_string_pretty(rules)?)
}
