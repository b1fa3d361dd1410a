//! Redirect rule compiler
//!
//! Every domain becomes two rules, one for the bare host and one for its
//! subdomains. Rule ids are a function of the domain's position in the input,
//! never of the domain itself: the installer always replaces the whole table,
//! so ids only have to be unique within one pass.

use crate::config::{BLOCK_PAGE_PATH, BLOCK_PAGE_SITE_PARAM, DEFAULT_RULE_PRIORITY};
use crate::types::{Redirect, ResourceType, Rule, RuleAction, RuleActionType, RuleCondition, RuleId};
use crate::url::encode_uri_component;

/// Knobs for rule generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOptions {
    /// Block page the redirect points at. Either an absolute
    /// `chrome-extension://<id>/blocked.html` URL or the bare path.
    pub block_page: String,
    pub priority: u32,
    /// Only top-level navigations by default, so embeds of a blocked site on
    /// other pages keep working.
    pub resource_types: ResourceType,
    /// Id of the first rule; the rest follow consecutively.
    pub first_id: RuleId,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            block_page: BLOCK_PAGE_PATH.to_string(),
            priority: DEFAULT_RULE_PRIORITY,
            resource_types: ResourceType::MAIN_FRAME,
            first_id: 1,
        }
    }
}

impl RuleOptions {
    /// Options pointing at the block page of an installed extension, given
    /// its base URL (`chrome-extension://<id>/`).
    pub fn for_extension(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            block_page: format!("{}/{}", base, BLOCK_PAGE_PATH),
            ..Self::default()
        }
    }
}

/// `blocked.html?site=<domain>` with the domain percent-encoded.
pub fn block_page_url(block_page: &str, domain: &str) -> String {
    format!(
        "{}?{}={}",
        block_page,
        BLOCK_PAGE_SITE_PARAM,
        encode_uri_component(domain)
    )
}

fn redirect_rule(id: RuleId, url_filter: String, redirect_url: String, options: &RuleOptions) -> Rule {
    Rule {
        id,
        priority: options.priority,
        action: RuleAction {
            kind: RuleActionType::Redirect,
            redirect: Some(Redirect { url: redirect_url }),
        },
        condition: RuleCondition {
            url_filter: Some(url_filter),
            resource_types: options.resource_types,
        },
    }
}

/// Compile a list of unique domains into redirect rules.
///
/// Domain `i` yields ids `first_id + 2i` (`*://domain/*`) and
/// `first_id + 2i + 1` (`*://*.domain/*`). Duplicate domains are not
/// rejected here; callers dedupe first.
pub fn compile_rules(domains: &[String], options: &RuleOptions) -> Vec<Rule> {
    let mut rules = Vec::with_capacity(domains.len() * 2);

    for (index, domain) in domains.iter().enumerate() {
        let base_id = options.first_id + (index as RuleId) * 2;
        let target = block_page_url(&options.block_page, domain);

        rules.push(redirect_rule(base_id, format!("*://{}/*", domain), target.clone(), options));

        // Subdomains, e.g. www.example.com
        rules.push(redirect_rule(base_id + 1, format!("*://*.{}/*", domain), target, options));
    }

    rules
}
