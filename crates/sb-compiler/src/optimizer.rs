use std::collections::HashSet;

use sb_core::whitelist::dedupe;

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    /// Subdomains dropped because a listed parent already blocks them
    pub covered: usize,
}

/// Shrink a domain list without changing what it blocks.
///
/// Every domain compiles to a bare-host rule plus a `*.domain` rule, so
/// `old.reddit.com` is redundant once `reddit.com` is listed.
pub fn optimize_domains(domains: &mut Vec<String>) -> OptimizeStats {
    let before = domains.len();

    *domains = dedupe(domains);
    let deduped = before - domains.len();

    let listed: HashSet<String> = domains.iter().cloned().collect();
    let mut covered = 0usize;
    domains.retain(|domain| {
        if has_listed_parent(domain, &listed) {
            covered += 1;
            false
        } else {
            true
        }
    });

    OptimizeStats {
        before,
        after: domains.len(),
        deduped,
        covered,
    }
}

fn has_listed_parent(domain: &str, listed: &HashSet<String>) -> bool {
    let mut rest = domain;
    while let Some(dot) = rest.find('.') {
        rest = &rest[dot + 1..];
        if listed.contains(rest) {
            return true;
        }
    }
    false
}
