use std::net::IpAddr;

use log::debug;
use sb_core::url::is_valid_domain;

/// Parse block list text into domains, in file order.
///
/// Accepted line forms:
/// - `example.com`
/// - `0.0.0.0 example.com` (hosts file)
/// - `||example.com^` (adblock host anchor, no path or options)
///
/// Blank lines, comments (`#`, `!`, `//`, `[Adblock]` headers) and anything
/// that is not a plain hostname are skipped. A leading `www.` is stripped, the
/// same way the popup stores sites.
pub fn parse_block_list(text: &str) -> Vec<String> {
    let mut domains = Vec::new();

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        let parsed = parse_host_anchor_rule(line)
            .or_else(|| parse_hosts_file_domain(line))
            .or_else(|| normalize_domain(line));

        match parsed {
            Some(domain) => domains.push(domain),
            None => debug!("Skipping line {}: '{}'", line_no + 1, line),
        }
    }

    domains
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || line.starts_with('#') || line.starts_with("//")
}

// "example.com  # why" -> "example.com"
fn strip_inline_comment(line: &str) -> &str {
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_host_anchor_rule(line: &str) -> Option<String> {
    let rest = line.strip_prefix("||")?;
    let rest = rest.strip_prefix('.').unwrap_or(rest);

    // $options change what the rule matches; never widen them to a whole site
    if rest.contains('$') {
        return None;
    }

    let mut end = rest.len();
    for (i, ch) in rest.char_indices() {
        if ch == '^' || ch == '|' {
            end = i;
            break;
        }
        // Paths, ports and options are not expressible as a plain domain
        if ch == '/' || ch == '?' || ch == '#' || ch == ':' || ch == '$' || ch == '*' {
            return None;
        }
    }

    normalize_domain(&rest[..end])
}

fn parse_hosts_file_domain(line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;

    if first.parse::<IpAddr>().is_ok() {
        return normalize_domain(second);
    }

    None
}

fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.').to_ascii_lowercase();
    let host = trimmed.strip_prefix("www.").unwrap_or(&trimmed);

    // Hosts files map these to themselves
    if matches!(host, "localhost" | "localhost.localdomain" | "broadcasthost" | "local" | "0.0.0.0") {
        return None;
    }

    if !is_valid_domain(host) {
        return None;
    }

    Some(host.to_string())
}
