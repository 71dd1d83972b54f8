//! AdGuard-syntax rule parser.
//!
//! Reads one rule-list text stream line by line and inserts normalized
//! [`Rule`]s into the supplied allow/deny matcher builders. Unsupported
//! syntax (cosmetic rules, hosts entries, element hiding) is skipped;
//! invalid regex patterns are skipped with a warning. Only lines that
//! actually land in a builder are counted.

use super::matcher::{clean_domain, rule_from_domain, DomainMatcher, Rule};
use regex::Regex;
use std::io::{self, BufRead};
use std::sync::LazyLock;

static ALLOW_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@\|\|([\w.\-*]+)\^$").unwrap());
static BLOCK_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|\|([\w.\-*]+)\^$").unwrap());
static REGEX_RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/(.*)/$").unwrap());
static BARE_DOMAIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([\w.\-]+)$").unwrap());

/// Result of parsing one rule stream.
///
/// `added` counts rules successfully inserted into a builder. `error`
/// carries the I/O error that ended the scan early, if any; rules added
/// before the failure remain in the builders and in the count.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub added: usize,
    pub error: Option<io::Error>,
}

/// Parses AdGuard-syntax rules from `reader` into the two builders.
pub fn parse_rules<R: BufRead>(
    reader: R,
    allow: &mut DomainMatcher,
    deny: &mut DomainMatcher,
) -> ParseOutcome {
    let mut added = 0;

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                return ParseOutcome {
                    added,
                    error: Some(err),
                }
            }
        };
        let line = line.trim();

        if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
            continue;
        }

        // Hosts-format entries ("0.0.0.0 ads.example.com"). A line whose
        // single field merely contains a loopback literal falls through.
        if line.bytes().any(|b| b.is_ascii_digit())
            && (line.contains("127.0.0.1") || line.contains("0.0.0.0") || line.contains("::"))
            && line.split_whitespace().nth(1).is_some()
        {
            continue;
        }

        // Cosmetic and element-hiding rules have no DNS meaning.
        if line.contains("#?#") || line.contains("##") || line.contains("$$") {
            continue;
        }

        if let Some(caps) = ALLOW_RULE.captures(line) {
            let rule = rule_from_domain(clean_domain(&caps[1]));
            if allow.insert_logged(rule, line) {
                added += 1;
            }
        } else if let Some(caps) = BLOCK_RULE.captures(line) {
            let rule = rule_from_domain(clean_domain(&caps[1]));
            if deny.insert_logged(rule, line) {
                added += 1;
            }
        } else if let Some(caps) = REGEX_RULE.captures(line) {
            let rule = Rule::Regex(caps[1].to_string());
            if deny.insert_logged(rule, line) {
                added += 1;
            }
        } else if let Some(caps) = BARE_DOMAIN.captures(line) {
            let domain = &caps[1];
            if domain.contains('.') && !domain.starts_with('*') && !domain.ends_with('*') {
                if deny.insert_logged(Rule::Exact(domain.to_string()), line) {
                    added += 1;
                }
            }
        }
    }

    ParseOutcome { added, error: None }
}
