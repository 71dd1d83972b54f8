use regex::Regex;
use rustc_hash::FxHashSet;
use std::borrow::Cow;
use tracing::warn;

/// One normalized decision entry.
///
/// `Exact` matches the fully-qualified domain only, `Suffix` matches the
/// domain itself and any subdomain, `Regex` matches the whole domain
/// string against a pattern. Domains are expected lowercase without a
/// trailing dot; [`DomainMatcher::insert`] normalizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Exact(String),
    Suffix(String),
    Regex(String),
}

/// Indexed domain matcher over exact, suffix, and regex rules.
///
/// Built mutably during a reload, then frozen inside a [`RuleSnapshot`];
/// lookups never mutate, so a published matcher is safe for unlimited
/// concurrent readers.
#[derive(Debug, Default)]
pub struct DomainMatcher {
    exact: FxHashSet<Box<str>>,
    suffix: FxHashSet<Box<str>>,
    regex: Vec<Regex>,
}

impl DomainMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule to the index.
    ///
    /// # Errors
    ///
    /// Returns the compile error for an invalid `Rule::Regex` pattern;
    /// the matcher is unchanged in that case.
    pub fn insert(&mut self, rule: Rule) -> Result<(), regex::Error> {
        match rule {
            Rule::Exact(d) => {
                self.exact.insert(d.to_ascii_lowercase().into_boxed_str());
            }
            Rule::Suffix(d) => {
                self.suffix.insert(d.to_ascii_lowercase().into_boxed_str());
            }
            Rule::Regex(pattern) => {
                self.regex.push(Regex::new(&pattern)?);
            }
        }
        Ok(())
    }

    /// Checks `domain` (already lowercase, no trailing dot) against all
    /// three indices: exact, then suffix, then regex.
    pub fn is_match(&self, domain: &str) -> bool {
        if self.exact.contains(domain) {
            return true;
        }

        // Iterative suffix walk: strip one label at a time.
        let mut part = domain;
        loop {
            if self.suffix.contains(part) {
                return true;
            }
            match part.find('.') {
                Some(idx) => {
                    part = &part[idx + 1..];
                    if part.is_empty() {
                        break;
                    }
                }
                None => break,
            }
        }

        self.regex.iter().any(|re| re.is_match(domain))
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.suffix.len() + self.regex.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a rule, logging and swallowing invalid regex patterns.
    ///
    /// Returns true when the rule was added. Used by the parser, where a
    /// bad pattern skips the line rather than failing the list.
    pub(crate) fn insert_logged(&mut self, rule: Rule, line: &str) -> bool {
        match self.insert(rule) {
            Ok(()) => true,
            Err(err) => {
                warn!(%line, %err, "skipping rule that compiles to an invalid regex");
                false
            }
        }
    }
}

/// An immutable `(allow, deny)` pair published to hot-path readers.
///
/// An allow hit forces "not blocked" even when a deny rule also matches.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    allow: DomainMatcher,
    deny: DomainMatcher,
}

impl RuleSnapshot {
    pub fn new(allow: DomainMatcher, deny: DomainMatcher) -> Self {
        Self { allow, deny }
    }

    /// Returns true iff the domain should be blocked.
    ///
    /// Accepts DNS presentation names: the input is lowercased and one
    /// trailing dot is stripped before lookup.
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.');
        let domain: Cow<'_, str> = if domain.bytes().any(|b| b.is_ascii_uppercase()) {
            Cow::Owned(domain.to_ascii_lowercase())
        } else {
            Cow::Borrowed(domain)
        };

        if self.allow.is_match(&domain) {
            return false;
        }
        self.deny.is_match(&domain)
    }

    pub fn rule_count(&self) -> usize {
        self.allow.len() + self.deny.len()
    }
}

/// Converts a cleaned AdGuard domain into a [`Rule`].
///
/// A wildcard anywhere turns the domain into an unanchored regex rule
/// (dots escaped, `*` widened to `.*`); otherwise the domain matches as
/// a suffix.
pub fn rule_from_domain(domain: &str) -> Rule {
    if domain.contains('*') {
        let pattern = domain.replace('.', r"\.").replace('*', ".*");
        Rule::Regex(pattern)
    } else {
        Rule::Suffix(domain.to_string())
    }
}

/// Strips a leading `*.` then a leading `.` from an extracted domain.
pub fn clean_domain(domain: &str) -> &str {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    domain.strip_prefix('.').unwrap_or(domain)
}
