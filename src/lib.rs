//! AdGuard rule-list lifecycle engine for an embedding DNS server.
//!
//! The crate maintains a set of URL-backed AdGuard-syntax rule lists on
//! disk, parses them into indexed domain matchers, and publishes the
//! matchers as an immutable snapshot that the server's query path reads
//! lock-free. A control-plane HTTP API ([`RuleFilter::api_router`])
//! manages the lists at runtime; a background task refreshes lists on
//! their configured intervals.
//!
//! Note that enabling a list via `PUT` does not force a download: the
//! list contributes nothing until its local file exists (from a manual
//! `POST /update`, the auto-updater, or a restart).

mod api;
pub mod config;
mod download;
pub mod engine;
pub mod filter;
pub mod store;

pub use config::FilterConfig;
pub use engine::{DomainMatch, DomainMatcher, Rule, RuleSnapshot};
pub use filter::RuleFilter;
pub use store::RuleList;
