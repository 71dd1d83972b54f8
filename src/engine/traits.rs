/// The hot-path decision interface handed to the embedding server.
///
/// Implementations must be cheap enough to call from every query task
/// concurrently; [`crate::RuleFilter`]'s implementation costs one atomic
/// pointer load plus the matcher lookups.
pub trait DomainMatch: Send + Sync {
    /// Returns true when the domain should be blocked.
    fn is_blocked(&self, domain: &str) -> bool;
}
