//! Observation bookkeeping
//!
//! Tracks outstanding observe registrations by request token together with
//! the number of mitigations currently observed under each. The count is
//! unknown until the first notification. Dropping an entry here does not
//! cancel the transport-level registration.

use std::collections::HashMap;

use dots_client_core::Token;
use serde::Serialize;
use tracing::debug;

/// One outstanding observe registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestQuery {
    /// Canonical query string the registration was made with
    pub query: String,
    /// Mitigations observed under this token, `None` before the first notification
    pub count_mitigation: Option<u32>,
}

impl RequestQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            count_mitigation: None,
        }
    }
}

/// Mitigation status change carried by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MitigationChange {
    Created,
    Expired,
}

#[derive(Debug, Default)]
pub struct ObservationRegistry {
    queries: HashMap<Token, RequestQuery>,
}

impl ObservationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, token: Token, query: impl Into<String>) {
        let query = RequestQuery::new(query);
        debug!("Observing token {} for query '{}'", token, query.query);
        self.queries.insert(token, query);
    }

    pub fn get(&self, token: &Token) -> Option<&RequestQuery> {
        self.queries.get(token)
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.queries.contains_key(token)
    }

    /// Record a known count, e.g. from the first notification body
    pub fn set_observed_count(&mut self, token: &Token, count: u32) {
        if count == 0 {
            self.remove(token);
        } else if let Some(query) = self.queries.get_mut(token) {
            query.count_mitigation = Some(count);
        }
    }

    /// Apply a notification; returns the count left, `None` once removed
    pub fn update_count(&mut self, token: &Token, change: MitigationChange) -> Option<u32> {
        let query = self.queries.get_mut(token)?;
        let count = match (change, query.count_mitigation) {
            (MitigationChange::Created, None) => 1,
            (MitigationChange::Created, Some(count)) => count.saturating_add(1),
            (MitigationChange::Expired, None) | (MitigationChange::Expired, Some(0..=1)) => 0,
            (MitigationChange::Expired, Some(count)) => count - 1,
        };

        if count == 0 {
            self.remove(token);
            return None;
        }
        query.count_mitigation = Some(count);
        Some(count)
    }

    pub fn remove(&mut self, token: &Token) -> Option<RequestQuery> {
        let removed = self.queries.remove(token);
        if removed.is_some() {
            debug!("Stopped observing token {}", token);
        }
        removed
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.queries.keys()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn clear(&mut self) {
        self.queries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Token {
        Token::new(vec![1, 2, 3, 4])
    }

    #[test]
    fn created_then_expired_counts() {
        let mut registry = ObservationRegistry::new();
        registry.register(token(), "cuid=abc");
        registry.set_observed_count(&token(), 1);

        assert_eq!(registry.update_count(&token(), MitigationChange::Created), Some(2));
        assert_eq!(registry.get(&token()).unwrap().count_mitigation, Some(2));
        assert_eq!(registry.update_count(&token(), MitigationChange::Expired), Some(1));
        assert_eq!(registry.update_count(&token(), MitigationChange::Expired), None);
        assert!(!registry.contains(&token()));
    }

    #[test]
    fn first_notification_starts_the_count() {
        let mut registry = ObservationRegistry::new();
        registry.register(token(), "cuid=abc&mid=12");
        assert_eq!(registry.get(&token()).unwrap().count_mitigation, None);
        assert_eq!(registry.update_count(&token(), MitigationChange::Created), Some(1));
        assert_eq!(registry.get(&token()).unwrap().query, "cuid=abc&mid=12");
    }

    #[test]
    fn expiry_before_any_count_removes_the_query() {
        let mut registry = ObservationRegistry::new();
        registry.register(token(), "cuid=abc");
        assert_eq!(registry.update_count(&token(), MitigationChange::Expired), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_token_is_ignored() {
        let mut registry = ObservationRegistry::new();
        assert_eq!(registry.update_count(&token(), MitigationChange::Created), None);
        assert!(registry.is_empty());
    }
}
