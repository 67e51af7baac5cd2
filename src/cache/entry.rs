//! Cache Entry Module
//!
//! A stored response together with the request key it answers and the time
//! it was inserted.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{ProxyResponse, ResponseSource};

// == Cache Entry ==
/// A (request key, stored response, insertion time) triple inside one store.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request key the entry answers
    pub key: String,
    /// The stored response
    pub response: ProxyResponse,
    /// When the entry was written
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry stamped with the current time.
    pub fn new(key: impl Into<String>, response: ProxyResponse) -> Self {
        Self {
            key: key.into(),
            response,
            inserted_at: Utc::now(),
        }
    }

    // == Age ==
    /// Time elapsed since insertion. Zero if the clock moved backwards.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.inserted_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Returns true once the entry is at least `max_age` old.
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.age() >= max_age
    }

    /// The stored response, tagged as served from the store.
    pub fn into_response(self) -> ProxyResponse {
        self.response.with_source(ResponseSource::Cache)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("https://app.test/", ProxyResponse::new(200, "home"));

        assert_eq!(entry.key, "https://app.test/");
        assert_eq!(entry.response.body, "home");
        assert!(entry.age() < Duration::from_secs(5));
    }

    #[test]
    fn test_into_response_marks_cache_source() {
        let entry = CacheEntry::new("k", ProxyResponse::new(200, "body"));
        let response = entry.into_response();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.body, "body");
    }

    #[test]
    fn test_age_boundary_condition() {
        let entry = CacheEntry {
            key: "k".to_string(),
            response: ProxyResponse::new(200, "x"),
            inserted_at: Utc::now() - chrono::Duration::seconds(120),
        };

        assert!(entry.is_older_than(Duration::from_secs(60)));
        assert!(!entry.is_older_than(Duration::from_secs(600)));
    }

    #[test]
    fn test_future_insertion_has_zero_age() {
        let entry = CacheEntry {
            key: "k".to_string(),
            response: ProxyResponse::new(200, "x"),
            inserted_at: Utc::now() + chrono::Duration::seconds(30),
        };

        assert_eq!(entry.age(), Duration::ZERO);
    }
}
