//! Inbound webhook event.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde::Serialize;

/// Header carrying the event type, e.g. `push`.
pub const EVENT_TYPE_HEADER: &str = "x-github-event";

/// Header carrying the sender's delivery identifier.
pub const DELIVERY_ID_HEADER: &str = "x-github-delivery";

/// One inbound webhook notification.
///
/// Built once per POST request and never mutated afterwards. Each isolated
/// unit receives it behind an `Arc`, so actions can only read it.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Delivery identifier, supplied by the sender or generated.
    pub delivery_id: String,
    /// Event type, e.g. `push` or `issues`.
    pub event_type: String,
    /// Request headers, keyed by lower-cased name.
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body.
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(
        delivery_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            event_type: event_type.into(),
            headers: BTreeMap::new(),
            payload,
        }
    }

    /// Attach a header (name is lower-cased).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Build an event from an HTTP request's headers and parsed body.
    ///
    /// Returns `None` when the event-type header is missing. A missing
    /// delivery header gets a fresh UUID. Headers whose values are not
    /// visible ASCII are dropped from the map.
    pub fn from_request(headers: &HeaderMap, payload: serde_json::Value) -> Option<Self> {
        let event_type = headers
            .get(EVENT_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();

        let delivery_id = headers
            .get(DELIVERY_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Some(Self {
            delivery_id,
            event_type,
            headers,
            payload,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Look up a string value by JSON pointer, e.g. `/repository/name`.
    pub fn str_at(&self, pointer: &str) -> Option<&str> {
        self.payload.pointer(pointer).and_then(|v| v.as_str())
    }

    /// A string field of the `repository` object.
    pub fn repository_field(&self, field: &str) -> Option<&str> {
        self.payload
            .get("repository")
            .and_then(|r| r.get(field))
            .and_then(|v| v.as_str())
    }

    /// The originating repository URL, if the payload carries one.
    pub fn repository_url(&self) -> Option<&str> {
        self.repository_field("url")
    }

    pub fn is_push(&self) -> bool {
        self.event_type == "push"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_from_request_reads_event_and_delivery() {
        let map = headers(&[
            ("x-github-event", "push"),
            ("x-github-delivery", "abc-123"),
            ("content-type", "application/json"),
        ]);
        let event = WebhookEvent::from_request(&map, json!({})).unwrap();

        assert_eq!(event.event_type, "push");
        assert_eq!(event.delivery_id, "abc-123");
        assert_eq!(event.header("content-type"), Some("application/json"));
        assert_eq!(event.header("X-GITHUB-EVENT"), Some("push"));
    }

    #[test]
    fn test_from_request_requires_event_type() {
        let map = headers(&[("x-github-delivery", "abc-123")]);
        assert!(WebhookEvent::from_request(&map, json!({})).is_none());

        let blank = headers(&[("x-github-event", "  ")]);
        assert!(WebhookEvent::from_request(&blank, json!({})).is_none());
    }

    #[test]
    fn test_from_request_generates_missing_delivery_id() {
        let map = headers(&[("x-github-event", "ping")]);
        let a = WebhookEvent::from_request(&map, json!({})).unwrap();
        let b = WebhookEvent::from_request(&map, json!({})).unwrap();

        assert!(uuid::Uuid::parse_str(&a.delivery_id).is_ok());
        assert_ne!(a.delivery_id, b.delivery_id);
    }

    #[test]
    fn test_repository_accessors() {
        let event = WebhookEvent::new(
            "d1",
            "push",
            json!({
                "repository": {"name": "foo", "organization": "org", "url": "https://x/org/foo"},
                "head_commit": {"author": {"email": "a@b.com"}}
            }),
        );

        assert_eq!(event.repository_field("name"), Some("foo"));
        assert_eq!(event.repository_url(), Some("https://x/org/foo"));
        assert_eq!(event.str_at("/head_commit/author/email"), Some("a@b.com"));
        assert_eq!(event.str_at("/head_commit/author/name"), None);
        assert!(event.is_push());
    }

    #[test]
    fn test_repository_accessors_tolerate_odd_payloads() {
        let event = WebhookEvent::new("d1", "issues", json!([1, 2, 3]));
        assert_eq!(event.repository_url(), None);
        assert!(!event.is_push());
    }
}
