//! Source-address allow-list.

use std::net::IpAddr;

/// Coarse allow-list over textual address prefixes.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - anything else → the source address must start with it, so write
///   `10.1.2.` rather than `10.1.2` to stop at an octet boundary
#[derive(Debug, Clone)]
pub struct IngressFilter {
    prefixes: Vec<String>,
}

impl IngressFilter {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn allow_all() -> Self {
        Self::new(vec!["*".to_string()])
    }

    pub fn allows_everyone(&self) -> bool {
        self.prefixes.iter().any(|p| p == "*")
    }

    /// Whether a request from `addr` may be processed.
    pub fn accept(&self, addr: IpAddr) -> bool {
        if self.allows_everyone() {
            return true;
        }
        // IPv4 peers on a dual-stack socket show up as ::ffff:a.b.c.d.
        let addr = addr.to_canonical().to_string();
        self.prefixes.iter().any(|p| addr.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_denies_all() {
        let filter = IngressFilter::new(vec![]);
        assert!(!filter.accept(ip("127.0.0.1")));
        assert!(!filter.accept(ip("::1")));
    }

    #[test]
    fn test_wildcard_allows_all() {
        let filter = IngressFilter::allow_all();
        assert!(filter.accept(ip("8.8.8.8")));
        assert!(filter.accept(ip("2001:db8::1")));
    }

    #[test]
    fn test_prefix_match() {
        let filter = IngressFilter::new(vec!["134.84.231.".into(), "10.0.0.1".into()]);
        assert!(filter.accept(ip("134.84.231.7")));
        assert!(filter.accept(ip("10.0.0.1")));
        assert!(!filter.accept(ip("134.84.232.7")));
        assert!(!filter.accept(ip("127.0.0.1")));
        // Textual prefix: no octet boundary unless the prefix ends in a dot.
        assert!(filter.accept(ip("10.0.0.100")));
    }

    #[test]
    fn test_mapped_ipv4_is_canonicalised() {
        let filter = IngressFilter::new(vec!["127.0.0.".into()]);
        assert!(filter.accept(ip("::ffff:127.0.0.1")));
    }

    #[test]
    fn test_ipv6_prefix() {
        let filter = IngressFilter::new(vec!["2001:db8:".into()]);
        assert!(filter.accept(ip("2001:db8::42")));
        assert!(!filter.accept(ip("2001:db9::42")));
    }
}
