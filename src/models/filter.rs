//! Process-wide IP allow/deny filter.
//!
//! Consulted by every listener endpoint before a check-in is accepted.
//! Shared read-mostly state: listeners only ever read, the operator
//! surface mutates.

use std::net::IpAddr;

use tokio::sync::RwLock;

/// A single filter pattern: an exact address, or a prefix ending in `.`
/// matching any address underneath it (e.g. `10.4.`).
fn matches(pattern: &str, addr: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('.') {
        addr.starts_with(prefix) && addr[prefix.len()..].starts_with('.')
    } else {
        pattern == addr
    }
}

#[derive(Debug, Default)]
struct FilterLists {
    allow: Vec<String>,
    deny: Vec<String>,
}

/// Shared allow/deny filter. Deny wins over allow; an empty allow list
/// admits every address not explicitly denied.
#[derive(Debug, Default)]
pub struct GlobalFilter {
    lists: RwLock<FilterLists>,
}

impl GlobalFilter {
    /// Build a filter pre-loaded with configured patterns.
    #[must_use]
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self {
            lists: RwLock::new(FilterLists { allow, deny }),
        }
    }

    /// Whether a check-in from `addr` is admitted.
    pub async fn is_allowed(&self, addr: IpAddr) -> bool {
        let addr = addr.to_string();
        let lists = self.lists.read().await;
        if lists.deny.iter().any(|pattern| matches(pattern, &addr)) {
            return false;
        }
        lists.allow.is_empty() || lists.allow.iter().any(|pattern| matches(pattern, &addr))
    }

    /// Add a pattern to the allow list.
    pub async fn allow(&self, pattern: impl Into<String>) {
        self.lists.write().await.allow.push(pattern.into());
    }

    /// Add a pattern to the deny list.
    pub async fn deny(&self, pattern: impl Into<String>) {
        self.lists.write().await.deny.push(pattern.into());
    }

    /// Clear both lists.
    pub async fn reset(&self) {
        let mut lists = self.lists.write().await;
        lists.allow.clear();
        lists.deny.clear();
    }
}
