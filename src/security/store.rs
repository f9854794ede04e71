use std::sync::Arc;
use parking_lot::RwLock;
use tracing::debug;

use super::policy::SecurityPolicy;
use crate::error::AppResult;

/// The single active security object of one database.
///
/// Readers clone an `Arc` snapshot and never observe a half-applied update.
/// Updates parse and type-check first, so a rejected object leaves the
/// previous policy in place.
#[derive(Debug)]
pub struct PolicyCell {
    current: RwLock<Arc<SecurityPolicy>>,
}

impl Default for PolicyCell {
    fn default() -> Self { Self { current: RwLock::new(Arc::new(SecurityPolicy::open())) } }
}

impl PolicyCell {
    pub fn new() -> Self { Self::default() }

    pub fn snapshot(&self) -> Arc<SecurityPolicy> { self.current.read().clone() }

    pub fn replace(&self, raw: &serde_json::Value) -> AppResult<Arc<SecurityPolicy>> {
        let parsed = Arc::new(SecurityPolicy::from_json(raw)?);
        *self.current.write() = parsed.clone();
        debug!(target: "docgate::security", "security object replaced: admins={:?} members={:?} key={} inbox={}",
            parsed.admins, parsed.members, parsed.membership_key.as_str(), parsed.allow_anonymous_writes);
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_update_keeps_previous_policy() {
        let cell = PolicyCell::new();
        let good = json!({"members": {"roles": ["super-secret-club"], "names": ["joe", "barb"]}});
        cell.replace(&good).unwrap();

        let bad = json!({"members": {"roles": ["super-secret-club", {"top-secret": "awesome"}], "names": ["joe", 22]}});
        assert!(cell.replace(&bad).is_err());
        assert!(cell.replace(&json!({"members": {"names": "joe"}})).is_err());
        assert_eq!(cell.snapshot().raw(), &good);
    }

    #[test]
    fn snapshots_are_stable_across_updates() {
        let cell = PolicyCell::new();
        let before = cell.snapshot();
        cell.replace(&json!({"admins": {"names": ["x"]}})).unwrap();
        assert!(before.is_open());
        assert!(!cell.snapshot().is_open());
    }

    #[test]
    fn concurrent_readers_see_whole_policies() {
        let cell = Arc::new(PolicyCell::new());
        let a = json!({"admins": {"names": ["a"]}, "members": {"names": ["a"]}});
        let b = json!({"admins": {"names": ["b"]}, "members": {"names": ["b"]}});
        let writer = {
            let cell = cell.clone();
            let (a, b) = (a.clone(), b.clone());
            std::thread::spawn(move || {
                for i in 0..500 { cell.replace(if i % 2 == 0 { &a } else { &b }).unwrap(); }
            })
        };
        for _ in 0..500 {
            let p = cell.snapshot();
            if !p.is_open() { assert_eq!(p.admins.names, p.members.names); }
        }
        writer.join().unwrap();
    }
}
