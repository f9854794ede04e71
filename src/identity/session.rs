use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use base64::Engine;
use crate::tprintln;

use super::principal::IdentityContext;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub identity: IdentityContext,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

/// The OS random source failed; no session may be issued without it.
#[derive(Debug, thiserror::Error)]
#[error("session token generation failed: {0}")]
pub struct TokenError(String);

fn gen_token() -> Result<String, TokenError> {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| TokenError(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Cookie session table. Owned by the server state; never consulted by the gate itself.
pub struct SessionManager {
    pub ttl: Duration,
    sessions: RwLock<HashMap<SessionToken, Session>>,
    user_index: RwLock<HashMap<String, HashSet<SessionToken>>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::with_ttl(Duration::from_secs(10 * 60)) }
}

impl SessionManager {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, sessions: RwLock::new(HashMap::new()), user_index: RwLock::new(HashMap::new()) }
    }

    pub fn issue(&self, identity: IdentityContext) -> anyhow::Result<Session> {
        let now = Instant::now();
        let token = gen_token()?;
        self.sweep_expired(now);
        let sess = Session { token: token.clone(), identity: identity.clone(), issued_at: now, expires_at: now + self.ttl };
        self.sessions.write().insert(token.clone(), sess.clone());
        if let Some(name) = identity.name.as_ref() {
            self.user_index.write().entry(name.clone()).or_default().insert(token);
        }
        tprintln!("session.issue user={:?} ttl_secs={}", identity.name, self.ttl.as_secs());
        Ok(sess)
    }

    pub fn len(&self) -> usize { self.sessions.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Drop every session that expired at or before `now`.
    fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<Session> = {
            let mut map = self.sessions.write();
            let tokens: Vec<SessionToken> = map.values().filter(|s| s.expires_at <= now).map(|s| s.token.clone()).collect();
            tokens.iter().filter_map(|t| map.remove(t)).collect()
        };
        if expired.is_empty() { return 0; }
        let mut index = self.user_index.write();
        for sess in expired.iter() {
            let Some(name) = sess.identity.name.as_ref() else { continue };
            if let Some(set) = index.get_mut(name) {
                set.remove(&sess.token);
                if set.is_empty() { index.remove(name); }
            }
        }
        tprintln!("session.sweep expired={}", expired.len());
        expired.len()
    }

    /// Resolve a token to the identity it was issued for; expired tokens are dropped.
    pub fn validate(&self, token: &str) -> Option<IdentityContext> {
        let now = Instant::now();
        let expired = {
            let map = self.sessions.read();
            match map.get(token) {
                Some(s) if s.expires_at > now => return Some(s.identity.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if expired { self.logout(token); }
        None
    }

    pub fn logout(&self, token: &str) -> bool {
        let Some(sess) = self.sessions.write().remove(token) else { return false; };
        if let Some(name) = sess.identity.name.as_ref() {
            if let Some(set) = self.user_index.write().get_mut(name) { set.remove(token); }
        }
        true
    }

    /// Drop every session of a user, e.g. after a password or role change.
    pub fn revoke_user(&self, name: &str) -> usize {
        let tokens = self.user_index.write().remove(name).unwrap_or_default();
        let mut s = self.sessions.write();
        let count = tokens.iter().filter(|t| s.remove(t.as_str()).is_some()).count();
        tprintln!("session.revoke user={} count={}", name, count);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_validate_logout() {
        let sm = SessionManager::default();
        let s = sm.issue(IdentityContext::named("a_member", &[])).unwrap();
        assert_eq!(sm.validate(&s.token).and_then(|i| i.name), Some("a_member".to_string()));
        assert!(sm.logout(&s.token));
        assert!(sm.validate(&s.token).is_none());
        assert!(!sm.logout(&s.token));
    }

    #[test]
    fn expired_sessions_do_not_validate() {
        let sm = SessionManager::with_ttl(Duration::from_millis(0));
        let s = sm.issue(IdentityContext::named("joe", &[])).unwrap();
        assert!(sm.validate(&s.token).is_none());
    }

    #[test]
    fn revoke_user_drops_all_tokens() {
        let sm = SessionManager::default();
        let a = sm.issue(IdentityContext::named("barb", &[])).unwrap();
        let b = sm.issue(IdentityContext::named("barb", &[])).unwrap();
        let other = sm.issue(IdentityContext::named("joe", &[])).unwrap();
        assert_eq!(sm.revoke_user("barb"), 2);
        assert!(sm.validate(&a.token).is_none());
        assert!(sm.validate(&b.token).is_none());
        assert!(sm.validate(&other.token).is_some());
    }

    #[test]
    fn issuing_sweeps_expired_sessions() {
        let sm = SessionManager::with_ttl(Duration::from_millis(0));
        for _ in 0..3 {
            sm.issue(IdentityContext::named("joe", &[])).unwrap();
        }
        sm.issue(IdentityContext::named("barb", &[])).unwrap();
        // only the most recent session survives each sweep
        assert_eq!(sm.len(), 1);
        assert_eq!(sm.revoke_user("joe"), 0);
        assert_eq!(sm.revoke_user("barb"), 1);
        assert!(sm.is_empty());
    }

    #[test]
    fn tokens_are_distinct() {
        let sm = SessionManager::default();
        let a = sm.issue(IdentityContext::named("joe", &[])).unwrap();
        let b = sm.issue(IdentityContext::named("joe", &[])).unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 43);
        assert_eq!(sm.len(), 2);
    }
}
