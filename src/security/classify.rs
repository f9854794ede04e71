use serde::Serialize;

use super::policy::SecurityPolicy;
use crate::identity::IdentityContext;

/// Caller class for one (identity, policy) pair. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    ServerAdmin,
    DbAdmin,
    Member,
    /// Anonymous callers and authenticated users listed nowhere.
    NonMember,
}

impl Classification {
    pub fn is_admin(&self) -> bool { matches!(self, Classification::ServerAdmin | Classification::DbAdmin) }

    /// Admins are implicitly members.
    pub fn is_member(&self) -> bool { !matches!(self, Classification::NonMember) }
}

pub fn classify(identity: &IdentityContext, policy: &SecurityPolicy) -> Classification {
    if identity.is_server_admin() {
        Classification::ServerAdmin
    } else if policy.admins.matches(identity) {
        Classification::DbAdmin
    } else if policy.members.matches(identity) {
        Classification::Member
    } else {
        Classification::NonMember
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(v: serde_json::Value) -> SecurityPolicy { SecurityPolicy::from_json(&v).unwrap() }

    #[test]
    fn admin_role_outranks_membership() {
        let p = policy(json!({
            "admins": {"roles": ["top-secret"], "names": []},
            "members": {"roles": ["super-secret-club", "top-secret"], "names": ["joe", "barb"]}
        }));
        assert_eq!(classify(&IdentityContext::named("jchris@apache.org", &["top-secret"]), &p), Classification::DbAdmin);
        assert_eq!(classify(&IdentityContext::named("joe", &[]), &p), Classification::Member);
        assert_eq!(classify(&IdentityContext::named("x", &["super-secret-club"]), &p), Classification::Member);
        assert_eq!(classify(&IdentityContext::anonymous(), &p), Classification::NonMember);
        assert_eq!(classify(&IdentityContext::server_admin("root"), &p), Classification::ServerAdmin);
    }

    #[test]
    fn admins_are_never_non_members() {
        let p = policy(json!({"admins": {"names": ["x"]}}));
        let c = classify(&IdentityContext::named("x", &[]), &p);
        assert!(c.is_admin());
        assert!(c.is_member());
    }
}
