//! Per-database security object: admins and members, with the legacy `readers` key.
//!
//! Parsing is exhaustive and happens at update time. A security object either
//! parses completely or is rejected with `InvalidPolicy`; consumers never see a
//! partially-typed structure.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::identity::IdentityContext;

/// A set of principals: user names and role names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Principals {
    pub names: Vec<String>,
    pub roles: Vec<String>,
}

impl Principals {
    pub fn is_empty(&self) -> bool { self.names.is_empty() && self.roles.is_empty() }

    /// True when the caller's name or any of its roles is listed.
    pub fn matches(&self, identity: &IdentityContext) -> bool {
        let by_name = identity.name.as_ref().map(|n| self.names.iter().any(|x| x == n)).unwrap_or(false);
        by_name || identity.roles.iter().any(|r| self.roles.iter().any(|x| x == r))
    }
}

/// Which key the membership section was read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipKey {
    #[default]
    Members,
    /// Pre-members name for the same section.
    Readers,
}

impl MembershipKey {
    pub fn as_str(&self) -> &'static str {
        match self { MembershipKey::Members => "members", MembershipKey::Readers => "readers" }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecurityPolicy {
    pub admins: Principals,
    pub members: Principals,
    pub membership_key: MembershipKey,
    /// Set only when `members.allow_anonymous_writes` is the JSON literal `true`.
    pub allow_anonymous_writes: bool,
    raw: Value,
}

impl SecurityPolicy {
    /// The policy every new database starts with: no admins, no members.
    pub fn open() -> Self {
        Self { raw: Value::Object(Map::new()), ..Self::default() }
    }

    /// No admins and no members: everyone may read and write.
    pub fn is_open(&self) -> bool { self.admins.is_empty() && self.members.is_empty() }

    /// The security object exactly as it was submitted.
    pub fn raw(&self) -> &Value { &self.raw }

    pub fn from_json(raw: &Value) -> AppResult<Self> {
        let obj = raw.as_object().ok_or_else(|| AppError::invalid_policy("security object must be a JSON object"))?;

        let admins = match obj.get("admins") {
            Some(v) => parse_section("admins", v)?.0,
            None => Principals::default(),
        };

        // `members` wins when both keys are present; `readers` is only a fallback.
        let (membership_key, section) = match (obj.get("members"), obj.get("readers")) {
            (Some(v), Some(legacy)) => {
                parse_section("readers", legacy)?;
                (MembershipKey::Members, Some(v))
            }
            (Some(v), None) => (MembershipKey::Members, Some(v)),
            (None, Some(v)) => (MembershipKey::Readers, Some(v)),
            (None, None) => (MembershipKey::Members, None),
        };
        let (members, allow_anonymous_writes) = match section {
            Some(v) => parse_section(membership_key.as_str(), v)?,
            None => (Principals::default(), false),
        };

        Ok(Self { admins, members, membership_key, allow_anonymous_writes, raw: raw.clone() })
    }
}

/// Parse one `{names, roles, ...}` section. Returns the principals and the
/// strict inbox flag (`allow_anonymous_writes === true`).
fn parse_section(key: &str, v: &Value) -> AppResult<(Principals, bool)> {
    let obj = match v {
        Value::Object(o) => o,
        _ => return Err(AppError::invalid_policy(format!("{} must be a JSON object", key))),
    };
    let names = string_list(key, "names", obj.get("names"))?;
    let roles = string_list(key, "roles", obj.get("roles"))?;
    let inbox = matches!(obj.get("allow_anonymous_writes"), Some(Value::Bool(true)));
    Ok((Principals { names, roles }, inbox))
}

fn string_list(section: &str, field: &str, v: Option<&Value>) -> AppResult<Vec<String>> {
    let Some(v) = v else { return Ok(Vec::new()); };
    let arr = v
        .as_array()
        .ok_or_else(|| AppError::invalid_policy(format!("{}.{} must be a JSON list of strings", section, field)))?;
    arr.iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| AppError::invalid_policy(format!("{}.{} must contain only strings", section, field)))
        })
        .collect()
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod policy_tests;
