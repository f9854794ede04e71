use serde::{Deserialize, Serialize};

/// Reserved role held by server administrators.
pub const SERVER_ADMIN_ROLE: &str = "_admin";

/// Caller identity as resolved by the authentication layer.
///
/// Built once per request and threaded explicitly into every authorization and
/// validation call. `name == None` is the anonymous caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityContext {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl IdentityContext {
    pub fn anonymous() -> Self { Self::default() }

    pub fn named<S: Into<String>>(name: S, roles: &[&str]) -> Self {
        Self { name: Some(name.into()), roles: roles.iter().map(|r| r.to_string()).collect() }
    }

    pub fn server_admin<S: Into<String>>(name: S) -> Self {
        Self { name: Some(name.into()), roles: vec![SERVER_ADMIN_ROLE.to_string()] }
    }

    pub fn is_anonymous(&self) -> bool { self.name.is_none() }

    pub fn has_role(&self, role: &str) -> bool { self.roles.iter().any(|r| r == role) }

    pub fn is_server_admin(&self) -> bool { self.has_role(SERVER_ADMIN_ROLE) }

    /// JSON handed to policy functions as the user context argument.
    /// Anonymous callers carry no `name` key, so functions see `nil` rather than `null`.
    pub fn to_function_json(&self, db: &str) -> serde_json::Value {
        let mut ctx = serde_json::json!({ "db": db, "roles": self.roles });
        if let Some(name) = self.name.as_ref() {
            ctx["name"] = serde_json::Value::String(name.clone());
        }
        ctx
    }
}
