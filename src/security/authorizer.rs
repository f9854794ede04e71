//! Authorization gate: (identity, policy, operation) -> allow/deny.
//! Pure and synchronous; first matching rule wins.

use serde::Serialize;

use super::classify::{classify, Classification};
use super::operation::{Access, Operation};
use super::policy::SecurityPolicy;
use crate::error::{AppError, AppResult};
use crate::identity::IdentityContext;

pub const NOT_AUTHORIZED: &str = "You are not authorized to access this db.";
pub const NOT_ADMIN: &str = "You are not a db or server admin.";
pub const NOT_SERVER_ADMIN: &str = "You are not a server admin.";

/// Which rule produced a decision; recorded in audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    ServerAdmin,
    OpenDatabase,
    AdminOnly,
    ServerOnly,
    Read,
    Write,
    AnonymousWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allow: bool,
    pub rule: Rule,
    pub class: Classification,
    pub reason: Option<&'static str>,
}

impl Decision {
    fn allow(rule: Rule, class: Classification) -> Self { Self { allow: true, rule, class, reason: None } }
    fn deny(rule: Rule, class: Classification, reason: &'static str) -> Self {
        Self { allow: false, rule, class, reason: Some(reason) }
    }

    /// Deny becomes `Unauthorized`, never `Forbidden`.
    pub fn into_result(self) -> AppResult<()> {
        if self.allow { Ok(()) } else { Err(AppError::unauthorized(self.reason.unwrap_or(NOT_AUTHORIZED))) }
    }
}

pub fn authorize(identity: &IdentityContext, policy: &SecurityPolicy, op: &Operation) -> Decision {
    let class = classify(identity, policy);
    if class == Classification::ServerAdmin {
        return Decision::allow(Rule::ServerAdmin, class);
    }
    let access = op.access();
    match access {
        Access::Server => Decision::deny(Rule::ServerOnly, class, NOT_SERVER_ADMIN),
        Access::Admin => {
            if class.is_admin() { Decision::allow(Rule::AdminOnly, class) } else { Decision::deny(Rule::AdminOnly, class, NOT_ADMIN) }
        }
        _ if policy.is_open() => Decision::allow(Rule::OpenDatabase, class),
        Access::Read => {
            if class.is_member() { Decision::allow(Rule::Read, class) } else { Decision::deny(Rule::Read, class, NOT_AUTHORIZED) }
        }
        Access::Write => {
            if class.is_member() {
                Decision::allow(Rule::Write, class)
            } else if policy.allow_anonymous_writes {
                Decision::allow(Rule::AnonymousWrite, class)
            } else {
                Decision::deny(Rule::Write, class, NOT_AUTHORIZED)
            }
        }
    }
}

#[cfg(test)]
#[path = "authorizer_tests.rs"]
mod authorizer_tests;
