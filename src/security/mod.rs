//! Per-database security: the policy object, caller classification, the
//! authorization gate and audit hooks.
//!
//! Keep each concern in a small sub-module; the gate itself is a pure function
//! over `(IdentityContext, SecurityPolicy, Operation)`.

pub mod policy;
pub mod classify;
pub mod operation;
pub mod authorizer;
pub mod store;
pub mod hooks;

// Re-exports for thin public surface
pub use policy::{SecurityPolicy, Principals, MembershipKey};
pub use classify::{classify, Classification};
pub use operation::{Access, Operation, OperationKind};
pub use authorizer::{authorize, Decision, Rule};
pub use store::PolicyCell;
pub use hooks::{AuditHook, AuditRegistry, AuthEvent, ValidationEvent, TracingAudit, FileAudit};
