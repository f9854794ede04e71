use std::sync::Arc;
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::identity::IdentityContext;
use crate::security::SecurityPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected { reason: String },
}

impl ValidationOutcome {
    pub fn reject<S: Into<String>>(reason: S) -> Self { ValidationOutcome::Rejected { reason: reason.into() } }

    pub fn is_accepted(&self) -> bool { matches!(self, ValidationOutcome::Accepted) }

    /// Rejection becomes `Forbidden` carrying the function's reason verbatim.
    pub fn into_result(self) -> AppResult<()> {
        match self {
            ValidationOutcome::Accepted => Ok(()),
            ValidationOutcome::Rejected { reason } => Err(AppError::forbidden(reason)),
        }
    }
}

/// Everything a validation function may look at. Read-only by construction.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    pub database: &'a str,
    pub new_doc: &'a Value,
    pub old_doc: Option<&'a Value>,
    pub identity: &'a IdentityContext,
    pub policy: &'a SecurityPolicy,
}

/// Capability interface over an opaque policy function.
///
/// `Err` is reserved for engine failures (the function could not run);
/// content rejections are `Ok(Rejected)`.
pub trait ValidationFn: Send + Sync {
    fn id(&self) -> &str;
    fn evaluate(&self, input: &ValidationInput<'_>) -> AppResult<ValidationOutcome>;
}

/// Rust closure as a validation function.
pub struct NativeValidator<F> {
    id: String,
    f: F,
}

impl<F> NativeValidator<F>
where
    F: Fn(&ValidationInput<'_>) -> ValidationOutcome + Send + Sync,
{
    pub fn new<S: Into<String>>(id: S, f: F) -> Self { Self { id: id.into(), f } }
}

impl<F> ValidationFn for NativeValidator<F>
where
    F: Fn(&ValidationInput<'_>) -> ValidationOutcome + Send + Sync,
{
    fn id(&self) -> &str { &self.id }

    fn evaluate(&self, input: &ValidationInput<'_>) -> AppResult<ValidationOutcome> { Ok((self.f)(input)) }
}

/// Ordered list of validation functions; first rejection wins.
#[derive(Clone, Default)]
pub struct ValidationPipeline {
    functions: Vec<Arc<dyn ValidationFn>>,
}

impl ValidationPipeline {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, f: Arc<dyn ValidationFn>) { self.functions.push(f); }

    pub fn with(mut self, f: Arc<dyn ValidationFn>) -> Self { self.push(f); self }

    pub fn len(&self) -> usize { self.functions.len() }

    pub fn is_empty(&self) -> bool { self.functions.is_empty() }

    pub fn ids(&self) -> Vec<&str> { self.functions.iter().map(|f| f.id()).collect() }

    pub fn validate(
        &self,
        database: &str,
        policy: &SecurityPolicy,
        identity: &IdentityContext,
        old_doc: Option<&Value>,
        new_doc: &Value,
    ) -> AppResult<ValidationOutcome> {
        let input = ValidationInput { database, new_doc, old_doc, identity, policy };
        for f in self.functions.iter() {
            match f.evaluate(&input)? {
                ValidationOutcome::Accepted => continue,
                rejected => {
                    debug!(target: "docgate::validation", "validator '{}' rejected update by {:?}", f.id(), identity.name);
                    return Ok(rejected);
                }
            }
        }
        Ok(ValidationOutcome::Accepted)
    }

    /// `validate` with rejection mapped to `Forbidden`.
    pub fn check(
        &self,
        database: &str,
        policy: &SecurityPolicy,
        identity: &IdentityContext,
        old_doc: Option<&Value>,
        new_doc: &Value,
    ) -> AppResult<()> {
        self.validate(database, policy, identity, old_doc, new_doc)?.into_result()
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
