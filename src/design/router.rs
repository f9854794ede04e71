//! Request classification: (method, path) -> semantic operation + target.
//!
//! Classification never looks at document contents; it only decides what the
//! request *means* so the gate can rule on it before anything runs. `_rewrite`
//! entry points are followed to their destination and classified there.

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::Serialize;
use tracing::debug;

use super::ddoc::{DesignDoc, DESIGN_PREFIX};
use super::rewrite::rewrite;
use crate::error::{AppError, AppResult};
use crate::identity::RequestContext;
use crate::security::{authorize, AuditRegistry, AuthEvent, Decision, Operation, OperationKind, SecurityPolicy};

/// Design document lookup for the database a request targets.
pub trait DesignDocs {
    fn design_doc(&self, id: &str) -> Option<Arc<DesignDoc>>;
}

/// For requests against databases that do not exist yet.
pub struct NoDesignDocs;

impl DesignDocs for NoDesignDocs {
    fn design_doc(&self, _id: &str) -> Option<Arc<DesignDoc>> { None }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Target {
    Database,
    CreateDoc,
    Doc { id: String },
    Attachment { id: String, name: String },
    AllDocs,
    Changes,
    TempView,
    Security,
    BulkDocs,
    View { ddoc: String, view: String },
    Show { ddoc: String, name: String, doc_id: Option<String> },
    List { ddoc: String, name: String, view_ddoc: String, view: String },
    Update { ddoc: String, name: String, doc_id: Option<String> },
    /// `_rewrite` path no rule matched.
    RewriteMiss,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub db: String,
    pub method: String,
    pub operation: Operation,
    pub target: Target,
    /// Final path after rewrites, percent-encoded.
    pub path: String,
    /// Original `_rewrite` path when the route was reached through one.
    pub rewritten_from: Option<String>,
    /// Request query merged with parameters contributed by rewrite rules.
    pub query: BTreeMap<String, String>,
}

impl Route {
    pub fn kind(&self) -> OperationKind { self.operation.kind }

    pub fn authorize(&self, policy: &SecurityPolicy, identity: &crate::identity::IdentityContext) -> Decision {
        authorize(identity, policy, &self.operation)
    }
}

/// POST with `X-HTTP-Method-Override` behaves as the overriding method.
pub fn effective_method(method: &str, override_header: Option<&str>) -> String {
    match override_header.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) if method.eq_ignore_ascii_case("POST") => m.to_ascii_uppercase(),
        _ => method.to_ascii_uppercase(),
    }
}

/// Split and percent-decode a request path.
pub fn path_segments(path: &str) -> AppResult<Vec<String>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|c| c.into_owned())
                .map_err(|_| AppError::bad_request(format!("invalid path segment: {}", s)))
        })
        .collect()
}

fn encode_path(segments: &[String]) -> String {
    let parts: Vec<String> = segments.iter().map(|s| urlencoding::encode(s).into_owned()).collect();
    format!("/{}", parts.join("/"))
}

fn is_write_method(method: &str) -> bool { matches!(method, "PUT" | "POST" | "DELETE" | "COPY") }

#[derive(Clone)]
pub struct DesignResourceRouter {
    max_rewrite_depth: usize,
    audit: AuditRegistry,
}

impl DesignResourceRouter {
    pub fn new(max_rewrite_depth: usize, audit: AuditRegistry) -> Self { Self { max_rewrite_depth, audit } }

    pub fn audit(&self) -> &AuditRegistry { &self.audit }

    /// Classify a request. `method` must already be the effective method.
    pub fn classify(&self, method: &str, path: &str, query: &BTreeMap<String, String>, ddocs: &dyn DesignDocs) -> AppResult<Route> {
        let segments = path_segments(path)?;
        if segments.is_empty() {
            return Err(AppError::bad_request("missing database name"));
        }
        let method = method.to_ascii_uppercase();
        self.classify_segments(&method, segments, query.clone(), ddocs, 0, None)
    }

    /// Classify and authorize. Denials are audited and returned as `Unauthorized`
    /// whatever the method.
    pub fn resolve(
        &self,
        method: &str,
        path: &str,
        query: &BTreeMap<String, String>,
        ddocs: &dyn DesignDocs,
        policy: &SecurityPolicy,
        ctx: &RequestContext,
    ) -> AppResult<Route> {
        let route = self.classify(method, path, query, ddocs)?;
        let decision = route.authorize(policy, &ctx.identity);
        self.audit.emit_authorize(&AuthEvent {
            database: route.db.clone(),
            identity: ctx.identity.clone(),
            operation: route.kind(),
            method: route.method.clone(),
            path: route.rewritten_from.clone().unwrap_or_else(|| route.path.clone()),
            decision: decision.clone(),
            request_id: ctx.request_id.clone(),
        });
        decision.into_result()?;
        Ok(route)
    }

    fn classify_segments(
        &self,
        method: &str,
        segments: Vec<String>,
        query: BTreeMap<String, String>,
        ddocs: &dyn DesignDocs,
        depth: usize,
        rewritten_from: Option<String>,
    ) -> AppResult<Route> {
        use OperationKind as K;
        let db = segments[0].clone();
        let rest: Vec<&str> = segments[1..].iter().map(String::as_str).collect();
        let read_or = |write: K, read: K| if is_write_method(method) { write } else { read };

        let (kind, target) = match rest.as_slice() {
            [] => match method {
                "PUT" | "DELETE" => (K::ManageDb, Target::Database),
                "POST" => (K::WriteDoc, Target::CreateDoc),
                _ => (K::DbInfo, Target::Database),
            },
            ["_all_docs"] => (K::AllDocs, Target::AllDocs),
            ["_changes"] => (K::Changes, Target::Changes),
            ["_temp_view"] => (K::TempView, Target::TempView),
            ["_bulk_docs"] => (K::WriteDoc, Target::BulkDocs),
            ["_security"] => {
                let kind = if method == "PUT" { K::SecurityWrite } else { K::SecurityRead };
                (kind, Target::Security)
            }
            ["_design", ddoc, "_view", view] => {
                (K::StoredView, Target::View { ddoc: format!("{}{}", DESIGN_PREFIX, ddoc), view: view.to_string() })
            }
            ["_design", ddoc, "_show", name, doc @ ..] => {
                let doc_id = if doc.is_empty() { None } else { Some(doc.join("/")) };
                (K::Show, Target::Show { ddoc: format!("{}{}", DESIGN_PREFIX, ddoc), name: name.to_string(), doc_id })
            }
            ["_design", ddoc, "_list", name, view] => {
                let ddoc = format!("{}{}", DESIGN_PREFIX, ddoc);
                (K::List, Target::List { view_ddoc: ddoc.clone(), ddoc, name: name.to_string(), view: view.to_string() })
            }
            ["_design", ddoc, "_list", name, other, view] => (
                K::List,
                Target::List {
                    ddoc: format!("{}{}", DESIGN_PREFIX, ddoc),
                    name: name.to_string(),
                    view_ddoc: format!("{}{}", DESIGN_PREFIX, other),
                    view: view.to_string(),
                },
            ),
            ["_design", ddoc, "_update", name, doc @ ..] => {
                let doc_id = if doc.is_empty() { None } else { Some(doc.join("/")) };
                (K::UpdateFn, Target::Update { ddoc: format!("{}{}", DESIGN_PREFIX, ddoc), name: name.to_string(), doc_id })
            }
            ["_design", ddoc, "_rewrite", tail @ ..] => {
                let from = encode_path(&segments);
                let ddoc_id = format!("{}{}", DESIGN_PREFIX, ddoc);
                let tail: Vec<String> = tail.iter().map(|s| s.to_string()).collect();
                let hit = match ddocs.design_doc(&ddoc_id) {
                    Some(dd) => rewrite(&dd.rewrites, &db, ddoc, method, &tail)?,
                    None => None,
                };
                let Some(hit) = hit else {
                    debug!(target: "docgate::router", "no rewrite rule for {} {}", method, from);
                    return Ok(Route {
                        db,
                        method: method.to_string(),
                        operation: Operation::new(K::Rewrite),
                        target: Target::RewriteMiss,
                        path: from.clone(),
                        rewritten_from: Some(from),
                        query,
                    });
                };
                if depth >= self.max_rewrite_depth {
                    return Err(AppError::bad_request(format!("too many nested rewrites at {}", from)));
                }
                let mut merged = query;
                merged.extend(hit.query);
                debug!(target: "docgate::router", "rewrite {} -> {}", from, encode_path(&hit.segments));
                return self.classify_segments(method, hit.segments, merged, ddocs, depth + 1, rewritten_from.or(Some(from)));
            }
            ["_design", ddoc] => {
                (read_or(K::DesignWrite, K::ReadDoc), Target::Doc { id: format!("{}{}", DESIGN_PREFIX, ddoc) })
            }
            ["_design", ddoc, att @ ..] => {
                let target = Target::Attachment { id: format!("{}{}", DESIGN_PREFIX, ddoc), name: att.join("/") };
                let kind = if matches!(method, "PUT" | "DELETE") { K::DesignWrite } else { K::ReadDoc };
                (kind, target)
            }
            ["_local", id] => (read_or(K::WriteDoc, K::ReadDoc), Target::Doc { id: format!("_local/{}", id) }),
            [special, ..] if special.starts_with('_') => (K::DbInfo, Target::Unknown),
            [id] => (read_or(K::WriteDoc, K::ReadDoc), Target::Doc { id: id.to_string() }),
            [id, att @ ..] => {
                let kind = if matches!(method, "PUT" | "DELETE") { K::AttachmentWrite } else { K::ReadDoc };
                (kind, Target::Attachment { id: id.to_string(), name: att.join("/") })
            }
        };

        Ok(Route {
            db,
            method: method.to_string(),
            operation: Operation::new(kind),
            target,
            path: encode_path(&segments),
            rewritten_from,
            query,
        })
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod router_tests;
