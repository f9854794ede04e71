//! Transport-agnostic request handling.
//!
//! `DocService::handle` resolves the effective method, classifies and
//! authorizes through the router, executes the operation and maps errors to
//! wire responses. Every path that changes a document funnels through
//! `save_doc`, which runs the validation pipeline before committing.

mod docs;
mod functions;
mod request;
pub mod views;

use std::sync::Arc;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::config::DEFAULT_MAX_REWRITE_DEPTH;
use crate::design::{effective_method, is_design_id, path_segments, DesignDoc, DesignDocs, DesignResourceRouter, NoDesignDocs, Route, Target};
use crate::engine::{FunctionEngine, LuaEngine};
use crate::error::{AppError, AppResult};
use crate::security::{authorize, AuditRegistry, AuthEvent, Operation, OperationKind, SecurityPolicy, ValidationEvent};
use crate::storage::{Database, DocResult, DocStore};
use crate::validation::{ValidationOutcome, ValidationPipeline};

pub use request::{parse_query, Request, Response};

pub struct DocService {
    store: Arc<DocStore>,
    engine: Arc<dyn FunctionEngine>,
    router: DesignResourceRouter,
}

impl DocService {
    pub fn new(store: Arc<DocStore>, engine: Arc<dyn FunctionEngine>, router: DesignResourceRouter) -> Self {
        Self { store, engine, router }
    }

    /// Empty store, Lua functions, no audit hooks.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(DocStore::new()),
            Arc::new(LuaEngine::new()),
            DesignResourceRouter::new(DEFAULT_MAX_REWRITE_DEPTH, AuditRegistry::new()),
        )
    }

    pub fn store(&self) -> &Arc<DocStore> { &self.store }

    pub fn audit(&self) -> &AuditRegistry { self.router.audit() }

    pub fn handle(&self, req: &Request) -> Response {
        match self.dispatch(req) {
            Ok(resp) => resp,
            Err(e) => {
                match &e {
                    AppError::Internal { reason } => error!(target: "docgate::service", "{} {} failed: {}", req.method, req.path, reason),
                    other => debug!(target: "docgate::service", "{} {} -> {} {}", req.method, req.path, other.http_status(), other.reason()),
                }
                Response::error(&e)
            }
        }
    }

    fn dispatch(&self, req: &Request) -> AppResult<Response> {
        let method = effective_method(&req.method, req.header("x-http-method-override"));
        let segments = path_segments(&req.path)?;
        let db_name = segments.first().ok_or_else(|| AppError::bad_request("missing database name"))?;
        let db = self.store.get(db_name).ok();
        let policy = match db.as_ref() {
            Some(d) => d.policy().snapshot(),
            None => Arc::new(SecurityPolicy::open()),
        };
        let ddocs: &dyn DesignDocs = match db.as_deref() {
            Some(d) => d,
            None => &NoDesignDocs,
        };
        let route = self.router.resolve(&method, &req.path, &req.query, ddocs, &policy, &req.ctx)?;

        if route.target == Target::Database {
            return self.database(&route);
        }
        let db = db.ok_or_else(|| AppError::not_found("Database does not exist."))?;
        match &route.target {
            Target::CreateDoc => self.post_doc(&db, &policy, req, &route),
            Target::Doc { id } => self.doc(&db, &policy, req, &route, id),
            Target::Attachment { id, name } => self.attachment(&db, &policy, req, &route, id, name),
            Target::AllDocs => self.all_docs(&db, req, &route),
            Target::Changes => self.changes(&db, &route),
            Target::TempView => self.temp_view(&db, req, &route),
            Target::Security => self.security(&db, req, &route),
            Target::BulkDocs => self.bulk_docs(&db, &policy, req, &route),
            Target::View { ddoc, view } => self.view(&db, req, &route, ddoc, view),
            Target::Show { ddoc, name, doc_id } => self.show(&db, &policy, req, &route, ddoc, name, doc_id.as_deref()),
            Target::List { ddoc, name, view_ddoc, view } => self.list(&db, &policy, req, &route, ddoc, name, view_ddoc, view),
            Target::Update { ddoc, name, doc_id } => self.update(&db, &policy, req, &route, ddoc, name, doc_id.as_deref()),
            Target::RewriteMiss => Err(AppError::not_found("no rewrite rule matches this path")),
            Target::Unknown | Target::Database => Err(AppError::not_found("missing")),
        }
    }

    fn database(&self, route: &Route) -> AppResult<Response> {
        match route.method.as_str() {
            "GET" | "HEAD" => Ok(Response::json(200, &self.store.get(&route.db)?.info())),
            "PUT" => {
                self.store.create(&route.db)?;
                Ok(Response::json(201, &json!({ "ok": true })))
            }
            "DELETE" => {
                self.store.delete(&route.db)?;
                Ok(Response::json(200, &json!({ "ok": true })))
            }
            _ => Err(AppError::method_not_allowed("Only DELETE,GET,HEAD,POST,PUT allowed")),
        }
    }

    /// Authorize a secondary operation discovered while executing a request.
    fn require(&self, db: &Database, policy: &SecurityPolicy, req: &Request, kind: OperationKind) -> AppResult<()> {
        let decision = authorize(req.identity(), policy, &Operation::new(kind));
        self.audit().emit_authorize(&AuthEvent {
            database: db.name().to_string(),
            identity: req.identity().clone(),
            operation: kind,
            method: req.method.clone(),
            path: req.path.clone(),
            decision: decision.clone(),
            request_id: req.ctx.request_id.clone(),
        });
        decision.into_result()
    }

    fn pipeline(&self, db: &Database) -> AppResult<ValidationPipeline> {
        let mut pipeline = ValidationPipeline::new();
        for dd in db.design_docs() {
            if let Some(src) = dd.validate_doc_update.as_deref() {
                pipeline.push(self.engine.validator(&dd.id, src)?);
            }
        }
        Ok(pipeline)
    }

    fn validate(&self, db: &Database, policy: &SecurityPolicy, req: &Request, id: &str, old: Option<&Value>, new: &Value) -> AppResult<()> {
        let pipeline = self.pipeline(db)?;
        if pipeline.is_empty() {
            return Ok(());
        }
        let outcome = pipeline.validate(db.name(), policy, req.identity(), old, new)?;
        self.audit().emit_validate(&ValidationEvent {
            database: db.name().to_string(),
            doc_id: id.to_string(),
            identity: req.identity().clone(),
            rejection: match &outcome {
                ValidationOutcome::Rejected { reason } => Some(reason.clone()),
                ValidationOutcome::Accepted => None,
            },
            request_id: req.ctx.request_id.clone(),
        });
        outcome.into_result()
    }

    /// The single commit path for document writes.
    ///
    /// Design documents need admin rights however they arrive and are compiled
    /// instead of validated; everything else runs the full pipeline.
    fn save_doc(&self, db: &Database, policy: &SecurityPolicy, req: &Request, doc: Value) -> AppResult<DocResult> {
        let id = doc.get("_id").and_then(Value::as_str).ok_or_else(|| AppError::bad_request("Document id must be a string"))?.to_string();
        if is_design_id(&id) {
            self.require(db, policy, req, OperationKind::DesignWrite)?;
            if doc.get("_deleted") != Some(&Value::Bool(true)) {
                let dd = DesignDoc::from_json(&doc)?;
                for src in dd.sources() { self.engine.compile_check(src)?; }
            }
            return db.save(doc);
        }
        let old = db.current(&id);
        self.validate(db, policy, req, &id, old.as_ref(), &doc)?;
        db.save(doc)
    }
}

fn new_doc_id() -> String { uuid::Uuid::new_v4().simple().to_string() }

fn ok_body(r: &DocResult) -> Value { json!({ "ok": true, "id": r.id, "rev": r.rev }) }
