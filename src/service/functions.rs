//! Views and design-document functions: stored and temporary views, show,
//! list and update handlers.

use std::sync::Arc;
use serde_json::{json, Value};

use super::views::{query_view, ViewQuery};
use super::{new_doc_id, DocService, Request, Response};
use crate::design::{path_segments, DesignDoc, DesignDocs, Route};
use crate::engine::FunctionResponse;
use crate::error::{AppError, AppResult};
use crate::security::SecurityPolicy;
use crate::storage::Database;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

fn design_doc(db: &Database, id: &str) -> AppResult<Arc<DesignDoc>> {
    db.design_doc(id).ok_or_else(|| AppError::not_found("missing"))
}

fn function<'a>(fns: &'a std::collections::BTreeMap<String, String>, kind: &str, name: &str) -> AppResult<&'a str> {
    fns.get(name).map(String::as_str).ok_or_else(|| AppError::not_found(format!("missing {} function {}", kind, name)))
}

/// The request object passed to show, list and update functions.
fn function_request(db: &Database, policy: &SecurityPolicy, req: &Request, route: &Route, id: Option<&str>) -> AppResult<Value> {
    let mut fr = json!({
        "method": route.method,
        "path": path_segments(&route.path)?,
        "query": route.query,
        "headers": req.headers,
        "body": String::from_utf8_lossy(&req.body),
        "userCtx": req.identity().to_function_json(db.name()),
        "secObj": policy.raw(),
        "info": db.info(),
        "uuid": new_doc_id(),
    });
    // left out when absent so `req.id or req.uuid` works in Lua
    if let Some(id) = id {
        fr["id"] = Value::String(id.to_string());
    }
    Ok(fr)
}

fn into_response(fr: FunctionResponse) -> Response {
    let mut resp = Response::bytes(fr.code, TEXT_PLAIN, fr.body.into_bytes());
    for (k, v) in fr.headers.iter() {
        resp = resp.with_header(k, v);
    }
    resp
}

/// `true` for POST, which may carry view options in the body.
fn get_or_post(route: &Route) -> AppResult<bool> {
    match route.method.as_str() {
        "GET" | "HEAD" => Ok(false),
        "POST" => Ok(true),
        _ => Err(AppError::method_not_allowed("Only GET,HEAD,POST allowed")),
    }
}

impl DocService {
    fn view_rows(&self, db: &Database, view_ddoc: &str, view: &str, req: &Request, route: &Route) -> AppResult<Value> {
        let dd = design_doc(db, view_ddoc)?;
        let def = dd.views.get(view).ok_or_else(|| AppError::not_found(format!("missing view {}", view)))?;
        let body = if get_or_post(route)? { req.json_body()? } else { None };
        let q = ViewQuery::from_params(&route.query, body.as_ref())?;
        let rows = self.engine.map(&def.map, &db.view_docs())?;
        query_view(rows, def.reduce.as_deref(), &q, &|id| db.current(id))
    }

    pub(super) fn view(&self, db: &Database, req: &Request, route: &Route, ddoc: &str, view: &str) -> AppResult<Response> {
        Ok(Response::json(200, &self.view_rows(db, ddoc, view, req, route)?))
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn show(
        &self,
        db: &Database,
        policy: &SecurityPolicy,
        req: &Request,
        route: &Route,
        ddoc: &str,
        name: &str,
        doc_id: Option<&str>,
    ) -> AppResult<Response> {
        get_or_post(route)?;
        let dd = design_doc(db, ddoc)?;
        let src = function(&dd.shows, "show", name)?;
        let doc = doc_id.and_then(|id| db.current(id));
        let fr = self.engine.show(src, doc.as_ref(), &function_request(db, policy, req, route, doc_id)?)?;
        Ok(into_response(fr))
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn list(
        &self,
        db: &Database,
        policy: &SecurityPolicy,
        req: &Request,
        route: &Route,
        ddoc: &str,
        name: &str,
        view_ddoc: &str,
        view: &str,
    ) -> AppResult<Response> {
        let dd = design_doc(db, ddoc)?;
        let src = function(&dd.lists, "list", name)?.to_string();
        let result = self.view_rows(db, view_ddoc, view, req, route)?;
        let head = json!({ "total_rows": result["total_rows"], "offset": result["offset"] });
        let rows = match result.get("rows") {
            Some(Value::Array(rows)) => rows.clone(),
            _ => Vec::new(),
        };
        let fr = self.engine.list(&src, &head, rows, &function_request(db, policy, req, route, None)?)?;
        Ok(into_response(fr))
    }

    /// Run an update handler and commit whatever document it returns.
    ///
    /// The new document goes through `save_doc`, so validators see it exactly
    /// as they would a direct PUT.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn update(
        &self,
        db: &Database,
        policy: &SecurityPolicy,
        req: &Request,
        route: &Route,
        ddoc: &str,
        name: &str,
        doc_id: Option<&str>,
    ) -> AppResult<Response> {
        if !matches!(route.method.as_str(), "PUT" | "POST") {
            return Err(AppError::method_not_allowed("Only PUT,POST allowed"));
        }
        let dd = design_doc(db, ddoc)?;
        let src = function(&dd.updates, "update", name)?;
        let old = doc_id.and_then(|id| db.current(id));
        let out = self.engine.update(src, old.as_ref(), &function_request(db, policy, req, route, doc_id)?)?;
        let mut resp = into_response(out.response);
        if let Some(mut doc) = out.doc {
            if !doc.is_object() {
                return Err(AppError::internal("update function returned a non-object document"));
            }
            if doc.get("_id").and_then(Value::as_str).is_none() {
                doc["_id"] = Value::String(doc_id.map(str::to_string).unwrap_or_else(new_doc_id));
            }
            let saved = self.save_doc(db, policy, req, doc)?;
            resp = resp.with_header("x-update-newrev", &saved.rev);
        }
        Ok(resp)
    }
}
