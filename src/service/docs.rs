//! Document, attachment and database-level endpoints.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde_json::{json, Map, Value};

use super::views::{query_view, ViewQuery};
use super::{new_doc_id, ok_body, DocService, Request, Response};
use crate::design::Route;
use crate::error::{AppError, AppResult};
use crate::security::SecurityPolicy;
use crate::storage::Database;

impl DocService {
    pub(super) fn post_doc(&self, db: &Database, policy: &SecurityPolicy, req: &Request, _route: &Route) -> AppResult<Response> {
        let mut doc = req.json_object()?;
        if doc.get("_id").and_then(Value::as_str).is_none() {
            doc["_id"] = Value::String(new_doc_id());
        }
        let r = self.save_doc(db, policy, req, doc)?;
        Ok(Response::json(201, &ok_body(&r)).with_etag(&r.rev))
    }

    pub(super) fn doc(&self, db: &Database, policy: &SecurityPolicy, req: &Request, route: &Route, id: &str) -> AppResult<Response> {
        match route.method.as_str() {
            "GET" | "HEAD" => {
                let doc = db.get(id)?;
                let rev = doc["_rev"].as_str().unwrap_or_default().to_string();
                if let Some(wanted) = route.query.get("rev") {
                    if *wanted != rev { return Err(AppError::not_found("missing")); }
                }
                Ok(Response::json(200, &doc).with_etag(&rev))
            }
            "PUT" => {
                let mut doc = req.json_object()?;
                doc["_id"] = Value::String(id.to_string());
                if doc.get("_rev").is_none() {
                    if let Some(rev) = req.rev() { doc["_rev"] = Value::String(rev); }
                }
                let r = self.save_doc(db, policy, req, doc)?;
                Ok(Response::json(201, &ok_body(&r)).with_etag(&r.rev))
            }
            "DELETE" => {
                let rev = req.rev().ok_or_else(|| AppError::conflict("Document update conflict."))?;
                let tombstone = json!({ "_id": id, "_rev": rev, "_deleted": true });
                let r = self.save_doc(db, policy, req, tombstone)?;
                Ok(Response::json(200, &ok_body(&r)).with_etag(&r.rev))
            }
            _ => Err(AppError::method_not_allowed("Only DELETE,GET,HEAD,PUT allowed")),
        }
    }

    pub(super) fn attachment(
        &self,
        db: &Database,
        policy: &SecurityPolicy,
        req: &Request,
        route: &Route,
        id: &str,
        name: &str,
    ) -> AppResult<Response> {
        match route.method.as_str() {
            "GET" | "HEAD" => {
                let att = db.attachment(id, name)?;
                Ok(Response::bytes(200, &att.content_type, att.data).with_header("etag", &format!("\"{}\"", att.digest)))
            }
            "PUT" => {
                let mut doc = db.current(id).unwrap_or_else(|| json!({ "_id": id }));
                match req.rev() {
                    Some(rev) => doc["_rev"] = Value::String(rev),
                    None => {
                        if let Some(o) = doc.as_object_mut() { o.remove("_rev"); }
                    }
                }
                let content_type = req.header("content-type").unwrap_or("application/octet-stream").to_string();
                let entry = json!({ "content_type": content_type, "data": B64.encode(&req.body) });
                match doc.get_mut("_attachments").and_then(Value::as_object_mut) {
                    Some(atts) => { atts.insert(name.to_string(), entry); }
                    None => {
                        let mut atts = Map::new();
                        atts.insert(name.to_string(), entry);
                        doc["_attachments"] = Value::Object(atts);
                    }
                }
                let r = self.save_doc(db, policy, req, doc)?;
                Ok(Response::json(201, &ok_body(&r)).with_etag(&r.rev).with_header("x-update-newrev", &r.rev))
            }
            "DELETE" => {
                let mut doc = db.current(id).ok_or_else(|| AppError::not_found("missing"))?;
                let rev = req.rev().ok_or_else(|| AppError::conflict("Document update conflict."))?;
                doc["_rev"] = Value::String(rev);
                let removed = doc.get_mut("_attachments").and_then(Value::as_object_mut).and_then(|a| a.remove(name));
                if removed.is_none() {
                    return Err(AppError::not_found("Document is missing attachment"));
                }
                let r = self.save_doc(db, policy, req, doc)?;
                Ok(Response::json(200, &ok_body(&r)).with_etag(&r.rev).with_header("x-update-newrev", &r.rev))
            }
            _ => Err(AppError::method_not_allowed("Only DELETE,GET,HEAD,PUT allowed")),
        }
    }

    pub(super) fn all_docs(&self, db: &Database, req: &Request, route: &Route) -> AppResult<Response> {
        let body = match route.method.as_str() {
            "GET" | "HEAD" => None,
            "POST" => req.json_body()?,
            _ => return Err(AppError::method_not_allowed("Only GET,HEAD,POST allowed")),
        };
        let q = ViewQuery::from_params(&route.query, body.as_ref())?;
        let keys: Option<Vec<String>> = match q.keys {
            Some(keys) => Some(
                keys.into_iter()
                    .map(|k| k.as_str().map(str::to_string).ok_or_else(|| AppError::bad_request("_all_docs keys must be strings")))
                    .collect::<AppResult<Vec<String>>>()?,
            ),
            None => None,
        };
        Ok(Response::json(200, &db.all_docs(keys.as_deref(), q.include_docs)))
    }

    pub(super) fn changes(&self, db: &Database, route: &Route) -> AppResult<Response> {
        if !matches!(route.method.as_str(), "GET" | "HEAD" | "POST") {
            return Err(AppError::method_not_allowed("Only GET,HEAD,POST allowed"));
        }
        let since = match route.query.get("since") {
            Some(s) if s == "now" => db.changes(0, false)["last_seq"].as_u64().unwrap_or(0),
            Some(s) => s.parse::<u64>().map_err(|_| AppError::bad_request("since must be a sequence number"))?,
            None => 0,
        };
        let include_docs = route.query.get("include_docs").map(|v| v == "true").unwrap_or(false);
        Ok(Response::json(200, &db.changes(since, include_docs)))
    }

    pub(super) fn temp_view(&self, db: &Database, req: &Request, route: &Route) -> AppResult<Response> {
        if route.method != "POST" {
            return Err(AppError::method_not_allowed("Only POST allowed"));
        }
        let body = req.json_object()?;
        let map = body.get("map").and_then(Value::as_str).ok_or_else(|| AppError::bad_request("temporary view needs a map function"))?;
        let reduce = match body.get("reduce") {
            None | Some(Value::Null) => None,
            Some(Value::String(r)) if r == "_count" || r == "_sum" => Some(r.as_str()),
            Some(_) => return Err(AppError::bad_request("only _count and _sum reducers are supported")),
        };
        let rows = self.engine.map(map, &db.view_docs())?;
        let q = ViewQuery::from_params(&route.query, None)?;
        Ok(Response::json(200, &query_view(rows, reduce, &q, &|id| db.current(id))?))
    }

    pub(super) fn security(&self, db: &Database, req: &Request, route: &Route) -> AppResult<Response> {
        match route.method.as_str() {
            "GET" | "HEAD" => Ok(Response::json(200, db.policy().snapshot().raw())),
            "PUT" => {
                let body = req.json_object()?;
                db.policy().replace(&body)?;
                Ok(Response::json(200, &json!({ "ok": true })))
            }
            _ => Err(AppError::method_not_allowed("Only GET,HEAD,PUT allowed")),
        }
    }

    pub(super) fn bulk_docs(&self, db: &Database, policy: &SecurityPolicy, req: &Request, route: &Route) -> AppResult<Response> {
        if route.method != "POST" {
            return Err(AppError::method_not_allowed("Only POST allowed"));
        }
        let body = req.json_object()?;
        let docs = body.get("docs").and_then(Value::as_array).ok_or_else(|| AppError::bad_request("POST body must include `docs` parameter."))?;
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut doc = doc.clone();
            if !doc.is_object() {
                results.push(json!({ "error": "bad_request", "reason": "Document must be a JSON object" }));
                continue;
            }
            if doc.get("_id").and_then(Value::as_str).is_none() {
                doc["_id"] = Value::String(new_doc_id());
            }
            let id = doc["_id"].clone();
            match self.save_doc(db, policy, req, doc) {
                Ok(r) => results.push(json!({ "ok": true, "id": r.id, "rev": r.rev })),
                Err(e) => results.push(json!({ "id": id, "error": e.error_str(), "reason": e.reason() })),
            }
        }
        Ok(Response::json(201, &Value::Array(results)))
    }
}
