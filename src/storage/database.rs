//! One named database: documents, revisions, attachments, changes and its
//! security policy. Writes are optimistic: `save` commits only when the
//! caller's `_rev` still names the current revision.

use std::collections::BTreeMap;
use std::sync::Arc;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::revision::{digest, next_rev};
use crate::design::{is_design_id, DesignDoc, DesignDocs};
use crate::error::{AppError, AppResult};
use crate::security::PolicyCell;

const LOCAL_PREFIX: &str = "_local/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub content_type: String,
    pub data: Vec<u8>,
    pub digest: String,
    pub revpos: u64,
}

impl Attachment {
    fn stub(&self) -> Value {
        json!({
            "content_type": self.content_type,
            "revpos": self.revpos,
            "digest": self.digest,
            "length": self.data.len(),
            "stub": true
        })
    }
}

#[derive(Debug, Clone)]
struct DocEntry {
    rev: String,
    body: Map<String, Value>,
    attachments: BTreeMap<String, Attachment>,
    deleted: bool,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocResult {
    pub id: String,
    pub rev: String,
}

#[derive(Default)]
struct DbState {
    docs: BTreeMap<String, DocEntry>,
    update_seq: u64,
    ddocs: BTreeMap<String, Arc<DesignDoc>>,
}

pub struct Database {
    name: String,
    policy: PolicyCell,
    state: RwLock<DbState>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish_non_exhaustive()
    }
}

fn is_local(id: &str) -> bool { id.starts_with(LOCAL_PREFIX) }

fn check_id(id: &str) -> AppResult<()> {
    if id.is_empty() {
        return Err(AppError::bad_request("Document id must not be empty"));
    }
    if id.starts_with('_') && !is_design_id(id) && !is_local(id) {
        return Err(AppError::bad_request("Only reserved document ids may start with underscore."));
    }
    Ok(())
}

fn render(id: &str, e: &DocEntry) -> Value {
    let mut out = Map::new();
    out.insert("_id".into(), Value::String(id.to_string()));
    out.insert("_rev".into(), Value::String(e.rev.clone()));
    if e.deleted { out.insert("_deleted".into(), Value::Bool(true)); }
    for (k, v) in e.body.iter() { out.insert(k.clone(), v.clone()); }
    if !e.attachments.is_empty() {
        let atts: Map<String, Value> = e.attachments.iter().map(|(n, a)| (n.clone(), a.stub())).collect();
        out.insert("_attachments".into(), Value::Object(atts));
    }
    Value::Object(out)
}

impl Database {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into(), policy: PolicyCell::new(), state: RwLock::new(DbState::default()) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn policy(&self) -> &PolicyCell { &self.policy }

    pub fn info(&self) -> Value {
        let st = self.state.read();
        let (live, deleted) = st.docs.iter().filter(|(id, _)| !is_local(id)).fold((0u64, 0u64), |(l, d), (_, e)| {
            if e.deleted { (l, d + 1) } else { (l + 1, d) }
        });
        json!({ "db_name": self.name, "doc_count": live, "doc_del_count": deleted, "update_seq": st.update_seq })
    }

    /// Current document with attachment stubs.
    pub fn get(&self, id: &str) -> AppResult<Value> {
        let st = self.state.read();
        match st.docs.get(id) {
            None => Err(AppError::not_found("missing")),
            Some(e) if e.deleted => Err(AppError::not_found("deleted")),
            Some(e) => Ok(render(id, e)),
        }
    }

    /// Current document, `None` when missing or deleted.
    pub fn current(&self, id: &str) -> Option<Value> { self.get(id).ok() }

    pub fn rev_of(&self, id: &str) -> Option<String> {
        self.state.read().docs.get(id).filter(|e| !e.deleted).map(|e| e.rev.clone())
    }

    pub fn attachment(&self, id: &str, name: &str) -> AppResult<Attachment> {
        let st = self.state.read();
        let e = st.docs.get(id).filter(|e| !e.deleted).ok_or_else(|| AppError::not_found("missing"))?;
        e.attachments.get(name).cloned().ok_or_else(|| AppError::not_found("Document is missing attachment"))
    }

    /// Commit a document. `_rev` must match the current revision when the
    /// document exists; `_attachments` entries carry inline `data` or `stub: true`.
    pub fn save(&self, doc: Value) -> AppResult<DocResult> {
        let Value::Object(mut obj) = doc else {
            return Err(AppError::bad_request("Document must be a JSON object"));
        };
        let id = match obj.get("_id") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(AppError::bad_request("Document id must be a string")),
        };
        check_id(&id)?;
        let given_rev = match obj.remove("_rev") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => return Err(AppError::bad_request("_rev must be a string")),
        };
        let deleted = obj.remove("_deleted").map(|v| v == Value::Bool(true)).unwrap_or(false);
        let attachments_in = obj.remove("_attachments");
        obj.remove("_id");
        let parsed = if is_design_id(&id) && !deleted {
            let mut full = obj.clone();
            full.insert("_id".into(), Value::String(id.clone()));
            Some(Arc::new(DesignDoc::from_json(&Value::Object(full))?))
        } else {
            None
        };
        let body: Map<String, Value> = obj.into_iter().filter(|(k, _)| !k.starts_with('_')).collect();

        let mut st = self.state.write();
        let existing = st.docs.get(&id);
        match existing {
            Some(e) if !e.deleted => {
                if given_rev.as_deref() != Some(e.rev.as_str()) {
                    return Err(AppError::conflict("Document update conflict."));
                }
            }
            Some(e) => {
                if given_rev.as_deref().map(|r| r != e.rev).unwrap_or(false) {
                    return Err(AppError::conflict("Document update conflict."));
                }
                if deleted { return Err(AppError::not_found("deleted")); }
            }
            None => {
                if given_rev.is_some() { return Err(AppError::conflict("Document update conflict.")); }
                if deleted { return Err(AppError::not_found("missing")); }
            }
        }
        let prev_rev = existing.map(|e| e.rev.clone());
        let old_atts = existing.map(|e| e.attachments.clone()).unwrap_or_default();
        let pos = prev_rev.as_deref().and_then(|r| super::revision::parse_rev(r).ok()).map(|(p, _)| p).unwrap_or(0) + 1;

        let mut attachments = BTreeMap::new();
        if !deleted {
            match attachments_in {
                None | Some(Value::Null) => {}
                Some(Value::Object(m)) => {
                    for (name, meta) in m {
                        let att = if meta.get("stub").and_then(Value::as_bool).unwrap_or(false) {
                            old_atts.get(&name).cloned().ok_or_else(|| AppError::bad_request(format!("missing stub for attachment {}", name)))?
                        } else {
                            let data = meta.get("data").and_then(Value::as_str)
                                .ok_or_else(|| AppError::bad_request(format!("attachment {} needs data or stub", name)))?;
                            let bytes = B64.decode(data).map_err(|_| AppError::bad_request(format!("attachment {}: invalid base64", name)))?;
                            let content_type = meta.get("content_type").and_then(Value::as_str).unwrap_or("application/octet-stream").to_string();
                            Attachment { content_type, digest: digest(&bytes), data: bytes, revpos: pos }
                        };
                        attachments.insert(name, att);
                    }
                }
                Some(_) => return Err(AppError::bad_request("_attachments must be an object")),
            }
        }

        let mut content = serde_json::to_vec(&body).unwrap_or_default();
        if deleted { content.extend_from_slice(b"\0deleted"); }
        for (n, a) in attachments.iter() {
            content.extend_from_slice(n.as_bytes());
            content.extend_from_slice(a.digest.as_bytes());
        }
        let rev = next_rev(prev_rev.as_deref(), &content);
        st.update_seq += 1;
        let seq = st.update_seq;
        st.docs.insert(id.clone(), DocEntry { rev: rev.clone(), body, attachments, deleted, seq });
        if is_design_id(&id) {
            match parsed {
                Some(dd) => { st.ddocs.insert(id.clone(), dd); }
                None => { st.ddocs.remove(&id); }
            }
        }
        debug!(target: "docgate::storage", "{}: saved {} at {} (seq {})", self.name, id, rev, seq);
        Ok(DocResult { id, rev })
    }

    /// Rows of `_all_docs`; deleted and local documents are omitted unless asked for by key.
    pub fn all_docs(&self, keys: Option<&[String]>, include_docs: bool) -> Value {
        let st = self.state.read();
        let row = |id: &str, e: &DocEntry| {
            let mut r = json!({ "id": id, "key": id, "value": { "rev": e.rev } });
            if e.deleted {
                r["value"]["deleted"] = Value::Bool(true);
                if include_docs { r["doc"] = Value::Null; }
            } else if include_docs {
                r["doc"] = render(id, e);
            }
            r
        };
        let rows: Vec<Value> = match keys {
            Some(keys) => keys.iter().map(|k| match st.docs.get(k) {
                Some(e) => row(k, e),
                None => json!({ "key": k, "error": "not_found" }),
            }).collect(),
            None => st.docs.iter().filter(|(id, e)| !e.deleted && !is_local(id)).map(|(id, e)| row(id, e)).collect(),
        };
        let total = st.docs.iter().filter(|(id, e)| !e.deleted && !is_local(id)).count();
        json!({ "total_rows": total, "offset": 0, "rows": rows })
    }

    pub fn changes(&self, since: u64, include_docs: bool) -> Value {
        let st = self.state.read();
        let mut entries: Vec<(&String, &DocEntry)> = st.docs.iter().filter(|(id, e)| e.seq > since && !is_local(id)).collect();
        entries.sort_by_key(|(_, e)| e.seq);
        let results: Vec<Value> = entries.iter().map(|(id, e)| {
            let mut r = json!({ "seq": e.seq, "id": id, "changes": [{ "rev": e.rev }] });
            if e.deleted { r["deleted"] = Value::Bool(true); }
            if include_docs { r["doc"] = render(id, e); }
            r
        }).collect();
        json!({ "results": results, "last_seq": st.update_seq })
    }

    /// Live, non-design documents in id order; the input to view maps.
    pub fn view_docs(&self) -> Vec<Value> {
        let st = self.state.read();
        st.docs.iter()
            .filter(|(id, e)| !e.deleted && !is_design_id(id) && !is_local(id))
            .map(|(id, e)| render(id, e))
            .collect()
    }

    /// Design documents in id order.
    pub fn design_docs(&self) -> Vec<Arc<DesignDoc>> { self.state.read().ddocs.values().cloned().collect() }
}

impl DesignDocs for Database {
    fn design_doc(&self, id: &str) -> Option<Arc<DesignDoc>> { self.state.read().ddocs.get(id).cloned() }
}

#[cfg(test)]
#[path = "database_tests.rs"]
mod database_tests;
