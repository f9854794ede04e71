use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

pub const DESIGN_PREFIX: &str = "_design/";

pub fn is_design_id(id: &str) -> bool { id.starts_with(DESIGN_PREFIX) }

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewDef {
    pub map: String,
    /// Builtin reducer name (`_count`, `_sum`).
    #[serde(default)]
    pub reduce: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewriteRule {
    #[serde(default)]
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub query: Map<String, Value>,
}

/// Parsed view of a `_design/*` document. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignDoc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub validate_doc_update: Option<String>,
    #[serde(default)]
    pub views: BTreeMap<String, ViewDef>,
    #[serde(default)]
    pub updates: BTreeMap<String, String>,
    #[serde(default)]
    pub shows: BTreeMap<String, String>,
    #[serde(default)]
    pub lists: BTreeMap<String, String>,
    #[serde(default)]
    pub rewrites: Vec<RewriteRule>,
}

impl DesignDoc {
    pub fn from_json(doc: &Value) -> AppResult<Self> {
        let dd: DesignDoc = serde_json::from_value(doc.clone())
            .map_err(|e| AppError::bad_request(format!("invalid design document: {}", e)))?;
        if !is_design_id(&dd.id) {
            return Err(AppError::bad_request(format!("design document id must start with {}", DESIGN_PREFIX)));
        }
        for (name, view) in dd.views.iter() {
            if let Some(r) = view.reduce.as_deref() {
                if r != "_count" && r != "_sum" {
                    return Err(AppError::bad_request(format!("view {}: unsupported reduce {}", name, r)));
                }
            }
        }
        Ok(dd)
    }

    /// Short name after `_design/`.
    pub fn name(&self) -> &str { self.id.trim_start_matches(DESIGN_PREFIX) }

    /// Every function source this document carries, for compile checks on save.
    pub fn sources(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(v) = self.validate_doc_update.as_deref() { out.push(v); }
        out.extend(self.views.values().map(|v| v.map.as_str()));
        out.extend(self.updates.values().map(String::as_str));
        out.extend(self.shows.values().map(String::as_str));
        out.extend(self.lists.values().map(String::as_str));
        out
    }
}
