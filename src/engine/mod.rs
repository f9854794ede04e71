//! Execution of design-document functions behind a capability interface.
//!
//! The gate and the validation pipeline only see `FunctionEngine` and
//! `ValidationFn`; the Lua implementation lives in `lua`.

mod convert;
mod lua;

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::Serialize;
use serde_json::Value;

use crate::error::AppResult;
use crate::validation::ValidationFn;

pub use lua::{LuaEngine, LuaLimits, LuaValidator};

/// Response produced by show, list and update functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionResponse {
    pub code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl FunctionResponse {
    pub fn text<S: Into<String>>(code: u16, body: S) -> Self {
        Self { code, headers: BTreeMap::new(), body: body.into() }
    }

    /// Accepts a bare string or `{code, headers, body | json}`. A `code`
    /// outside 100..=599 falls back to `default_code`.
    pub fn from_json(v: &Value, default_code: u16) -> Self {
        match v {
            Value::Null => Self::text(default_code, ""),
            Value::String(s) => Self::text(default_code, s.clone()),
            Value::Object(o) => {
                let code = o
                    .get("code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok())
                    .filter(|c| (100..=599).contains(c))
                    .unwrap_or(default_code);
                let mut headers: BTreeMap<String, String> = o
                    .get("headers")
                    .and_then(Value::as_object)
                    .map(|h| h.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.to_ascii_lowercase(), s.to_string()))).collect())
                    .unwrap_or_default();
                let body = if let Some(j) = o.get("json") {
                    headers.entry("content-type".into()).or_insert_with(|| "application/json".into());
                    j.to_string()
                } else {
                    match o.get("body") {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Null) | None => String::new(),
                        Some(other) => other.to_string(),
                    }
                };
                Self { code, headers, body }
            }
            other => Self::text(default_code, other.to_string()),
        }
    }
}

/// Result of an update function: the document to save (if any) and the response.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub doc: Option<Value>,
    pub response: FunctionResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewRow {
    pub id: String,
    pub key: Value,
    pub value: Value,
}

pub trait FunctionEngine: Send + Sync {
    /// Reject sources that do not compile; used when a design document is saved.
    fn compile_check(&self, source: &str) -> AppResult<()>;

    fn validator(&self, id: &str, source: &str) -> AppResult<Arc<dyn ValidationFn>>;

    fn update(&self, source: &str, doc: Option<&Value>, req: &Value) -> AppResult<UpdateResult>;

    fn show(&self, source: &str, doc: Option<&Value>, req: &Value) -> AppResult<FunctionResponse>;

    fn list(&self, source: &str, head: &Value, rows: Vec<Value>, req: &Value) -> AppResult<FunctionResponse>;

    /// Run a map function over documents; rows come back in document order.
    fn map(&self, source: &str, docs: &[Value]) -> AppResult<Vec<ViewRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_from_string_and_object() {
        assert_eq!(FunctionResponse::from_json(&json!("value is 30"), 201), FunctionResponse::text(201, "value is 30"));
        let r = FunctionResponse::from_json(&json!({"code": 200, "headers": {"Content-Type": "text/plain"}, "body": "Hello\r\n"}), 500);
        assert_eq!(r.code, 200);
        assert_eq!(r.headers.get("content-type").map(String::as_str), Some("text/plain"));
        assert_eq!(r.body, "Hello\r\n");
    }

    #[test]
    fn json_response_sets_content_type() {
        let r = FunctionResponse::from_json(&json!({"json": {"ok": true}}), 200);
        assert_eq!(r.headers.get("content-type").map(String::as_str), Some("application/json"));
        assert_eq!(serde_json::from_str::<Value>(&r.body).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn out_of_range_codes_fall_back_to_the_default() {
        for code in [json!(65736), json!(42), json!(600), json!(-1), json!("201")] {
            let r = FunctionResponse::from_json(&json!({"code": code, "body": "x"}), 200);
            assert_eq!(r.code, 200, "code {}", code);
        }
        assert_eq!(FunctionResponse::from_json(&json!({"code": 418}), 200).code, 418);
    }
}
