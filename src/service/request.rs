use std::collections::BTreeMap;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::identity::{IdentityContext, RequestContext};

/// Transport-neutral request. Header names are stored lowercase.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub ctx: RequestContext,
}

/// Decode `a=1&b=two` into a map; later keys win.
pub fn parse_query(qs: &str) -> BTreeMap<String, String> {
    qs.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let dec = |s: &str| {
                let s = s.replace('+', " ");
                urlencoding::decode(&s).map(|c| c.into_owned()).unwrap_or_else(|_| s.clone())
            };
            (dec(k), dec(v))
        })
        .collect()
}

impl Request {
    /// `target` may carry a query string: `/db/doc?rev=1-abc`.
    pub fn new(method: &str, target: &str, identity: IdentityContext) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), parse_query(q)),
            None => (target.to_string(), BTreeMap::new()),
        };
        Self { method: method.to_string(), path, query, headers: BTreeMap::new(), body: Vec::new(), ctx: RequestContext::new(identity) }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = body.to_string().into_bytes();
        self.with_header("content-type", "application/json")
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        self.body = body.into();
        self.with_header("content-type", content_type)
    }

    pub fn identity(&self) -> &IdentityContext { &self.ctx.identity }

    pub fn header(&self, name: &str) -> Option<&str> { self.headers.get(&name.to_ascii_lowercase()).map(String::as_str) }

    pub fn query_param(&self, name: &str) -> Option<&str> { self.query.get(name).map(String::as_str) }

    pub fn query_flag(&self, name: &str) -> bool { self.query_param(name) == Some("true") }

    /// Body as JSON; an empty body is `None`.
    pub fn json_body(&self) -> AppResult<Option<Value>> {
        if self.body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.body)?))
    }

    pub fn json_object(&self) -> AppResult<Value> {
        match self.json_body()? {
            Some(v @ Value::Object(_)) => Ok(v),
            Some(_) => Err(AppError::bad_request("Document must be a JSON object")),
            None => Err(AppError::bad_request("Request body must be a JSON object")),
        }
    }

    /// Revision named by `?rev=` or an `If-Match` header.
    pub fn rev(&self) -> Option<String> {
        self.query_param("rev")
            .map(str::to_string)
            .or_else(|| self.header("if-match").map(|v| v.trim_matches('"').to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, body: &Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self { status, headers, body: body.to_string().into_bytes() }
    }

    pub fn bytes(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self { status, headers, body }
    }

    pub fn error(err: &AppError) -> Self { Self::json(err.http_status(), &err.to_body()) }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Quoted revision as the entity tag.
    pub fn with_etag(self, rev: &str) -> Self { self.with_header("etag", &format!("\"{}\"", rev)) }

    pub fn header(&self, name: &str) -> Option<&str> { self.headers.get(&name.to_ascii_lowercase()).map(String::as_str) }

    pub fn text(&self) -> String { String::from_utf8_lossy(&self.body).into_owned() }

    pub fn json_value(&self) -> Option<Value> { serde_json::from_slice(&self.body).ok() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_query_is_split_and_decoded() {
        let r = Request::new("PUT", "/inbox/_design/inbox/_update/inc/doc%201?n=23&msg=a+b%21", IdentityContext::anonymous());
        assert_eq!(r.path, "/inbox/_design/inbox/_update/inc/doc%201");
        assert_eq!(r.query_param("n"), Some("23"));
        assert_eq!(r.query_param("msg"), Some("a b!"));
    }

    #[test]
    fn rev_comes_from_query_or_if_match() {
        let r = Request::new("DELETE", "/db/doc?rev=2-abc", IdentityContext::anonymous());
        assert_eq!(r.rev().as_deref(), Some("2-abc"));
        let r = Request::new("DELETE", "/db/doc", IdentityContext::anonymous()).with_header("If-Match", "\"3-def\"");
        assert_eq!(r.rev().as_deref(), Some("3-def"));
    }

    #[test]
    fn empty_body_is_none() {
        let r = Request::new("POST", "/db/_changes", IdentityContext::anonymous());
        assert_eq!(r.json_body().unwrap(), None);
        let r = r.with_json(&json!({"keys": ["a"]}));
        assert_eq!(r.json_body().unwrap(), Some(json!({"keys": ["a"]})));
        assert_eq!(r.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn error_responses_use_the_wire_body() {
        let resp = Response::error(&AppError::unauthorized("You are not authorized to access this db."));
        assert_eq!(resp.status, 401);
        assert_eq!(resp.json_value().unwrap()["error"], "unauthorized");
    }
}
