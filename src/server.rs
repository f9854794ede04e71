//!
//! docgate HTTP server
//! -------------------
//! Axum front end over `DocService`.
//!
//! Responsibilities:
//! - Resolve the caller identity per request: session cookie, then HTTP Basic, else anonymous.
//! - Cookie sessions under `/_session`, user management under `/_users/{name}`.
//! - Everything else is handed to `DocService`, which authorizes and executes it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::design::DesignResourceRouter;
use crate::engine::LuaEngine;
use crate::error::AppError;
use crate::identity::{AuthProvider, IdentityContext, LoginRequest, SessionManager, TokenError, UserDirectory};
use crate::security::{AuditRegistry, FileAudit, TracingAudit};
use crate::service::{parse_query, DocService, Request, Response};
use crate::storage::DocStore;

const SESSION_COOKIE: &str = "AuthSession";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DocService>,
    pub users: Arc<UserDirectory>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(service: Arc<DocService>, users: Arc<UserDirectory>, sessions: Arc<SessionManager>) -> Self {
        Self { service, users, sessions }
    }

    /// Wire store, engine, audit sinks and the bootstrap admin from config.
    pub fn from_config(cfg: &ServerConfig) -> anyhow::Result<Self> {
        let audit = AuditRegistry::new();
        audit.register(Box::new(TracingAudit));
        if let Some(path) = cfg.audit_log.as_deref() {
            audit.register(Box::new(FileAudit::new(path)));
        }
        let service = DocService::new(
            Arc::new(DocStore::new()),
            Arc::new(LuaEngine::new()),
            DesignResourceRouter::new(cfg.max_rewrite_depth, audit),
        );
        let users = UserDirectory::new();
        if let (Some(name), Some(pw)) = (cfg.admin.as_deref(), cfg.admin_password.as_deref()) {
            users.put_server_admin(name, pw).with_context(|| format!("creating server admin {}", name))?;
            info!(target: "docgate::server", "server admin '{}' configured", name);
        }
        let sessions = SessionManager::with_ttl(Duration::from_secs(cfg.session_ttl_secs));
        Ok(Self::new(Arc::new(service), Arc::new(users), Arc::new(sessions)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/_session", get(get_session).post(login).delete(logout))
        .route("/_all_dbs", get(all_dbs))
        .route("/_users/{name}", put(put_user).delete(delete_user))
        .fallback(dispatch)
        .with_state(state)
}

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {}", addr))?;
    info!(target: "docgate::server", "listening on {}", addr);
    axum::serve(listener, router(state)).await.context("http server")?;
    Ok(())
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let s = headers.get(header::COOKIE)?.to_str().ok()?;
    s.split(';').filter_map(|p| p.trim().split_once('=')).find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(raw.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (name, pw) = text.split_once(':')?;
    Some((name.to_string(), pw.to_string()))
}

/// Bad Basic credentials are an error; an unknown or expired cookie just means anonymous.
fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<IdentityContext, AppError> {
    if let Some(identity) = parse_cookie(headers, SESSION_COOKIE).and_then(|t| state.sessions.validate(&t)) {
        return Ok(identity);
    }
    if let Some((name, pw)) = basic_credentials(headers) {
        return state.users.authenticate(&name, &pw).ok_or_else(|| AppError::unauthorized("Name or password is incorrect."));
    }
    Ok(IdentityContext::anonymous())
}

fn to_http(resp: Response) -> axum::response::Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    for (k, v) in resp.headers.iter() {
        match (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
            (Ok(name), Ok(value)) => { headers.insert(name, value); }
            _ => debug!(target: "docgate::server", "dropping unrepresentable header {}", k),
        }
    }
    (status, headers, resp.body).into_response()
}

fn error_http(e: &AppError) -> axum::response::Response { to_http(Response::error(e)) }

async fn welcome() -> impl IntoResponse {
    Json(json!({ "docgate": "Welcome", "version": env!("CARGO_PKG_VERSION") }))
}

async fn dispatch(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> axum::response::Response {
    let identity = match resolve_identity(&state, &headers) {
        Ok(i) => i,
        Err(e) => return error_http(&e),
    };
    let mut req = Request::new(method.as_str(), uri.path(), identity);
    req.query = uri.query().map(parse_query).unwrap_or_default();
    for (k, v) in headers.iter() {
        if let Ok(v) = v.to_str() { req.headers.insert(k.as_str().to_ascii_lowercase(), v.to_string()); }
    }
    req.body = body.to_vec();
    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || service.handle(&req)).await {
        Ok(resp) => to_http(resp),
        Err(e) => {
            error!(target: "docgate::server", "request task failed: {}", e);
            error_http(&AppError::internal("request handler panicked"))
        }
    }
}

async fn all_dbs(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!(state.service.store().names()))
}

async fn get_session(State(state): State<AppState>, headers: HeaderMap) -> axum::response::Response {
    match resolve_identity(&state, &headers) {
        Ok(identity) => Json(json!({ "ok": true, "userCtx": { "name": identity.name, "roles": identity.roles } })).into_response(),
        Err(e) => error_http(&e),
    }
}

/// Credentials as JSON or as an urlencoded form.
fn login_request(headers: &HeaderMap, body: &[u8]) -> Option<LoginRequest> {
    let is_json = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(|v| v.starts_with("application/json")).unwrap_or(false);
    let (name, password) = if is_json {
        let v: Value = serde_json::from_slice(body).ok()?;
        (v.get("name")?.as_str()?.to_string(), v.get("password")?.as_str()?.to_string())
    } else {
        let form = parse_query(std::str::from_utf8(body).ok()?);
        (form.get("name")?.clone(), form.get("password")?.clone())
    };
    Some(LoginRequest { name, password })
}

async fn login(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> axum::response::Response {
    let Some(req) = login_request(&headers, &body) else {
        return error_http(&AppError::bad_request("name and password are required"));
    };
    match state.users.login(&state.sessions, &req) {
        Ok(resp) => {
            let mut h = HeaderMap::new();
            if let Ok(v) = HeaderValue::from_str(&format!("{}={}; HttpOnly; SameSite=Lax; Path=/", SESSION_COOKIE, resp.session.token)) {
                h.insert(header::SET_COOKIE, v);
            }
            let body = json!({ "ok": true, "name": resp.session.identity.name, "roles": resp.session.identity.roles });
            (StatusCode::OK, h, Json(body)).into_response()
        }
        Err(e) if e.downcast_ref::<TokenError>().is_some() => {
            error!(target: "docgate::server", "login for {} could not open a session: {}", req.name, e);
            error_http(&AppError::internal("could not create a session"))
        }
        Err(e) => {
            debug!(target: "docgate::server", "login failed for {}: {}", req.name, e);
            error_http(&AppError::unauthorized("Name or password is incorrect."))
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = parse_cookie(&headers, SESSION_COOKIE) {
        state.sessions.logout(&token);
    }
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, HeaderValue::from_static("AuthSession=; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Path=/"));
    (StatusCode::OK, h, Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    password: String,
    #[serde(default)]
    roles: Vec<String>,
}

fn require_server_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let identity = resolve_identity(state, headers)?;
    if identity.is_server_admin() {
        Ok(())
    } else {
        Err(AppError::unauthorized("You are not a server admin."))
    }
}

async fn put_user(State(state): State<AppState>, Path(name): Path<String>, headers: HeaderMap, body: Bytes) -> axum::response::Response {
    if let Err(e) = require_server_admin(&state, &headers) {
        return error_http(&e);
    }
    let payload: UserPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return error_http(&AppError::from(e)),
    };
    if let Err(e) = state.users.put_user(&name, &payload.password, payload.roles) {
        return error_http(&AppError::bad_request(e.to_string()));
    }
    state.sessions.revoke_user(&name);
    info!(target: "docgate::server", "user '{}' saved", name);
    (StatusCode::CREATED, Json(json!({ "ok": true, "id": name }))).into_response()
}

async fn delete_user(State(state): State<AppState>, Path(name): Path<String>, headers: HeaderMap) -> axum::response::Response {
    if let Err(e) = require_server_admin(&state, &headers) {
        return error_http(&e);
    }
    if !state.users.delete_user(&name) {
        return error_http(&AppError::not_found("missing"));
    }
    state.sessions.revoke_user(&name);
    Json(json!({ "ok": true, "id": name })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_and_basic_parsing() {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_static("theme=dark; AuthSession=abc123"));
        assert_eq!(parse_cookie(&h, SESSION_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(parse_cookie(&h, "missing"), None);
        // "joe:erly" in base64
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic am9lOmVybHk="));
        assert_eq!(basic_credentials(&h), Some(("joe".to_string(), "erly".to_string())));
    }

    #[test]
    fn identity_resolution_order() {
        let state = AppState::from_config(&ServerConfig::default()).unwrap();
        state.users.put_user("joe", "erly", vec!["super-secret-club".into()]).unwrap();
        assert!(resolve_identity(&state, &HeaderMap::new()).unwrap().is_anonymous());

        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic am9lOmVybHk="));
        assert_eq!(resolve_identity(&state, &h).unwrap().name.as_deref(), Some("joe"));

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic am9lOndyb25n"));
        assert!(matches!(resolve_identity(&state, &h), Err(AppError::Unauthorized { .. })));

        let session = state.sessions.issue(IdentityContext::named("a_member", &[])).unwrap();
        let cookie = format!("AuthSession={}", session.token);
        h.insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        assert_eq!(resolve_identity(&state, &h).unwrap().name.as_deref(), Some("a_member"));
    }

    #[test]
    fn form_and_json_logins() {
        let mut h = HeaderMap::new();
        let req = login_request(&h, b"name=jchris%40apache.org&password=funnybone").unwrap();
        assert_eq!(req.name, "jchris@apache.org");
        h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let req = login_request(&h, br#"{"name":"joe","password":"erly"}"#).unwrap();
        assert_eq!(req.password, "erly");
        assert!(login_request(&h, b"{}").is_none());
    }
}
