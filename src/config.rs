//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file named by
//! `DOCGATE_CONFIG`, then individual `DOCGATE_*` environment variables.

use std::path::Path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HTTP_PORT: u16 = 5984;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 600;
/// Upper bound on nested `_rewrite` hops for a single request.
pub const DEFAULT_MAX_REWRITE_DEPTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    /// Bootstrap server admin; skipped when either part is missing.
    pub admin: Option<String>,
    pub admin_password: Option<String>,
    pub session_ttl_secs: u64,
    /// JSON-lines audit sink, in addition to the tracing audit.
    pub audit_log: Option<String>,
    pub max_rewrite_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            admin: None,
            admin_password: None,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            audit_log: None,
            max_rewrite_depth: DEFAULT_MAX_REWRITE_DEPTH,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| anyhow::anyhow!("invalid {}='{}': {}", name, raw, e))
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|k| std::env::var(k).ok())
    }

    /// Load using `var` as the environment lookup.
    pub fn load_with<F: Fn(&str) -> Option<String>>(var: F) -> Result<Self> {
        let mut cfg = match var("DOCGATE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_env(var)?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, var: F) -> Result<()> {
        if let Some(v) = var("DOCGATE_BIND") { self.bind = v; }
        if let Some(v) = var("DOCGATE_HTTP_PORT") { self.http_port = parse_var("DOCGATE_HTTP_PORT", &v)?; }
        if let Some(v) = var("DOCGATE_ADMIN") { self.admin = Some(v); }
        if let Some(v) = var("DOCGATE_ADMIN_PASSWORD") { self.admin_password = Some(v); }
        if let Some(v) = var("DOCGATE_SESSION_TTL_SECS") { self.session_ttl_secs = parse_var("DOCGATE_SESSION_TTL_SECS", &v)?; }
        if let Some(v) = var("DOCGATE_AUDIT_LOG") { self.audit_log = Some(v); }
        if let Some(v) = var("DOCGATE_MAX_REWRITE_DEPTH") { self.max_rewrite_depth = parse_var("DOCGATE_MAX_REWRITE_DEPTH", &v)?; }
        Ok(())
    }

    pub fn addr(&self) -> String { format!("{}:{}", self.bind, self.http_port) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = ServerConfig::load_with(|_| None).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.addr(), "127.0.0.1:5984");
        assert_eq!(cfg.max_rewrite_depth, DEFAULT_MAX_REWRITE_DEPTH);
    }

    #[test]
    fn environment_overrides_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"http_port": 6000, "admin": "root", "session_ttl_secs": 5}}"#).unwrap();
        let path = f.path().to_string_lossy().to_string();
        let vars = env(&[("DOCGATE_CONFIG", &path), ("DOCGATE_HTTP_PORT", "7000"), ("DOCGATE_MAX_REWRITE_DEPTH", "3")]);
        let cfg = ServerConfig::load_with(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.http_port, 7000);
        assert_eq!(cfg.admin.as_deref(), Some("root"));
        assert_eq!(cfg.session_ttl_secs, 5);
        assert_eq!(cfg.max_rewrite_depth, 3);
        assert_eq!(cfg.bind, "127.0.0.1");
    }

    #[test]
    fn bad_values_are_reported() {
        let vars = env(&[("DOCGATE_HTTP_PORT", "not-a-port")]);
        let err = ServerConfig::load_with(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("DOCGATE_HTTP_PORT"));
        let vars = env(&[("DOCGATE_CONFIG", "/definitely/not/here.json")]);
        assert!(ServerConfig::load_with(|k| vars.get(k).cloned()).is_err());
    }
}
