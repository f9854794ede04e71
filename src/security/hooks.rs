//! Audit hook traits and registry. Hooks observe decisions; they cannot change them.

use std::io::Write;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use super::authorizer::Decision;
use super::operation::OperationKind;
use crate::identity::IdentityContext;

#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub database: String,
    pub identity: IdentityContext,
    pub operation: OperationKind,
    pub method: String,
    pub path: String,
    pub decision: Decision,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationEvent {
    pub database: String,
    pub doc_id: String,
    pub identity: IdentityContext,
    /// `None` when accepted.
    pub rejection: Option<String>,
    pub request_id: Option<String>,
}

pub trait AuditHook: Send + Sync {
    fn on_authorize(&self, _ev: &AuthEvent) {}
    fn on_validate(&self, _ev: &ValidationEvent) {}
}

#[derive(Clone, Default)]
pub struct AuditRegistry {
    hooks: Arc<RwLock<Vec<Box<dyn AuditHook>>>>,
}

impl AuditRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, hook: Box<dyn AuditHook>) { self.hooks.write().push(hook); }

    pub fn len(&self) -> usize { self.hooks.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn emit_authorize(&self, ev: &AuthEvent) {
        for h in self.hooks.read().iter() { h.on_authorize(ev); }
    }

    pub fn emit_validate(&self, ev: &ValidationEvent) {
        for h in self.hooks.read().iter() { h.on_validate(ev); }
    }
}

/// Logs every decision through `tracing`; denials at info, allows at debug.
pub struct TracingAudit;

impl AuditHook for TracingAudit {
    fn on_authorize(&self, ev: &AuthEvent) {
        if ev.decision.allow {
            tracing::debug!(target: "docgate::audit", db = %ev.database, user = ?ev.identity.name, op = %ev.operation,
                rule = ?ev.decision.rule, "allow {} {}", ev.method, ev.path);
        } else {
            tracing::info!(target: "docgate::audit", db = %ev.database, user = ?ev.identity.name, op = %ev.operation,
                rule = ?ev.decision.rule, class = ?ev.decision.class, "deny {} {}", ev.method, ev.path);
        }
    }

    fn on_validate(&self, ev: &ValidationEvent) {
        if let Some(reason) = ev.rejection.as_ref() {
            tracing::info!(target: "docgate::audit", db = %ev.database, doc = %ev.doc_id, user = ?ev.identity.name, "rejected: {}", reason);
        }
    }
}

/// Appends one JSON line per event to a file. Failures are logged, never raised.
pub struct FileAudit {
    path: String,
    lock: Mutex<()>,
}

impl FileAudit {
    pub fn new(path: &str) -> Self { Self { path: path.to_string(), lock: Mutex::new(()) } }

    fn append(&self, obj: serde_json::Value) {
        let _g = self.lock.lock();
        let mut f = match std::fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(target: "docgate::audit", path = %self.path, "cannot open audit log: {}", e);
                return;
            }
        };
        if let Err(e) = writeln!(&mut f, "{}", obj) {
            tracing::warn!(target: "docgate::audit", path = %self.path, "audit record lost: {}", e);
        }
    }
}

impl AuditHook for FileAudit {
    fn on_authorize(&self, ev: &AuthEvent) {
        self.append(serde_json::json!({
            "ts": chrono::Utc::now().timestamp_millis(),
            "kind": "authorize",
            "db": ev.database,
            "user": ev.identity.name,
            "roles": ev.identity.roles,
            "operation": ev.operation.as_str(),
            "method": ev.method,
            "path": ev.path,
            "allow": ev.decision.allow,
            "rule": ev.decision.rule,
            "class": ev.decision.class,
            "request_id": ev.request_id,
        }));
    }

    fn on_validate(&self, ev: &ValidationEvent) {
        self.append(serde_json::json!({
            "ts": chrono::Utc::now().timestamp_millis(),
            "kind": "validate",
            "db": ev.database,
            "doc": ev.doc_id,
            "user": ev.identity.name,
            "accepted": ev.rejection.is_none(),
            "reason": ev.rejection,
            "request_id": ev.request_id,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{authorize, Operation, SecurityPolicy};

    fn event() -> AuthEvent {
        let identity = IdentityContext::named("not_a_member", &[]);
        let policy = SecurityPolicy::from_json(&serde_json::json!({"members": {"names": ["a_member"]}})).unwrap();
        let op = Operation::new(OperationKind::ReadDoc);
        AuthEvent {
            database: "test_suite_db".into(),
            decision: authorize(&identity, &policy, &op),
            identity,
            operation: op.kind,
            method: "GET".into(),
            path: "/test_suite_db/a_doc".into(),
            request_id: Some("r1".into()),
        }
    }

    #[test]
    fn file_audit_writes_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.log");
        let reg = AuditRegistry::new();
        reg.register(Box::new(FileAudit::new(path.to_str().unwrap())));
        reg.emit_authorize(&event());
        reg.emit_validate(&ValidationEvent {
            database: "test_suite_db".into(),
            doc_id: "nonmember_invalid".into(),
            identity: IdentityContext::anonymous(),
            rejection: Some("Set is_ok".into()),
            request_id: None,
        });

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["allow"], false);
        assert_eq!(lines[0]["operation"], "read-doc");
        assert_eq!(lines[0]["rule"], "read");
        assert_eq!(lines[1]["reason"], "Set is_ok");
    }

    #[test]
    fn registry_fans_out_to_every_hook() {
        struct Counter(Arc<Mutex<usize>>);
        impl AuditHook for Counter {
            fn on_authorize(&self, _ev: &AuthEvent) { *self.0.lock() += 1; }
        }
        let n = Arc::new(Mutex::new(0));
        let reg = AuditRegistry::new();
        reg.register(Box::new(Counter(n.clone())));
        reg.register(Box::new(Counter(n.clone())));
        reg.register(Box::new(TracingAudit));
        reg.emit_authorize(&event());
        assert_eq!(*n.lock(), 2);
        assert_eq!(reg.len(), 3);
    }

    #[derive(Clone)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    #[test]
    fn unwritable_audit_log_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = AuditRegistry::new();
        // a directory cannot be opened for appending
        reg.register(Box::new(FileAudit::new(tmp.path().to_str().unwrap())));

        let out = Capture(Arc::new(Mutex::new(Vec::new())));
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt().with_ansi(false).with_writer(move || writer.clone()).finish();
        tracing::subscriber::with_default(subscriber, || reg.emit_authorize(&event()));

        let logged = String::from_utf8(out.0.lock().clone()).unwrap();
        assert!(logged.contains("cannot open audit log"), "{}", logged);
        assert!(logged.contains("docgate::audit"), "{}", logged);
    }
}
