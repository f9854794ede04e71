use super::*;
use crate::identity::IdentityContext;
use crate::security::TracingAudit;
use serde_json::json;
use std::collections::HashMap;

struct Ddocs(HashMap<String, Arc<DesignDoc>>);

impl DesignDocs for Ddocs {
    fn design_doc(&self, id: &str) -> Option<Arc<DesignDoc>> { self.0.get(id).cloned() }
}

fn inbox_ddocs() -> Ddocs {
    let dd = DesignDoc::from_json(&json!({
        "_id": "_design/inbox",
        "rewrites": [
            {"from": "r_from", "to": "../../r_to"},
            {"from": "one/two/three/DATABASE", "to": "../../"},
            {"from": "loop", "to": "_rewrite/loop"},
            {"from": "view", "to": "_view/ids", "query": {"reduce": false}}
        ]
    })).unwrap();
    Ddocs(HashMap::from([(dd.id.clone(), Arc::new(dd))]))
}

fn router() -> DesignResourceRouter { DesignResourceRouter::new(4, AuditRegistry::new()) }

fn kind(method: &str, path: &str) -> OperationKind {
    router().classify(method, path, &BTreeMap::new(), &inbox_ddocs()).unwrap().kind()
}

fn inbox_policy() -> SecurityPolicy {
    SecurityPolicy::from_json(&json!({
        "admins": {"roles": [], "names": ["jchris@apache.org"]},
        "members": {"roles": [], "names": ["a_member"], "allow_anonymous_writes": true}
    })).unwrap()
}

#[test]
fn method_override_applies_only_to_post() {
    assert_eq!(effective_method("POST", Some("GET")), "GET");
    assert_eq!(effective_method("post", Some(" get ")), "GET");
    assert_eq!(effective_method("PUT", Some("GET")), "PUT");
    assert_eq!(effective_method("POST", Some("")), "POST");
    assert_eq!(effective_method("get", None), "GET");
}

#[test]
fn documents_classify_by_method() {
    assert_eq!(kind("GET", "/inbox/a_doc"), OperationKind::ReadDoc);
    assert_eq!(kind("HEAD", "/inbox/a_doc"), OperationKind::ReadDoc);
    assert_eq!(kind("PUT", "/inbox/a_doc"), OperationKind::WriteDoc);
    assert_eq!(kind("DELETE", "/inbox/a_doc"), OperationKind::WriteDoc);
    assert_eq!(kind("MEANINGLESS", "/inbox/a_doc"), OperationKind::ReadDoc);
    assert_eq!(kind("POST", "/inbox"), OperationKind::WriteDoc);
    assert_eq!(kind("GET", "/inbox"), OperationKind::DbInfo);
    assert_eq!(kind("PUT", "/inbox"), OperationKind::ManageDb);
    assert_eq!(kind("PUT", "/inbox/_local/cp"), OperationKind::WriteDoc);
}

#[test]
fn special_resources_ignore_the_verb() {
    for method in ["GET", "POST", "PUT"] {
        assert_eq!(kind(method, "/inbox/_all_docs"), OperationKind::AllDocs);
        assert_eq!(kind(method, "/inbox/_changes"), OperationKind::Changes);
        assert_eq!(kind(method, "/inbox/_temp_view"), OperationKind::TempView);
        assert_eq!(kind(method, "/inbox/_design/inbox/_view/ids"), OperationKind::StoredView);
    }
    for method in ["GET", "PUT", "POST", "OPTIONS", "MEANINGLESS", "METHODS"] {
        assert_eq!(kind(method, "/inbox/_design/inbox/_show/hello/a_doc"), OperationKind::Show);
        assert_eq!(kind(method, "/inbox/_design/inbox/_list/raygan/ids"), OperationKind::List);
    }
}

#[test]
fn sub_resource_targets_carry_names() {
    let r = router().classify("GET", "/inbox/_design/inbox/_list/raygan/other/ids", &BTreeMap::new(), &inbox_ddocs()).unwrap();
    assert_eq!(
        r.target,
        Target::List { ddoc: "_design/inbox".into(), name: "raygan".into(), view_ddoc: "_design/other".into(), view: "ids".into() }
    );
    let r = router().classify("POST", "/inbox/_design/inbox/_update/inc", &BTreeMap::new(), &inbox_ddocs()).unwrap();
    assert_eq!(r.target, Target::Update { ddoc: "_design/inbox".into(), name: "inc".into(), doc_id: None });
    assert_eq!(r.kind(), OperationKind::UpdateFn);
    let r = router().classify("PUT", "/inbox/doc%2Fwith%20slash/file.txt", &BTreeMap::new(), &inbox_ddocs()).unwrap();
    assert_eq!(r.target, Target::Attachment { id: "doc/with slash".into(), name: "file.txt".into() });
    assert_eq!(r.kind(), OperationKind::AttachmentWrite);
}

#[test]
fn design_doc_writes_are_admin_only() {
    assert_eq!(kind("PUT", "/inbox/_design/inbox"), OperationKind::DesignWrite);
    assert_eq!(kind("GET", "/inbox/_design/inbox"), OperationKind::ReadDoc);
    assert_eq!(kind("PUT", "/inbox/_security"), OperationKind::SecurityWrite);
    assert_eq!(kind("GET", "/inbox/_security"), OperationKind::SecurityRead);
}

#[test]
fn rewrites_classify_at_their_destination() {
    let r = router().classify("PUT", "/inbox/_design/inbox/_rewrite/r_from", &BTreeMap::new(), &inbox_ddocs()).unwrap();
    assert_eq!(r.kind(), OperationKind::WriteDoc);
    assert_eq!(r.target, Target::Doc { id: "r_to".into() });
    assert_eq!(r.rewritten_from.as_deref(), Some("/inbox/_design/inbox/_rewrite/r_from"));

    assert_eq!(kind("GET", "/inbox/_design/inbox/_rewrite/r_from"), OperationKind::ReadDoc);
    assert_eq!(kind("POST", "/inbox/_design/inbox/_rewrite/one/two/three/DATABASE"), OperationKind::WriteDoc);

    let r = router().classify("GET", "/inbox/_design/inbox/_rewrite/view", &BTreeMap::new(), &inbox_ddocs()).unwrap();
    assert_eq!(r.kind(), OperationKind::StoredView);
    assert_eq!(r.query.get("reduce").map(String::as_str), Some("false"));
}

#[test]
fn unmatched_rewrites_are_reads() {
    let r = router().classify("HEAD", "/inbox/_design/inbox/_rewrite/one/two/three/DATABASE/in_db", &BTreeMap::new(), &inbox_ddocs()).unwrap();
    assert_eq!(r.kind(), OperationKind::Rewrite);
    assert_eq!(r.target, Target::RewriteMiss);
    assert_eq!(kind("PUT", "/inbox/_design/missing/_rewrite/x"), OperationKind::Rewrite);
}

#[test]
fn rewrite_loops_are_bounded() {
    let err = router().classify("GET", "/inbox/_design/inbox/_rewrite/loop", &BTreeMap::new(), &inbox_ddocs()).unwrap_err();
    assert_eq!(err.http_status(), 400);
}

#[test]
fn resolve_denies_non_members_uniformly() {
    let audit = AuditRegistry::new();
    audit.register(Box::new(TracingAudit));
    let router = DesignResourceRouter::new(4, audit);
    let ctx = RequestContext::new(IdentityContext::named("not_a_member", &[]));
    let policy = inbox_policy();
    let ddocs = inbox_ddocs();
    let q = BTreeMap::new();

    for method in ["GET", "PUT", "POST", "OPTIONS", "MEANINGLESS"] {
        let err = router.resolve(method, "/inbox/_design/inbox/_show/hello/a_doc", &q, &ddocs, &policy, &ctx).unwrap_err();
        assert_eq!(err.error_str(), "unauthorized", "{}", method);
    }
    assert!(router.resolve("HEAD", "/inbox/_design/inbox/_rewrite/one/two/three/DATABASE/in_db", &q, &ddocs, &policy, &ctx).is_err());
    assert!(router.resolve("GET", "/inbox/_design/inbox/_rewrite/r_from", &q, &ddocs, &policy, &ctx).is_err());

    // inbox mode lets the same caller write, including through rewrites and update functions
    assert!(router.resolve("PUT", "/inbox/_design/inbox/_rewrite/r_from", &q, &ddocs, &policy, &ctx).is_ok());
    assert!(router.resolve("POST", "/inbox/_design/inbox/_update/inc", &q, &ddocs, &policy, &ctx).is_ok());
    assert!(router.resolve("PUT", "/inbox/nonmember_valid/standalone.txt", &q, &ddocs, &policy, &ctx).is_ok());
    assert!(router.resolve("POST", "/inbox/_temp_view", &q, &ddocs, &policy, &ctx).is_err());
}

#[test]
fn resolve_allows_members_and_server_admins() {
    let router = router();
    let policy = inbox_policy();
    let ddocs = inbox_ddocs();
    let q = BTreeMap::new();
    let member = RequestContext::new(IdentityContext::named("a_member", &[]));
    assert!(router.resolve("GET", "/inbox/a_doc", &q, &ddocs, &policy, &member).is_ok());
    assert!(router.resolve("POST", "/inbox/_temp_view", &q, &ddocs, &policy, &member).is_err());
    let root = RequestContext::new(IdentityContext::server_admin("root"));
    assert!(router.resolve("POST", "/inbox/_temp_view", &q, &ddocs, &policy, &root).is_ok());
    assert!(router.resolve("DELETE", "/inbox", &q, &NoDesignDocs, &policy, &root).is_ok());
}
