use super::IdentityContext;

/// Per-request envelope handed from the transport to the request service.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: IdentityContext,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(identity: IdentityContext) -> Self {
        Self { identity, request_id: Some(uuid::Uuid::new_v4().simple().to_string()) }
    }
}
