use serde::{Deserialize, Serialize};

/// What an operation needs from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
    /// Database admin or server admin.
    Admin,
    /// Server admin only.
    Server,
}

/// Semantic operation kind, independent of the HTTP verb that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    ReadDoc,
    WriteDoc,
    TempView,
    StoredView,
    Show,
    List,
    UpdateFn,
    Rewrite,
    AllDocs,
    Changes,
    AttachmentWrite,
    DbInfo,
    SecurityRead,
    SecurityWrite,
    DesignWrite,
    ManageDb,
}

impl OperationKind {
    pub fn access(&self) -> Access {
        use OperationKind::*;
        match self {
            ReadDoc | StoredView | Show | List | Rewrite | AllDocs | Changes | DbInfo | SecurityRead => Access::Read,
            WriteDoc | UpdateFn | AttachmentWrite => Access::Write,
            TempView | SecurityWrite | DesignWrite => Access::Admin,
            ManageDb => Access::Server,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use OperationKind::*;
        match self {
            ReadDoc => "read-doc",
            WriteDoc => "write-doc",
            TempView => "temp-view",
            StoredView => "stored-view",
            Show => "show",
            List => "list",
            UpdateFn => "update-fn",
            Rewrite => "rewrite",
            AllDocs => "all-docs",
            Changes => "changes",
            AttachmentWrite => "attachment-write",
            DbInfo => "db-info",
            SecurityRead => "security-read",
            SecurityWrite => "security-write",
            DesignWrite => "design-write",
            ManageDb => "manage-db",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub admin_only: bool,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self { kind, admin_only: matches!(kind.access(), Access::Admin | Access::Server) }
    }

    pub fn access(&self) -> Access {
        match self.kind.access() {
            Access::Server => Access::Server,
            _ if self.admin_only => Access::Admin,
            a => a,
        }
    }

    pub fn is_write(&self) -> bool { self.access() == Access::Write }
}

impl From<OperationKind> for Operation {
    fn from(kind: OperationKind) -> Self { Operation::new(kind) }
}
