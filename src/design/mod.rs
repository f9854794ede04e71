//! Design documents and the sub-resource router.
//! Keep the public surface thin; re-export what callers need.

mod ddoc;
mod rewrite;
mod router;

pub use ddoc::{is_design_id, DesignDoc, RewriteRule, ViewDef, DESIGN_PREFIX};
pub use rewrite::{rewrite, Rewritten};
pub use router::{effective_method, path_segments, DesignDocs, DesignResourceRouter, NoDesignDocs, Route, Target};
