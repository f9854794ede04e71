//! In-memory document storage: named databases holding revisioned JSON
//! documents, attachments, a changes index and the per-database security
//! policy. Nothing here is persisted.

mod database;
mod revision;
mod store;

pub use database::{Attachment, Database, DocResult};
pub use revision::{next_rev, parse_rev};
pub use store::{valid_db_name, DocStore};
