use std::collections::BTreeMap;
use std::sync::Arc;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use tracing::info;

use super::database::Database;
use crate::error::{AppError, AppResult};

static DB_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_$()+/-]*$").expect("database name pattern"));

pub fn valid_db_name(name: &str) -> bool { DB_NAME.is_match(name) }

/// All databases of one server, keyed by name.
#[derive(Default)]
pub struct DocStore {
    dbs: RwLock<BTreeMap<String, Arc<Database>>>,
}

impl DocStore {
    pub fn new() -> Self { Self::default() }

    pub fn create(&self, name: &str) -> AppResult<Arc<Database>> {
        if !valid_db_name(name) {
            return Err(AppError::bad_request(format!(
                "Name: '{}'. Only lowercase characters (a-z), digits (0-9), and any of the characters _, $, (, ), +, -, and / are allowed. Must begin with a letter.",
                name
            )));
        }
        let mut dbs = self.dbs.write();
        if dbs.contains_key(name) {
            return Err(AppError::conflict("The database could not be created, the file already exists."));
        }
        let db = Arc::new(Database::new(name));
        dbs.insert(name.to_string(), db.clone());
        info!(target: "docgate::storage", "created database {}", name);
        Ok(db)
    }

    pub fn delete(&self, name: &str) -> AppResult<()> {
        match self.dbs.write().remove(name) {
            Some(_) => {
                info!(target: "docgate::storage", "deleted database {}", name);
                Ok(())
            }
            None => Err(AppError::not_found("Database does not exist.")),
        }
    }

    pub fn get(&self, name: &str) -> AppResult<Arc<Database>> {
        self.dbs.read().get(name).cloned().ok_or_else(|| AppError::not_found("Database does not exist."))
    }

    pub fn names(&self) -> Vec<String> { self.dbs.read().keys().cloned().collect() }
}
