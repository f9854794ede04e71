use std::collections::HashMap;
use anyhow::{Result, anyhow};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use crate::tprintln;

use super::principal::{IdentityContext, SERVER_ADMIN_ROLE};
use super::session::{Session, SessionManager};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
}

/// Credential check producing an identity. The gate never calls this; the
/// transport resolves identities before any authorization decision.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, name: &str, password: &str) -> Option<IdentityContext>;

    fn login(&self, sm: &SessionManager, req: &LoginRequest) -> Result<LoginResponse> {
        let identity = self.authenticate(&req.name, &req.password).ok_or_else(|| anyhow!("invalid_credentials"))?;
        let session = sm.issue(identity)?;
        tprintln!("auth.login user={}", req.name);
        Ok(LoginResponse { session })
    }
}

#[derive(Debug, Clone)]
struct UserRecord {
    password_hash: String,
    roles: Vec<String>,
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let phc = Argon2::default().hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// In-memory user directory with Argon2 password hashes.
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl UserDirectory {
    pub fn new() -> Self { Self::default() }

    /// Create or replace a user.
    pub fn put_user(&self, name: &str, password: &str, roles: Vec<String>) -> Result<()> {
        if name.is_empty() { return Err(anyhow!("user name must not be empty")); }
        let password_hash = hash_password(password)?;
        self.users.write().insert(name.to_string(), UserRecord { password_hash, roles });
        Ok(())
    }

    /// Bootstrap a server administrator (holds the reserved `_admin` role).
    pub fn put_server_admin(&self, name: &str, password: &str) -> Result<()> {
        self.put_user(name, password, vec![SERVER_ADMIN_ROLE.to_string()])
    }

    pub fn delete_user(&self, name: &str) -> bool { self.users.write().remove(name).is_some() }

    pub fn contains(&self, name: &str) -> bool { self.users.read().contains_key(name) }
}

impl AuthProvider for UserDirectory {
    fn authenticate(&self, name: &str, password: &str) -> Option<IdentityContext> {
        let rec = self.users.read().get(name).cloned()?;
        if !verify_password(&rec.password_hash, password) { return None; }
        Some(IdentityContext { name: Some(name.to_string()), roles: rec.roles })
    }
}
