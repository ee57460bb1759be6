//! Account storage: bcrypt-hashed credentials in SQLite

use crate::auth::models::{User, UserRole};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

pub struct UserStore {
    conn: Mutex<Connection>,
}

impl UserStore {
    /// Opens the store and guarantees an admin account exists with the
    /// configured credentials.
    pub fn new(db_path: &str, admin_username: &str, admin_password: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open auth database at {db_path}"))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_admin(admin_username, admin_password)?;
        Ok(store)
    }

    fn ensure_admin(&self, username: &str, password: &str) -> Result<()> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                [],
                |row| row.get(0),
            )
            .context("admin lookup")?;

        if count == 0 {
            let password_hash = hash(password, DEFAULT_COST).context("password hash")?;
            conn.execute(
                "INSERT INTO users (id, username, password_hash, role, created_at)
                 VALUES (?1, ?2, ?3, 'admin', ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    username,
                    password_hash,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("admin insert")?;
            info!("🔐 Admin account created (username: {username})");
            if password == "admin123" {
                warn!("⚠️ Default admin password in use. Set ADMIN_PASSWORD.");
            }
        }
        Ok(())
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE username = ?1",
        )?;
        let user = stmt
            .query_row(params![username], |row| {
                let id: String = row.get(0)?;
                let role: String = row.get(3)?;
                Ok(User {
                    id: Uuid::parse_str(&id).unwrap_or_default(),
                    username: row.get(1)?,
                    password_hash: row.get(2)?,
                    role: UserRole::from_str(&role).unwrap_or(UserRole::Viewer),
                    created_at: row.get(4)?,
                })
            })
            .optional()?;
        Ok(user)
    }

    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_by_username(username)? {
            Some(user) => verify(password, &user.password_hash).context("password verify"),
            None => Ok(false),
        }
    }

    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("password hash")?;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            role,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.username,
                user.password_hash,
                user.role.as_str(),
                user.created_at,
            ],
        )
        .context("user insert")?;

        info!("✅ Created user: {} ({})", user.username, user.role.as_str());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        UserStore::new(":memory:", "admin", "hunter2-long-enough").unwrap()
    }

    #[test]
    fn admin_is_seeded_with_configured_credentials() {
        let store = store();
        let admin = store.get_by_username("admin").unwrap().unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert!(store.verify_password("admin", "hunter2-long-enough").unwrap());
        assert!(!store.verify_password("admin", "wrong").unwrap());
    }

    #[test]
    fn unknown_user_fails_verification() {
        let store = store();
        assert!(!store.verify_password("ghost", "whatever").unwrap());
    }

    #[test]
    fn create_and_fetch_operator() {
        let store = store();
        store
            .create_user("ops", "op-password", UserRole::Operator)
            .unwrap();
        let user = store.get_by_username("ops").unwrap().unwrap();
        assert_eq!(user.role, UserRole::Operator);
        assert!(store.verify_password("ops", "op-password").unwrap());
    }
}
