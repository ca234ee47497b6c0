//! libSQL backend implementing the async `Database` trait.
//!
//! Supports local file and in-memory databases over one shared connection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::accounts::{Account, NewAccount, Role, RoleRecord};
use crate::error::DatabaseError;
use crate::letters::model::{Letter, LetterStatus, LetterType, NewLetter};
use crate::notifications::preference::{NewPreference, NotificationPreference};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a query and collect every row through `map`.
    async fn query_all<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&libsql::Row) -> Result<T, DatabaseError>,
    ) -> Result<Vec<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| query_error(op, e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| query_error(op, e))? {
            out.push(map(&row)?);
        }
        Ok(out)
    }

    /// Run a query and map the first row, if any.
    async fn query_one<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&libsql::Row) -> Result<T, DatabaseError>,
    ) -> Result<Option<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| query_error(op, e))?;

        match rows.next().await.map_err(|e| query_error(op, e))? {
            Some(row) => Ok(Some(map(&row)?)),
            None => Ok(None),
        }
    }

    /// Run an `INSERT ... RETURNING id` and return the new id.
    async fn insert_returning_id(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<i64, DatabaseError> {
        self.query_one(op, sql, params, |row| {
            row.get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("returning id: {e}")))
        })
        .await?
        .ok_or_else(|| DatabaseError::Query(format!("{op}: insert returned no id")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Classify a libSQL error, surfacing constraint failures separately.
fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn row_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("row parse: {e}"))
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_role(s: &str) -> Result<Role, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

const ACCOUNT_COLUMNS: &str = "a.id, a.role_id, a.name, a.email, a.password_hash, a.created_at, a.updated_at, r.name";

const LETTER_COLUMNS: &str = "id, user_id, type_id, status, reject_reason, created_at, updated_at";

const PREFERENCE_COLUMNS: &str = "p.id, p.user_id, p.telegram_chat_id, p.wa_number, p.allow_telegram, p.allow_wa, p.created_at, p.updated_at";

fn row_to_role(row: &libsql::Row) -> Result<RoleRecord, DatabaseError> {
    let name: String = row.get(1).map_err(row_err)?;
    Ok(RoleRecord {
        id: row.get(0).map_err(row_err)?,
        name: parse_role(&name)?,
    })
}

/// Column order matches ACCOUNT_COLUMNS.
fn row_to_account(row: &libsql::Row) -> Result<Account, DatabaseError> {
    let role_id: i64 = row.get(1).map_err(row_err)?;
    let created: String = row.get(5).map_err(row_err)?;
    let updated: String = row.get(6).map_err(row_err)?;
    let role_name: String = row.get(7).map_err(row_err)?;
    Ok(Account {
        id: row.get(0).map_err(row_err)?,
        role_id,
        name: row.get(2).map_err(row_err)?,
        email: row.get(3).map_err(row_err)?,
        password_hash: row.get(4).map_err(row_err)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
        role: RoleRecord {
            id: role_id,
            name: parse_role(&role_name)?,
        },
    })
}

fn row_to_letter_type(row: &libsql::Row) -> Result<LetterType, DatabaseError> {
    Ok(LetterType {
        id: row.get(0).map_err(row_err)?,
        name: row.get(1).map_err(row_err)?,
        description: row.get(2).map_err(row_err)?,
    })
}

/// Column order matches LETTER_COLUMNS.
fn row_to_letter(row: &libsql::Row) -> Result<Letter, DatabaseError> {
    let status: String = row.get(3).map_err(row_err)?;
    let created: String = row.get(5).map_err(row_err)?;
    let updated: String = row.get(6).map_err(row_err)?;
    Ok(Letter {
        id: row.get(0).map_err(row_err)?,
        user_id: row.get(1).map_err(row_err)?,
        type_id: row.get(2).map_err(row_err)?,
        status: status
            .parse::<LetterStatus>()
            .map_err(DatabaseError::Serialization)?,
        reject_reason: row.get(4).map_err(row_err)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order matches PREFERENCE_COLUMNS.
fn row_to_preference(row: &libsql::Row) -> Result<NotificationPreference, DatabaseError> {
    let allow_telegram: i64 = row.get(4).map_err(row_err)?;
    let allow_wa: i64 = row.get(5).map_err(row_err)?;
    let created: String = row.get(6).map_err(row_err)?;
    let updated: String = row.get(7).map_err(row_err)?;
    Ok(NotificationPreference {
        id: row.get(0).map_err(row_err)?,
        user_id: row.get(1).map_err(row_err)?,
        telegram_chat_id: row.get(2).map_err(row_err)?,
        wa_number: row.get(3).map_err(row_err)?,
        allow_telegram: allow_telegram != 0,
        allow_wa: allow_wa != 0,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn not_found(entity: &str, id: i64) -> DatabaseError {
    DatabaseError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::init_schema(self.conn()).await
    }

    // ── Roles ───────────────────────────────────────────────────────

    async fn create_role(&self, name: Role) -> Result<RoleRecord, DatabaseError> {
        let id = self
            .insert_returning_id(
                "create_role",
                "INSERT INTO roles (name) VALUES (?1) RETURNING id",
                params![name.as_str()],
            )
            .await?;
        debug!(id, role = %name, "Role created");
        Ok(RoleRecord { id, name })
    }

    async fn get_role(&self, id: i64) -> Result<Option<RoleRecord>, DatabaseError> {
        self.query_one(
            "get_role",
            "SELECT id, name FROM roles WHERE id = ?1",
            params![id],
            row_to_role,
        )
        .await
    }

    async fn get_role_by_name(&self, name: Role) -> Result<Option<RoleRecord>, DatabaseError> {
        self.query_one(
            "get_role_by_name",
            "SELECT id, name FROM roles WHERE name = ?1",
            params![name.as_str()],
            row_to_role,
        )
        .await
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, DatabaseError> {
        self.query_all(
            "list_roles",
            "SELECT id, name FROM roles ORDER BY id ASC",
            (),
            row_to_role,
        )
        .await
    }

    async fn update_role(&self, role: &RoleRecord) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE roles SET name = ?1 WHERE id = ?2",
                params![role.name.as_str(), role.id],
            )
            .await
            .map_err(|e| query_error("update_role", e))?;
        if count == 0 {
            return Err(not_found("Role", role.id));
        }
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM roles WHERE id = ?1", params![id])
            .await
            .map_err(|e| query_error("delete_role", e))?;
        Ok(count > 0)
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn create_account(&self, account: &NewAccount) -> Result<Account, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let id = self
            .insert_returning_id(
                "create_account",
                "INSERT INTO accounts (role_id, name, email, password_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5) RETURNING id",
                params![
                    account.role_id,
                    account.name.as_str(),
                    account.email.as_str(),
                    account.password_hash.as_str(),
                    now,
                ],
            )
            .await?;
        debug!(id, email = %account.email, "Account created");
        self.get_account(id)
            .await?
            .ok_or_else(|| not_found("Account", id))
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, DatabaseError> {
        self.query_one(
            "get_account",
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts a JOIN roles r ON r.id = a.role_id WHERE a.id = ?1"
            ),
            params![id],
            row_to_account,
        )
        .await
    }

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError> {
        self.query_one(
            "get_account_by_email",
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts a JOIN roles r ON r.id = a.role_id WHERE a.email = ?1"
            ),
            params![email],
            row_to_account,
        )
        .await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        self.query_all(
            "list_accounts",
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts a JOIN roles r ON r.id = a.role_id ORDER BY a.id ASC"
            ),
            (),
            row_to_account,
        )
        .await
    }

    async fn update_account(&self, account: &Account) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE accounts SET role_id = ?1, name = ?2, email = ?3, password_hash = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    account.role_id,
                    account.name.as_str(),
                    account.email.as_str(),
                    account.password_hash.as_str(),
                    now,
                    account.id,
                ],
            )
            .await
            .map_err(|e| query_error("update_account", e))?;
        if count == 0 {
            return Err(not_found("Account", account.id));
        }
        debug!(id = account.id, "Account updated");
        Ok(())
    }

    async fn delete_account(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM accounts WHERE id = ?1", params![id])
            .await
            .map_err(|e| query_error("delete_account", e))?;
        Ok(count > 0)
    }

    // ── Letter types ────────────────────────────────────────────────

    async fn create_letter_type(
        &self,
        name: &str,
        description: &str,
    ) -> Result<LetterType, DatabaseError> {
        let id = self
            .insert_returning_id(
                "create_letter_type",
                "INSERT INTO letter_types (name, description) VALUES (?1, ?2) RETURNING id",
                params![name, description],
            )
            .await?;
        Ok(LetterType {
            id,
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    async fn get_letter_type(&self, id: i64) -> Result<Option<LetterType>, DatabaseError> {
        self.query_one(
            "get_letter_type",
            "SELECT id, name, description FROM letter_types WHERE id = ?1",
            params![id],
            row_to_letter_type,
        )
        .await
    }

    async fn list_letter_types(&self) -> Result<Vec<LetterType>, DatabaseError> {
        self.query_all(
            "list_letter_types",
            "SELECT id, name, description FROM letter_types ORDER BY id ASC",
            (),
            row_to_letter_type,
        )
        .await
    }

    async fn update_letter_type(&self, letter_type: &LetterType) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE letter_types SET name = ?1, description = ?2 WHERE id = ?3",
                params![
                    letter_type.name.as_str(),
                    letter_type.description.as_str(),
                    letter_type.id
                ],
            )
            .await
            .map_err(|e| query_error("update_letter_type", e))?;
        if count == 0 {
            return Err(not_found("LetterType", letter_type.id));
        }
        Ok(())
    }

    async fn delete_letter_type(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM letter_types WHERE id = ?1", params![id])
            .await
            .map_err(|e| query_error("delete_letter_type", e))?;
        Ok(count > 0)
    }

    // ── Letters ─────────────────────────────────────────────────────

    async fn insert_letter(&self, letter: &NewLetter) -> Result<Letter, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let id = self
            .insert_returning_id(
                "insert_letter",
                "INSERT INTO letters (user_id, type_id, status, reject_reason, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', '', ?3, ?3) RETURNING id",
                params![letter.user_id, letter.type_id, now],
            )
            .await?;
        debug!(id, user_id = letter.user_id, "Letter inserted");
        self.get_letter(id)
            .await?
            .ok_or_else(|| not_found("Letter", id))
    }

    async fn get_letter(&self, id: i64) -> Result<Option<Letter>, DatabaseError> {
        self.query_one(
            "get_letter",
            &format!("SELECT {LETTER_COLUMNS} FROM letters WHERE id = ?1"),
            params![id],
            row_to_letter,
        )
        .await
    }

    async fn list_letters(&self) -> Result<Vec<Letter>, DatabaseError> {
        self.query_all(
            "list_letters",
            &format!("SELECT {LETTER_COLUMNS} FROM letters ORDER BY id ASC"),
            (),
            row_to_letter,
        )
        .await
    }

    async fn list_letters_by_user(&self, user_id: i64) -> Result<Vec<Letter>, DatabaseError> {
        self.query_all(
            "list_letters_by_user",
            &format!("SELECT {LETTER_COLUMNS} FROM letters WHERE user_id = ?1 ORDER BY id ASC"),
            params![user_id],
            row_to_letter,
        )
        .await
    }

    async fn update_letter(&self, letter: &Letter) -> Result<Letter, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE letters SET user_id = ?1, type_id = ?2, status = ?3, reject_reason = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    letter.user_id,
                    letter.type_id,
                    letter.status.as_str(),
                    letter.reject_reason.as_str(),
                    now,
                    letter.id,
                ],
            )
            .await
            .map_err(|e| query_error("update_letter", e))?;
        if count == 0 {
            return Err(not_found("Letter", letter.id));
        }
        debug!(id = letter.id, status = %letter.status, "Letter updated");
        self.get_letter(letter.id)
            .await?
            .ok_or_else(|| not_found("Letter", letter.id))
    }

    async fn delete_letter(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM letters WHERE id = ?1", params![id])
            .await
            .map_err(|e| query_error("delete_letter", e))?;
        Ok(count > 0)
    }

    // ── Notification preferences ────────────────────────────────────

    async fn create_preference(
        &self,
        pref: &NewPreference,
    ) -> Result<NotificationPreference, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let id = self
            .insert_returning_id(
                "create_preference",
                "INSERT INTO notification_preferences
                    (user_id, telegram_chat_id, wa_number, allow_telegram, allow_wa, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) RETURNING id",
                params![
                    pref.user_id,
                    pref.telegram_chat_id.as_str(),
                    pref.wa_number.as_str(),
                    pref.allow_telegram as i64,
                    pref.allow_wa as i64,
                    now,
                ],
            )
            .await?;
        debug!(id, user_id = pref.user_id, "Notification preference created");
        self.get_preference(id)
            .await?
            .ok_or_else(|| not_found("NotificationPreference", id))
    }

    async fn get_preference(
        &self,
        id: i64,
    ) -> Result<Option<NotificationPreference>, DatabaseError> {
        self.query_one(
            "get_preference",
            &format!("SELECT {PREFERENCE_COLUMNS} FROM notification_preferences p WHERE p.id = ?1"),
            params![id],
            row_to_preference,
        )
        .await
    }

    async fn get_preference_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<NotificationPreference>, DatabaseError> {
        self.query_one(
            "get_preference_for_user",
            &format!(
                "SELECT {PREFERENCE_COLUMNS} FROM notification_preferences p WHERE p.user_id = ?1"
            ),
            params![user_id],
            row_to_preference,
        )
        .await
    }

    async fn list_preferences(&self) -> Result<Vec<NotificationPreference>, DatabaseError> {
        self.query_all(
            "list_preferences",
            &format!("SELECT {PREFERENCE_COLUMNS} FROM notification_preferences p ORDER BY p.id ASC"),
            (),
            row_to_preference,
        )
        .await
    }

    async fn list_preferences_by_role(
        &self,
        role: Role,
    ) -> Result<Vec<NotificationPreference>, DatabaseError> {
        self.query_all(
            "list_preferences_by_role",
            &format!(
                "SELECT {PREFERENCE_COLUMNS} FROM notification_preferences p
                 JOIN accounts a ON a.id = p.user_id
                 JOIN roles r ON r.id = a.role_id
                 WHERE r.name = ?1
                 ORDER BY p.id ASC"
            ),
            params![role.as_str()],
            row_to_preference,
        )
        .await
    }

    async fn update_preference(&self, pref: &NotificationPreference) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE notification_preferences
                 SET telegram_chat_id = ?1, wa_number = ?2, allow_telegram = ?3, allow_wa = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    pref.telegram_chat_id.as_str(),
                    pref.wa_number.as_str(),
                    pref.allow_telegram as i64,
                    pref.allow_wa as i64,
                    now,
                    pref.id,
                ],
            )
            .await
            .map_err(|e| query_error("update_preference", e))?;
        if count == 0 {
            return Err(not_found("NotificationPreference", pref.id));
        }
        Ok(())
    }

    async fn delete_preference(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM notification_preferences WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| query_error("delete_preference", e))?;
        Ok(count > 0)
    }
}
