//! The `Database` trait: one async interface for all persistence.

use async_trait::async_trait;

use crate::accounts::{Account, NewAccount, Role, RoleRecord};
use crate::error::DatabaseError;
use crate::letters::model::{Letter, LetterType, NewLetter};
use crate::notifications::preference::{NewPreference, NotificationPreference};

/// Backend-agnostic database trait covering accounts, roles, the letter-type
/// catalog, letters, and notification preferences.
///
/// Lookups return `Ok(None)` for missing rows; deletes return whether a row
/// was removed.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Roles ───────────────────────────────────────────────────────

    async fn create_role(&self, name: Role) -> Result<RoleRecord, DatabaseError>;

    async fn get_role(&self, id: i64) -> Result<Option<RoleRecord>, DatabaseError>;

    async fn get_role_by_name(&self, name: Role) -> Result<Option<RoleRecord>, DatabaseError>;

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, DatabaseError>;

    async fn update_role(&self, role: &RoleRecord) -> Result<(), DatabaseError>;

    async fn delete_role(&self, id: i64) -> Result<bool, DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    /// Insert an account. Fails with `Constraint` if the email is taken.
    async fn create_account(&self, account: &NewAccount) -> Result<Account, DatabaseError>;

    async fn get_account(&self, id: i64) -> Result<Option<Account>, DatabaseError>;

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    /// Persist name, email, role and password hash of an existing account.
    async fn update_account(&self, account: &Account) -> Result<(), DatabaseError>;

    async fn delete_account(&self, id: i64) -> Result<bool, DatabaseError>;

    // ── Letter types ────────────────────────────────────────────────

    async fn create_letter_type(
        &self,
        name: &str,
        description: &str,
    ) -> Result<LetterType, DatabaseError>;

    async fn get_letter_type(&self, id: i64) -> Result<Option<LetterType>, DatabaseError>;

    async fn list_letter_types(&self) -> Result<Vec<LetterType>, DatabaseError>;

    async fn update_letter_type(&self, letter_type: &LetterType) -> Result<(), DatabaseError>;

    async fn delete_letter_type(&self, id: i64) -> Result<bool, DatabaseError>;

    // ── Letters ─────────────────────────────────────────────────────

    /// Insert a letter in `pending` state with an empty reject reason.
    async fn insert_letter(&self, letter: &NewLetter) -> Result<Letter, DatabaseError>;

    async fn get_letter(&self, id: i64) -> Result<Option<Letter>, DatabaseError>;

    /// All letters, ascending by id.
    async fn list_letters(&self) -> Result<Vec<Letter>, DatabaseError>;

    /// Letters requested by one account, ascending by id.
    async fn list_letters_by_user(&self, user_id: i64) -> Result<Vec<Letter>, DatabaseError>;

    /// Persist requester, type, status and reject reason; bumps `updated_at`.
    async fn update_letter(&self, letter: &Letter) -> Result<Letter, DatabaseError>;

    async fn delete_letter(&self, id: i64) -> Result<bool, DatabaseError>;

    // ── Notification preferences ────────────────────────────────────

    /// Insert a preference. Fails with `Constraint` if the account already has one.
    async fn create_preference(
        &self,
        pref: &NewPreference,
    ) -> Result<NotificationPreference, DatabaseError>;

    async fn get_preference(&self, id: i64)
    -> Result<Option<NotificationPreference>, DatabaseError>;

    async fn get_preference_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<NotificationPreference>, DatabaseError>;

    async fn list_preferences(&self) -> Result<Vec<NotificationPreference>, DatabaseError>;

    /// Preferences of every account carrying `role`.
    async fn list_preferences_by_role(
        &self,
        role: Role,
    ) -> Result<Vec<NotificationPreference>, DatabaseError>;

    async fn update_preference(&self, pref: &NotificationPreference) -> Result<(), DatabaseError>;

    async fn delete_preference(&self, id: i64) -> Result<bool, DatabaseError>;
}
