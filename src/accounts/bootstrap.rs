//! First-run admin account.

use secrecy::ExposeSecret;
use tracing::info;

use crate::accounts::{Account, NewAccount, Role};
use crate::auth::password::hash_password;
use crate::config::BootstrapAdmin;
use crate::error::DatabaseError;
use crate::store::Database;

/// Create the configured admin unless an account already owns the email.
///
/// Returns the created account, or `None` when nothing was done.
pub async fn ensure_admin(
    store: &dyn Database,
    admin: &BootstrapAdmin,
) -> Result<Option<Account>, DatabaseError> {
    if store.get_account_by_email(&admin.email).await?.is_some() {
        return Ok(None);
    }

    let role = store
        .get_role_by_name(Role::Admin)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "Role".into(),
            id: Role::Admin.to_string(),
        })?;

    let account = store
        .create_account(&NewAccount {
            role_id: role.id,
            name: admin.name.clone(),
            email: admin.email.clone(),
            password_hash: hash_password(admin.password.expose_secret()),
        })
        .await?;
    info!(account_id = account.id, email = %account.email, "Bootstrap admin created");
    Ok(Some(account))
}
