//! Accounts and their role tags.

pub mod bootstrap;
pub mod model;

pub use bootstrap::ensure_admin;
pub use model::{Account, AccountSummary, NewAccount, Role, RoleRecord};
