//! Letter and letter-type data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::Account;

/// Review status of a letter.
///
/// `Pending` is the only initial state; `Accepted` and `Rejected` are terminal
/// for reviewers, though an admin may rewrite any field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LetterStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl LetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for LetterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LetterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("invalid letter status: {other}")),
        }
    }
}

/// A catalog entry describing a kind of letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterType {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// A stored letter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Letter {
    pub id: i64,
    pub user_id: i64,
    pub type_id: i64,
    pub status: LetterStatus,
    pub reject_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Letter {
    /// Apply a status change, keeping `reject_reason` in step with it.
    pub fn set_status(&mut self, status: LetterStatus, reject_reason: Option<String>) {
        self.status = status;
        self.reject_reason = match status {
            LetterStatus::Rejected => reject_reason.unwrap_or_default(),
            LetterStatus::Accepted | LetterStatus::Pending => String::new(),
        };
    }
}

/// Fields needed to insert a letter.
#[derive(Debug, Clone)]
pub struct NewLetter {
    pub user_id: i64,
    pub type_id: i64,
}

/// A letter with its requester and type resolved, as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct LetterView {
    #[serde(flatten)]
    pub letter: Letter,
    pub user: Account,
    pub letter_type: LetterType,
}

/// Create-letter payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateLetterInput {
    #[serde(default)]
    pub user_id: Option<i64>,
    pub type_id: i64,
}

/// Partial update of a letter. Absent fields are left untouched.
///
/// `status` stays a raw string so unknown values surface as validation
/// errors instead of body rejections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LetterPatch {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub type_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

impl LetterPatch {
    /// Whether the patch touches the requester or letter type.
    pub fn touches_ownership(&self) -> bool {
        self.user_id.is_some_and(|id| id != 0) || self.type_id.is_some_and(|id| id != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter() -> Letter {
        let now = Utc::now();
        Letter {
            id: 1,
            user_id: 2,
            type_id: 3,
            status: LetterStatus::Pending,
            reject_reason: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_parse() {
        assert_eq!("accepted".parse::<LetterStatus>().unwrap(), LetterStatus::Accepted);
        assert!("archived".parse::<LetterStatus>().is_err());
    }

    #[test]
    fn reject_sets_reason_and_accept_clears_it() {
        let mut l = letter();
        l.set_status(LetterStatus::Rejected, Some("incomplete".into()));
        assert_eq!(l.reject_reason, "incomplete");

        l.set_status(LetterStatus::Accepted, Some("ignored".into()));
        assert_eq!(l.status, LetterStatus::Accepted);
        assert!(l.reject_reason.is_empty());
    }

    #[test]
    fn zero_ids_do_not_count_as_ownership_change() {
        let patch = LetterPatch {
            user_id: Some(0),
            type_id: Some(0),
            ..Default::default()
        };
        assert!(!patch.touches_ownership());

        let patch = LetterPatch {
            type_id: Some(4),
            ..Default::default()
        };
        assert!(patch.touches_ownership());
    }
}
