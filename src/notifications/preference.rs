//! Per-account notification preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::ChannelKind;

/// Where and whether an account wants to be notified.
///
/// A channel counts as enabled only when its flag is set and its address is
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPreference {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "telegram_chatid")]
    pub telegram_chat_id: String,
    pub wa_number: String,
    pub allow_telegram: bool,
    pub allow_wa: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    /// Channels that are switched on and have an address, with that address.
    pub fn enabled_destinations(&self) -> Vec<(ChannelKind, &str)> {
        let mut out = Vec::with_capacity(2);
        if self.allow_telegram && !self.telegram_chat_id.trim().is_empty() {
            out.push((ChannelKind::Telegram, self.telegram_chat_id.trim()));
        }
        if self.allow_wa && !self.wa_number.trim().is_empty() {
            out.push((ChannelKind::WhatsApp, self.wa_number.trim()));
        }
        out
    }
}

/// Create-preference payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPreference {
    pub user_id: i64,
    #[serde(default, rename = "telegram_chatid")]
    pub telegram_chat_id: String,
    #[serde(default)]
    pub wa_number: String,
    #[serde(default, deserialize_with = "flag")]
    pub allow_telegram: bool,
    #[serde(default, deserialize_with = "flag")]
    pub allow_wa: bool,
}

/// Update-preference payload. Replaces all four fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferenceUpdate {
    #[serde(default, rename = "telegram_chatid")]
    pub telegram_chat_id: String,
    #[serde(default)]
    pub wa_number: String,
    #[serde(default, deserialize_with = "flag")]
    pub allow_telegram: bool,
    #[serde(default, deserialize_with = "flag")]
    pub allow_wa: bool,
}

/// Accepts JSON booleans as well as `"yes"`/`"no"` strings.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(t) => match t.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(true),
            "no" | "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected yes/no, got {other:?}"
            ))),
        },
    }
}
