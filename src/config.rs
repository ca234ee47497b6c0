//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen port.
    pub port: u16,
    /// libSQL database file.
    pub database_path: PathBuf,
    /// Signing secret for bearer tokens.
    pub jwt_secret: SecretString,
    /// Bearer token lifetime.
    pub token_ttl: Duration,
    /// Telegram bot token (Telegram notifications disabled when unset).
    pub telegram_token: Option<SecretString>,
    /// WhatsApp session channel settings (disabled when the bridge URL is unset).
    pub whatsapp: Option<WhatsAppConfig>,
    /// Notification dispatch settings.
    pub dispatch: DispatchConfig,
    /// Optional administrator created on first start.
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// WhatsApp paired-device channel settings.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    /// Base URL of the pairing bridge.
    pub bridge_url: String,
    /// Where the paired device credential is persisted.
    pub credential_path: PathBuf,
    /// Where the current pairing code is written for out-of-band scanning.
    pub pairing_file: PathBuf,
    /// How long a pairing code stays valid before a new one is issued.
    pub pairing_timeout: Duration,
}

/// Bounded dispatch queue settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub max_concurrent: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrent: 8,
        }
    }
}

/// Administrator account seeded at startup.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub name: String,
    pub email: String,
    pub password: SecretString,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".into()))?;

        let port = parse_env("PORT", 8080u16)?;
        let token_ttl_hours = parse_env("TOKEN_TTL_HOURS", 24u64)?;

        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/letter-desk.db"));

        let telegram_token = std::env::var("TELEGRAM_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let whatsapp = match std::env::var("WHATSAPP_BRIDGE_URL") {
            Ok(bridge_url) if !bridge_url.is_empty() => Some(WhatsAppConfig {
                bridge_url,
                credential_path: std::env::var("WHATSAPP_CREDENTIAL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./data/whatsapp-device.json")),
                pairing_file: std::env::var("WHATSAPP_PAIRING_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./data/wa_login_qr.svg")),
                pairing_timeout: Duration::from_secs(parse_env(
                    "WHATSAPP_PAIRING_TIMEOUT_SECS",
                    60u64,
                )?),
            }),
            _ => None,
        };

        let dispatch = DispatchConfig {
            queue_capacity: parse_env("DISPATCH_QUEUE_CAPACITY", 256usize)?.max(1),
            max_concurrent: parse_env("DISPATCH_MAX_CONCURRENT", 8usize)?.max(1),
        };

        let bootstrap_admin = match (
            std::env::var("ADMIN_EMAIL").ok(),
            std::env::var("ADMIN_PASSWORD").ok(),
        ) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Some(BootstrapAdmin {
                    name: std::env::var("ADMIN_NAME").unwrap_or_else(|_| "Administrator".into()),
                    email,
                    password: SecretString::from(password),
                })
            }
            _ => None,
        };

        Ok(Self {
            port,
            database_path,
            jwt_secret: SecretString::from(jwt_secret),
            token_ttl: Duration::from_secs(token_ttl_hours * 3600),
            telegram_token,
            whatsapp,
            dispatch,
            bootstrap_admin,
        })
    }
}

/// Parse an optional env var, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
