//! Access gate: bearer credential authentication and role authorization.

pub mod password;
pub mod token;

use crate::accounts::Role;
use crate::error::ApiError;

pub use token::{Claims, TokenError, TokenSigner};

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub account_id: i64,
    pub role: Role,
}

/// Derives identities from bearer credentials and enforces role policies.
#[derive(Clone)]
pub struct AccessGate {
    signer: TokenSigner,
}

impl AccessGate {
    pub fn new(signer: TokenSigner) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Authenticate an `Authorization` header value of the form `Bearer <token>`.
    pub fn authenticate(&self, header: Option<&str>) -> Result<Identity, ApiError> {
        let header = header
            .ok_or_else(|| ApiError::Authentication("Authorization header missing".into()))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Authentication("Invalid Authorization header format".into())
        })?;

        let claims = self.signer.verify(token.trim()).map_err(|e| {
            tracing::debug!(error = %e, "Bearer token refused");
            ApiError::Authentication("Invalid token".into())
        })?;

        Ok(Identity {
            account_id: claims.id,
            role: claims.role,
        })
    }

    /// Enforce a role policy. `None` admits any authenticated caller.
    pub fn authorize(role: Role, required: Option<Role>) -> Result<(), ApiError> {
        match required {
            None => Ok(()),
            Some(required) if required == role => Ok(()),
            Some(required) => Err(ApiError::Forbidden(format!(
                "This endpoint requires the {required} role"
            ))),
        }
    }
}
