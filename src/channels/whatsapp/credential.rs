//! File-backed store for the paired device credential.

use std::path::{Path, PathBuf};

use crate::channels::whatsapp::DeviceCredential;
use crate::error::SessionError;

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the store can be read and written.
    ///
    /// Fails with `FatalInit` when the directory cannot be created or an
    /// existing credential file cannot be read.
    pub async fn ensure_usable(&self) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SessionError::FatalInit(format!(
                    "cannot create credential directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_dir() => Err(SessionError::FatalInit(format!(
                "credential path {} is a directory",
                self.path.display()
            ))),
            Ok(_) => self
                .load()
                .await
                .map(|_| ())
                .map_err(|e| SessionError::FatalInit(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::FatalInit(format!(
                "cannot access {}: {e}",
                self.path.display()
            ))),
        }
    }

    pub async fn load(&self) -> Result<Option<DeviceCredential>, SessionError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::CredentialStore(e.to_string())),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| {
                SessionError::CredentialStore(format!(
                    "corrupt credential file {}: {e}",
                    self.path.display()
                ))
            })
    }

    /// Persist atomically (write to a sibling temp file, then rename).
    pub async fn save(&self, credential: &DeviceCredential) -> Result<(), SessionError> {
        let json = serde_json::to_vec_pretty(credential)
            .map_err(|e| SessionError::CredentialStore(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| SessionError::CredentialStore(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SessionError::CredentialStore(e.to_string()))
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::CredentialStore(e.to_string())),
        }
    }
}
