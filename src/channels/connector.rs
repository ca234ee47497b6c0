//! The `ChannelConnector` capability and the registry of active connectors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// External communication channels a notification can travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    WhatsApp,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::WhatsApp => "whatsapp",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound side of a notification channel.
///
/// One call is one delivery attempt; implementations do not retry.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Deliver `text` to `destination` (a chat id, phone number, ...).
    async fn send(&self, destination: &str, text: &str) -> Result<(), ChannelError>;
}

/// The set of connectors configured for this process, keyed by kind.
#[derive(Clone, Default)]
pub struct ChannelManager {
    connectors: HashMap<ChannelKind, Arc<dyn ChannelConnector>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector, replacing any previous one of the same kind.
    pub fn add(&mut self, connector: Arc<dyn ChannelConnector>) {
        self.connectors.insert(connector.kind(), connector);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn ChannelConnector>> {
        self.connectors.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<ChannelKind> = self.connectors.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null(ChannelKind);

    #[async_trait]
    impl ChannelConnector for Null {
        fn kind(&self) -> ChannelKind {
            self.0
        }
        async fn send(&self, _destination: &str, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[test]
    fn manager_registers_by_kind() {
        let mut m = ChannelManager::new();
        assert!(m.is_empty());
        m.add(Arc::new(Null(ChannelKind::WhatsApp)));
        m.add(Arc::new(Null(ChannelKind::Telegram)));
        m.add(Arc::new(Null(ChannelKind::Telegram)));
        assert_eq!(m.kinds(), vec![ChannelKind::Telegram, ChannelKind::WhatsApp]);
        assert!(m.get(ChannelKind::Telegram).is_some());
    }

    #[test]
    fn kind_display() {
        assert_eq!(ChannelKind::WhatsApp.to_string(), "whatsapp");
        assert_eq!(
            serde_json::to_string(&ChannelKind::Telegram).unwrap(),
            "\"telegram\""
        );
    }
}
