//! The delivery side of a fired reminder.
//!
//! A scheduled job never holds a live connection or request object across
//! its waiting period; it carries a [`ConversationId`] and resolves it
//! against the host application's [`Notifier`] at fire time.

use async_trait::async_trait;

/// Addressable reference to the conversation a reminder belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message-delivery channel supplied by the host application.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn push_text(&self, conversation: &ConversationId, text: &str) -> anyhow::Result<()>;
}
