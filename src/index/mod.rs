//! Search index maintenance
//!
//! [`MessageIndexer`] is the write (and query) surface of a search index
//! backend. [`ListeningMessageSearchIndex`] is the event listener keeping
//! such a backend consistent with mailbox mutations.

use async_trait::async_trait;
use crate::error::Result;
use crate::types::*;

pub mod listening;
pub mod r#impl;

pub use listening::ListeningMessageSearchIndex;

/// Trait for search index backends
#[async_trait]
pub trait MessageIndexer: Send + Sync {
    /// Index a message, replacing a previous version with the same UID
    async fn add(&self, session: &MailboxSession, mailbox: &Mailbox, message: &MailboxMessage) -> Result<()>;

    /// Remove messages from the index of a mailbox
    async fn delete(&self, session: &MailboxSession, mailbox_id: MailboxId, uids: &[MessageUid]) -> Result<()>;

    /// Remove everything indexed for a mailbox
    async fn delete_all(&self, session: &MailboxSession, mailbox_id: MailboxId) -> Result<()>;

    /// Apply flag changes
    async fn update(&self, session: &MailboxSession, mailbox_id: MailboxId, updated_flags: &[UpdatedFlags]) -> Result<()>;

    /// UIDs of the messages of a mailbox matching the query, ascending
    async fn search(&self, session: &MailboxSession, mailbox_id: MailboxId, query: &SearchQuery) -> Result<Vec<MessageUid>>;
}

/// Indexed view of a message
#[derive(Debug, Clone)]
pub struct IndexedMessage {
    pub uid: MessageUid,
    pub mailbox_id: MailboxId,
    pub flags: Vec<MessageFlag>,
    pub internal_date: chrono::DateTime<chrono::Utc>,
    pub size: usize,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl From<&MailboxMessage> for IndexedMessage {
    fn from(message: &MailboxMessage) -> Self {
        Self {
            uid: message.uid,
            mailbox_id: message.mailbox_id,
            flags: message.flags.clone(),
            internal_date: message.internal_date,
            size: message.size,
            from: message.from.clone(),
            to: message.to.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
        }
    }
}
