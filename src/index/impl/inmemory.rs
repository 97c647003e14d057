//! In-memory search index
//!
//! Writes are funnelled through a single writer loop so that they apply in
//! submission order. Searches read the shared state directly.

use async_trait::async_trait;
use futures::channel::oneshot;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::index::{IndexedMessage, MessageIndexer};
use crate::types::*;

type IndexState = HashMap<MailboxId, BTreeMap<MessageUid, IndexedMessage>>;

/// Write commands for the index (only writes go through the channel)
enum WriteCommand {
    Add(IndexedMessage, oneshot::Sender<Result<()>>),
    Delete(MailboxId, Vec<MessageUid>, oneshot::Sender<Result<()>>),
    DeleteAll(MailboxId, oneshot::Sender<Result<()>>),
    Update(MailboxId, Vec<UpdatedFlags>, oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

pub struct InMemoryMessageIndexer {
    state: Arc<RwLock<IndexState>>,
    write_tx: Sender<WriteCommand>,
}

impl InMemoryMessageIndexer {
    /// Create the index and spawn its writer loop
    pub fn new() -> Self {
        let state = Arc::new(RwLock::new(HashMap::new()));
        let (write_tx, write_rx) = channel(100);
        tokio::spawn(writer_loop(write_rx, state.clone()));
        Self { state, write_tx }
    }

    async fn write(&self, command: impl FnOnce(oneshot::Sender<Result<()>>) -> WriteCommand) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.write_tx
            .send(command(tx))
            .await
            .map_err(|_| Error::Internal("Index writer loop stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("Index writer loop dropped reply".to_string()))?
    }

    /// Number of indexed messages of a mailbox
    pub async fn count(&self, mailbox_id: MailboxId) -> usize {
        self.state
            .read()
            .await
            .get(&mailbox_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub async fn get(&self, mailbox_id: MailboxId, uid: MessageUid) -> Option<IndexedMessage> {
        self.state
            .read()
            .await
            .get(&mailbox_id)
            .and_then(|messages| messages.get(&uid))
            .cloned()
    }

    /// Shutdown the writer loop gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.write_tx.send(WriteCommand::Shutdown(tx)).await;
        let _ = rx.await;
        Ok(())
    }
}

impl Default for InMemoryMessageIndexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer loop that processes write commands serially
async fn writer_loop(mut rx: Receiver<WriteCommand>, state: Arc<RwLock<IndexState>>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriteCommand::Add(message, reply) => {
                let mut state = state.write().await;
                state
                    .entry(message.mailbox_id)
                    .or_default()
                    .insert(message.uid, message);
                let _ = reply.send(Ok(()));
            }
            WriteCommand::Delete(mailbox_id, uids, reply) => {
                let mut state = state.write().await;
                if let Some(messages) = state.get_mut(&mailbox_id) {
                    for uid in &uids {
                        messages.remove(uid);
                    }
                }
                let _ = reply.send(Ok(()));
            }
            WriteCommand::DeleteAll(mailbox_id, reply) => {
                state.write().await.remove(&mailbox_id);
                let _ = reply.send(Ok(()));
            }
            WriteCommand::Update(mailbox_id, updated_flags, reply) => {
                let mut state = state.write().await;
                if let Some(messages) = state.get_mut(&mailbox_id) {
                    // Flags of messages unknown to the index are dropped
                    for updated in updated_flags {
                        if let Some(message) = messages.get_mut(&updated.uid) {
                            message.flags = updated.new_flags;
                        }
                    }
                }
                let _ = reply.send(Ok(()));
            }
            WriteCommand::Shutdown(reply) => {
                let _ = reply.send(());
                break;
            }
        }
    }
}

#[async_trait]
impl MessageIndexer for InMemoryMessageIndexer {
    async fn add(&self, _session: &MailboxSession, mailbox: &Mailbox, message: &MailboxMessage) -> Result<()> {
        let mut indexed = IndexedMessage::from(message);
        indexed.mailbox_id = mailbox.id;
        self.write(|reply| WriteCommand::Add(indexed, reply)).await
    }

    async fn delete(&self, _session: &MailboxSession, mailbox_id: MailboxId, uids: &[MessageUid]) -> Result<()> {
        let uids = uids.to_vec();
        self.write(|reply| WriteCommand::Delete(mailbox_id, uids, reply)).await
    }

    async fn delete_all(&self, _session: &MailboxSession, mailbox_id: MailboxId) -> Result<()> {
        self.write(|reply| WriteCommand::DeleteAll(mailbox_id, reply)).await
    }

    async fn update(&self, _session: &MailboxSession, mailbox_id: MailboxId, updated_flags: &[UpdatedFlags]) -> Result<()> {
        let updated_flags = updated_flags.to_vec();
        self.write(|reply| WriteCommand::Update(mailbox_id, updated_flags, reply))
            .await
    }

    async fn search(&self, _session: &MailboxSession, mailbox_id: MailboxId, query: &SearchQuery) -> Result<Vec<MessageUid>> {
        let state = self.state.read().await;
        Ok(state
            .get(&mailbox_id)
            .map(|messages| {
                messages
                    .values()
                    .filter(|message| matches_query(message, query))
                    .map(|message| message.uid)
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn matches_query(message: &IndexedMessage, query: &SearchQuery) -> bool {
    match query {
        SearchQuery::All => true,
        SearchQuery::From(s) => message.from.contains(s),
        SearchQuery::To(s) => message.to.contains(s),
        SearchQuery::Subject(s) => message.subject.contains(s),
        SearchQuery::Body(s) => message.body.contains(s),
        SearchQuery::Text(s) => {
            message.from.contains(s)
                || message.to.contains(s)
                || message.subject.contains(s)
                || message.body.contains(s)
        }
        SearchQuery::Uid(uids) => uids.contains(&message.uid),
        SearchQuery::Seen => message.flags.contains(&MessageFlag::Seen),
        SearchQuery::Unseen => !message.flags.contains(&MessageFlag::Seen),
        SearchQuery::Flagged => message.flags.contains(&MessageFlag::Flagged),
        SearchQuery::Unflagged => !message.flags.contains(&MessageFlag::Flagged),
        SearchQuery::Deleted => message.flags.contains(&MessageFlag::Deleted),
        SearchQuery::Undeleted => !message.flags.contains(&MessageFlag::Deleted),
        SearchQuery::And(q1, q2) => matches_query(message, q1) && matches_query(message, q2),
        SearchQuery::Or(q1, q2) => matches_query(message, q1) || matches_query(message, q2),
        SearchQuery::Not(q) => !matches_query(message, q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(mailbox: &Mailbox, uid: u64, subject: &str) -> MailboxMessage {
        MailboxMessage {
            mailbox_id: mailbox.id,
            uid: MessageUid::of(uid),
            flags: vec![],
            internal_date: Utc::now(),
            size: 100,
            from: "bob@example.com".to_string(),
            to: "alice@example.com".to_string(),
            subject: subject.to_string(),
            body: "Test body".to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_and_search() {
        let index = InMemoryMessageIndexer::new();
        let session = MailboxSession::new("alice");
        let mailbox = Mailbox::new(MailboxPath::inbox("alice"), 1);

        index.add(&session, &mailbox, &message(&mailbox, 1, "Important")).await.unwrap();
        index.add(&session, &mailbox, &message(&mailbox, 2, "Newsletter")).await.unwrap();

        let results = index
            .search(&session, mailbox.id, &SearchQuery::Subject("Important".to_string()))
            .await
            .unwrap();
        assert_eq!(results, vec![MessageUid::of(1)]);

        let not_important = SearchQuery::Not(Box::new(SearchQuery::Subject("Important".to_string())));
        let results = index.search(&session, mailbox.id, &not_important).await.unwrap();
        assert_eq!(results, vec![MessageUid::of(2)]);

        index.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mailboxes_are_isolated() {
        let index = InMemoryMessageIndexer::new();
        let session = MailboxSession::new("alice");
        let inbox = Mailbox::new(MailboxPath::inbox("alice"), 1);
        let sent = Mailbox::new(MailboxPath::for_user("alice", "Sent"), 2);

        index.add(&session, &inbox, &message(&inbox, 1, "a")).await.unwrap();
        index.add(&session, &sent, &message(&sent, 1, "b")).await.unwrap();
        index.delete_all(&session, inbox.id).await.unwrap();

        assert_eq!(index.count(inbox.id).await, 0);
        assert_eq!(index.count(sent.id).await, 1);
        index.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_flags_and_delete() {
        let index = InMemoryMessageIndexer::new();
        let session = MailboxSession::new("alice");
        let mailbox = Mailbox::new(MailboxPath::inbox("alice"), 1);
        index.add(&session, &mailbox, &message(&mailbox, 1, "a")).await.unwrap();
        index.add(&session, &mailbox, &message(&mailbox, 2, "b")).await.unwrap();

        let updates = vec![
            UpdatedFlags {
                uid: MessageUid::of(1),
                old_flags: vec![],
                new_flags: vec![MessageFlag::Flagged],
            },
            UpdatedFlags {
                uid: MessageUid::of(99),
                old_flags: vec![],
                new_flags: vec![MessageFlag::Flagged],
            },
        ];
        index.update(&session, mailbox.id, &updates).await.unwrap();

        let flagged = index.search(&session, mailbox.id, &SearchQuery::Flagged).await.unwrap();
        assert_eq!(flagged, vec![MessageUid::of(1)]);
        assert_eq!(
            index.get(mailbox.id, MessageUid::of(1)).await.map(|m| m.flags),
            Some(vec![MessageFlag::Flagged])
        );

        index.delete(&session, mailbox.id, &[MessageUid::of(1)]).await.unwrap();
        let all = index.search(&session, mailbox.id, &SearchQuery::All).await.unwrap();
        assert_eq!(all, vec![MessageUid::of(2)]);
        index.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_after_shutdown_fails() {
        let index = InMemoryMessageIndexer::new();
        index.shutdown().await.unwrap();

        let session = MailboxSession::new("alice");
        let mailbox = Mailbox::new(MailboxPath::inbox("alice"), 1);
        let result = index.add(&session, &mailbox, &message(&mailbox, 1, "late")).await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
