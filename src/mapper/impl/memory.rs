//! In-memory message store

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::mapper::{MessageMapper, MessageMapperFactory};
use crate::types::*;

type Messages = HashMap<MailboxId, BTreeMap<MessageUid, MailboxMessage>>;

/// Message store shared by all the mappers it creates
#[derive(Clone, Default)]
pub struct InMemoryMessageMapperFactory {
    messages: Arc<RwLock<Messages>>,
}

impl InMemoryMessageMapperFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, message: MailboxMessage) {
        self.messages
            .write()
            .await
            .entry(message.mailbox_id)
            .or_default()
            .insert(message.uid, message);
    }

    pub async fn expunge(&self, mailbox_id: MailboxId, uid: MessageUid) -> Result<MailboxMessage> {
        self.messages
            .write()
            .await
            .get_mut(&mailbox_id)
            .and_then(|messages| messages.remove(&uid))
            .ok_or_else(|| Error::NotFound(format!("Message {} not found in mailbox {}", uid, mailbox_id)))
    }

    pub async fn count(&self, mailbox_id: MailboxId) -> usize {
        self.messages
            .read()
            .await
            .get(&mailbox_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

struct InMemoryMessageMapper {
    messages: Arc<RwLock<Messages>>,
}

#[async_trait]
impl MessageMapper for InMemoryMessageMapper {
    async fn find_in_mailbox(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
        _fetch_type: FetchType,
        limit: Option<usize>,
    ) -> Result<Vec<MailboxMessage>> {
        let messages = self.messages.read().await;
        let Some(mailbox_messages) = messages.get(&mailbox.id) else {
            return Ok(Vec::new());
        };

        Ok(mailbox_messages
            .values()
            .filter(|message| range.includes(message.uid))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

impl MessageMapperFactory for InMemoryMessageMapperFactory {
    fn message_mapper(&self, _session: &MailboxSession) -> Result<Arc<dyn MessageMapper>> {
        Ok(Arc::new(InMemoryMessageMapper {
            messages: self.messages.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(mailbox: &Mailbox, uid: u64) -> MailboxMessage {
        MailboxMessage {
            mailbox_id: mailbox.id,
            uid: MessageUid::of(uid),
            flags: vec![],
            internal_date: Utc::now(),
            size: 10,
            from: "bob@example.com".to_string(),
            to: "alice@example.com".to_string(),
            subject: "Test".to_string(),
            body: "Test body".to_string(),
        }
    }

    #[tokio::test]
    async fn test_find_by_range_and_limit() {
        let factory = InMemoryMessageMapperFactory::new();
        let mailbox = Mailbox::new(MailboxPath::inbox("alice"), 1);
        for uid in [1, 2, 5, 9] {
            factory.append(message(&mailbox, uid)).await;
        }
        let mapper = factory.message_mapper(&MailboxSession::new("alice")).unwrap();

        let one = mapper
            .find_in_mailbox(&mailbox, MessageRange::One(MessageUid::of(5)), FetchType::Full, Some(1))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].uid, MessageUid::of(5));

        let from = mapper
            .find_in_mailbox(&mailbox, MessageRange::From(MessageUid::of(2)), FetchType::Metadata, Some(2))
            .await
            .unwrap();
        let uids: Vec<u64> = from.iter().map(|m| m.uid.as_u64()).collect();
        assert_eq!(uids, vec![2, 5]);

        let missing = mapper
            .find_in_mailbox(&mailbox, MessageRange::One(MessageUid::of(3)), FetchType::Full, Some(1))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_expunge() {
        let factory = InMemoryMessageMapperFactory::new();
        let mailbox = Mailbox::new(MailboxPath::inbox("alice"), 1);
        factory.append(message(&mailbox, 1)).await;

        assert_eq!(factory.expunge(mailbox.id, MessageUid::of(1)).await.unwrap().uid, MessageUid::of(1));
        assert_eq!(factory.count(mailbox.id).await, 0);
        assert!(factory.expunge(mailbox.id, MessageUid::of(1)).await.is_err());
    }
}
