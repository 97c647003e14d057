//! Storage for events whose group delivery was abandoned
//!
//! When retries are exhausted for a group listener, the event is kept here
//! under the group so an operator can inspect it and redeliver it with
//! [`EventBus::redeliver`](crate::events::bus::EventBus::redeliver).

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::events::group::Group;
use crate::events::Event;

/// Identifier of one stored failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsertionId(pub Uuid);

impl InsertionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

#[async_trait]
pub trait EventDeadLetters: Send + Sync {
    async fn store(&self, group: &Group, event: &Event) -> Result<InsertionId>;

    async fn remove(&self, group: &Group, id: InsertionId) -> Result<()>;

    async fn failed_event(&self, group: &Group, id: InsertionId) -> Result<Option<Event>>;

    async fn failed_events(&self, group: &Group) -> Result<Vec<(InsertionId, Event)>>;

    async fn groups_with_failed_events(&self) -> Result<Vec<Group>>;

    async fn contains(&self, group: &Group) -> Result<bool> {
        Ok(!self.failed_events(group).await?.is_empty())
    }
}

/// In-memory dead letters
#[derive(Default)]
pub struct MemoryEventDeadLetters {
    letters: RwLock<HashMap<Group, BTreeMap<InsertionId, Event>>>,
}

impl MemoryEventDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventDeadLetters for MemoryEventDeadLetters {
    async fn store(&self, group: &Group, event: &Event) -> Result<InsertionId> {
        let id = InsertionId::random();
        self.letters
            .write()
            .await
            .entry(group.clone())
            .or_default()
            .insert(id, event.clone());
        Ok(id)
    }

    async fn remove(&self, group: &Group, id: InsertionId) -> Result<()> {
        let mut letters = self.letters.write().await;
        if let Some(events) = letters.get_mut(group) {
            events.remove(&id);
            if events.is_empty() {
                letters.remove(group);
            }
        }
        Ok(())
    }

    async fn failed_event(&self, group: &Group, id: InsertionId) -> Result<Option<Event>> {
        Ok(self
            .letters
            .read()
            .await
            .get(group)
            .and_then(|events| events.get(&id))
            .cloned())
    }

    async fn failed_events(&self, group: &Group) -> Result<Vec<(InsertionId, Event)>> {
        Ok(self
            .letters
            .read()
            .await
            .get(group)
            .map(|events| events.iter().map(|(id, event)| (*id, event.clone())).collect())
            .unwrap_or_default())
    }

    async fn groups_with_failed_events(&self) -> Result<Vec<Group>> {
        let mut groups: Vec<Group> = self.letters.read().await.keys().cloned().collect();
        groups.sort();
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mailbox, MailboxPath, MailboxSession};

    fn event() -> Event {
        Event::mailbox_added(MailboxSession::new("alice"), Mailbox::new(MailboxPath::inbox("alice"), 1))
    }

    #[tokio::test]
    async fn test_store_and_remove() {
        let dead_letters = MemoryEventDeadLetters::new();
        let group = Group::generic("quota");
        let event = event();

        let id = dead_letters.store(&group, &event).await.unwrap();
        assert!(dead_letters.contains(&group).await.unwrap());
        assert_eq!(dead_letters.failed_event(&group, id).await.unwrap().map(|e| e.id), Some(event.id));
        assert_eq!(dead_letters.groups_with_failed_events().await.unwrap(), vec![group.clone()]);

        dead_letters.remove(&group, id).await.unwrap();
        assert!(!dead_letters.contains(&group).await.unwrap());
        assert!(dead_letters.groups_with_failed_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let dead_letters = MemoryEventDeadLetters::new();
        let quota = Group::generic("quota");
        let index = Group::generic("index");

        dead_letters.store(&quota, &event()).await.unwrap();
        dead_letters.store(&quota, &event()).await.unwrap();
        dead_letters.store(&index, &event()).await.unwrap();

        assert_eq!(dead_letters.failed_events(&quota).await.unwrap().len(), 2);
        assert_eq!(dead_letters.failed_events(&index).await.unwrap().len(), 1);
        assert!(dead_letters.failed_events(&Group::generic("other")).await.unwrap().is_empty());
    }
}
