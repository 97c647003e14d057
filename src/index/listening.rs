//! Event listener keeping a search index consistent with mailboxes
//!
//! Each mailbox event is translated into index mutations:
//!
//! - `Added`: every added message is indexed. The copy carried by the event
//!   is used when present, otherwise the message is fetched from the store.
//! - `Expunged`: the UIDs are deleted from the index of the mailbox.
//! - `FlagsUpdated`: the flag changes are pushed to the index.
//! - `MailboxDeletion`: the whole index of the mailbox is dropped.
//!
//! Failures are logged and contained: a message that cannot be fetched or
//! indexed is skipped, the rest of its batch still goes through, and the
//! listener never fails an event (so it is never retried for an index
//! problem that would only fail again).

use async_trait::async_trait;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{IndexerConfiguration, IndexerDeployment};
use crate::error::{Error, Result};
use crate::events::group::{Group, GroupName};
use crate::events::listener::{ExecutionMode, GroupMailboxListener, MailboxListener};
use crate::events::{Event, EventPayload};
use crate::index::MessageIndexer;
use crate::mapper::MessageMapperFactory;
use crate::types::*;

pub struct ListeningMessageSearchIndex {
    mapper_factory: Arc<dyn MessageMapperFactory>,
    indexer: Arc<dyn MessageIndexer>,
    group: Group,
    execution_mode: ExecutionMode,
}

impl ListeningMessageSearchIndex {
    /// Asynchronous listener with one consumer per cluster
    pub fn new(mapper_factory: Arc<dyn MessageMapperFactory>, indexer: Arc<dyn MessageIndexer>) -> Self {
        Self {
            mapper_factory,
            indexer,
            group: Self::base_group(),
            execution_mode: ExecutionMode::Asynchronous,
        }
    }

    pub fn with_configuration(
        mapper_factory: Arc<dyn MessageMapperFactory>,
        indexer: Arc<dyn MessageIndexer>,
        configuration: &IndexerConfiguration,
    ) -> Result<Self> {
        configuration.validate()?;
        let group = match (configuration.deployment, configuration.node_id.as_deref()) {
            (IndexerDeployment::Once, _) => Self::base_group(),
            (IndexerDeployment::EachNode, Some(node_id)) => {
                Group::generic(format!("{}-{}", Self::base_group().as_string(), node_id))
            }
            (IndexerDeployment::EachNode, None) => {
                return Err(Error::Config("indexer.node_id is missing".to_string()));
            }
        };

        Ok(Self {
            mapper_factory,
            indexer,
            group,
            execution_mode: configuration.execution,
        })
    }

    /// Group of the cluster wide deployment
    pub fn base_group() -> Group {
        Group::of::<ListeningMessageSearchIndex>()
    }

    pub fn indexer(&self) -> Arc<dyn MessageIndexer> {
        self.indexer.clone()
    }

    async fn handle_added(
        &self,
        event: &Event,
        added: &[MessageMetaData],
        preloaded: &HashMap<MessageUid, MailboxMessage>,
    ) {
        for metadata in added {
            let message = match preloaded.get(&metadata.uid) {
                Some(message) => message.clone(),
                None => match self.fetch(event, metadata.uid).await {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        warn!(
                            "Message {} of mailbox {} not found, not indexed",
                            metadata.uid, event.mailbox.id
                        );
                        continue;
                    }
                    Err(e) => {
                        error!(
                            "Unable to fetch message {} of mailbox {} for indexing: {}",
                            metadata.uid, event.mailbox.id, e
                        );
                        continue;
                    }
                },
            };

            if let Err(e) = self.indexer.add(&event.session, &event.mailbox, &message).await {
                error!(
                    "Unable to index message {} of mailbox {}: {}",
                    metadata.uid, event.mailbox.id, e
                );
            }
        }
    }

    async fn fetch(&self, event: &Event, uid: MessageUid) -> Result<Option<MailboxMessage>> {
        let mapper = self.mapper_factory.message_mapper(&event.session)?;
        let messages = mapper
            .find_in_mailbox(&event.mailbox, MessageRange::One(uid), FetchType::Full, Some(1))
            .await?;
        Ok(messages.into_iter().next())
    }
}

#[async_trait]
impl MailboxListener for ListeningMessageSearchIndex {
    async fn event(&self, event: &Event) -> Result<()> {
        let mailbox_id = event.mailbox.id;
        debug!("Indexing {} event {} of mailbox {}", event.kind(), event.id, mailbox_id);

        match &event.payload {
            EventPayload::Added { added, messages } => {
                self.handle_added(event, added, messages).await;
            }
            EventPayload::Expunged { expunged } => {
                let uids: Vec<MessageUid> = expunged.iter().map(|m| m.uid).collect();
                if let Err(e) = self.indexer.delete(&event.session, mailbox_id, &uids).await {
                    error!(
                        "Unable to delete messages {:?} from index of mailbox {}: {}",
                        uids, mailbox_id, e
                    );
                }
            }
            EventPayload::FlagsUpdated { updated_flags } => {
                if let Err(e) = self.indexer.update(&event.session, mailbox_id, updated_flags).await {
                    error!("Unable to update flags in index of mailbox {}: {}", mailbox_id, e);
                }
            }
            EventPayload::MailboxDeletion { .. } => {
                if let Err(e) = self.indexer.delete_all(&event.session, mailbox_id).await {
                    error!("Unable to delete index of mailbox {}: {}", mailbox_id, e);
                }
            }
            EventPayload::MailboxAdded | EventPayload::MailboxRenamed { .. } => {}
        }
        Ok(())
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }
}

impl GroupName for ListeningMessageSearchIndex {
    const GROUP_NAME: &'static str = "mailbus.index.ListeningMessageSearchIndex";
}

impl GroupMailboxListener for ListeningMessageSearchIndex {
    fn default_group(&self) -> Group {
        self.group.clone()
    }
}
