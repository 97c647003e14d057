//! Mailbus - mailbox event dispatch for a mail server
//!
//! This library provides the event bus routing mailbox state changes to
//! registered listeners with ordered, retried delivery, along with the two
//! listeners built on it: a search index maintainer and the MSN/UID view of
//! a selected mailbox.

pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod mapper;
pub mod selected;
pub mod types;
pub mod uid_msn;

pub use config::{Configuration, IndexerConfiguration, IndexerDeployment};
pub use error::{Error, Result};
pub use events::{
    Event, EventBus, EventDeadLetters, EventId, EventKind, EventPayload, ExecutionMode, Group, GroupMailboxListener,
    GroupName, GroupRegistry, MailboxListener, MemoryEventDeadLetters, Registration, RegistrationKey, RetryBackOffDeliver,
    RetryBackoffConfiguration,
};
pub use index::{ListeningMessageSearchIndex, MessageIndexer};
pub use mapper::{MessageMapper, MessageMapperFactory};
pub use selected::SelectedMailbox;
pub use types::*;
pub use uid_msn::UidMsnConverter;
