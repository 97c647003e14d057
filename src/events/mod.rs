//! Mailbox events and the bus that dispatches them
//!
//! An [`Event`] is an immutable fact about one mailbox of one session. The
//! mailbox layer builds it once a mutation is committed and hands it to the
//! [`EventBus`](bus::EventBus), which routes it to:
//!
//! - every listener registered under one of the dispatched
//!   [`RegistrationKey`](registration::RegistrationKey)s (fan-out, dynamic,
//!   typically one per IMAP session), and
//! - every listener bound to a [`Group`](group::Group) (durable consumer
//!   topology, one listener per group).
//!
//! Each delivery goes through [`RetryBackOffDeliver`](retry::RetryBackOffDeliver).
//! Deliveries to a given listener happen in dispatch order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::Result;
use crate::types::*;

pub mod bus;
pub mod dead_letters;
pub mod group;
pub mod listener;
pub mod registration;
pub mod retry;

pub use bus::{BusState, EventBus};
pub use dead_letters::{EventDeadLetters, InsertionId, MemoryEventDeadLetters};
pub use group::{Group, GroupName, GroupRegistry};
pub use listener::{ExecutionMode, GroupMailboxListener, MailboxListener};
pub use registration::{Registration, RegistrationKey};
pub use retry::{DeliveryOutcome, DeliveryReporter, LogReporter, RetryBackOffDeliver, RetryBackoffConfiguration};

/// Unique identifier of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mailbox state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub session: MailboxSession,
    pub mailbox: Mailbox,
    pub payload: EventPayload,
}

/// Type specific content of an [`Event`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    /// Messages were appended, sorted by UID
    Added {
        added: Vec<MessageMetaData>,
        /// Messages already loaded by the mutation, saving listeners a fetch
        #[serde(skip)]
        messages: HashMap<MessageUid, MailboxMessage>,
    },
    /// Messages were expunged, sorted by UID
    Expunged { expunged: Vec<MessageMetaData> },
    FlagsUpdated { updated_flags: Vec<UpdatedFlags> },
    MailboxDeletion {
        deleted_message_count: u64,
        total_deleted_size: u64,
    },
    MailboxAdded,
    MailboxRenamed { new_path: MailboxPath },
}

/// Event kinds, for logging and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Expunged,
    FlagsUpdated,
    MailboxDeletion,
    MailboxAdded,
    MailboxRenamed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Event {
    fn new(session: MailboxSession, mailbox: Mailbox, payload: EventPayload) -> Self {
        Self {
            id: EventId::random(),
            session,
            mailbox,
            payload,
        }
    }

    /// Messages were appended; their full content travels with the event
    pub fn added(session: MailboxSession, mailbox: Mailbox, messages: Vec<MailboxMessage>) -> Self {
        let mut added: Vec<MessageMetaData> = messages.iter().map(MailboxMessage::metadata).collect();
        added.sort_by_key(|m| m.uid);
        let messages = messages.into_iter().map(|m| (m.uid, m)).collect();
        Self::new(session, mailbox, EventPayload::Added { added, messages })
    }

    /// Messages were appended; listeners needing content fetch it themselves
    pub fn added_metadata(session: MailboxSession, mailbox: Mailbox, mut added: Vec<MessageMetaData>) -> Self {
        added.sort_by_key(|m| m.uid);
        Self::new(
            session,
            mailbox,
            EventPayload::Added {
                added,
                messages: HashMap::new(),
            },
        )
    }

    pub fn expunged(session: MailboxSession, mailbox: Mailbox, mut expunged: Vec<MessageMetaData>) -> Self {
        expunged.sort_by_key(|m| m.uid);
        Self::new(session, mailbox, EventPayload::Expunged { expunged })
    }

    pub fn flags_updated(session: MailboxSession, mailbox: Mailbox, updated_flags: Vec<UpdatedFlags>) -> Self {
        Self::new(session, mailbox, EventPayload::FlagsUpdated { updated_flags })
    }

    pub fn mailbox_deletion(
        session: MailboxSession,
        mailbox: Mailbox,
        deleted_message_count: u64,
        total_deleted_size: u64,
    ) -> Self {
        Self::new(
            session,
            mailbox,
            EventPayload::MailboxDeletion {
                deleted_message_count,
                total_deleted_size,
            },
        )
    }

    pub fn mailbox_added(session: MailboxSession, mailbox: Mailbox) -> Self {
        Self::new(session, mailbox, EventPayload::MailboxAdded)
    }

    pub fn mailbox_renamed(session: MailboxSession, mailbox: Mailbox, new_path: MailboxPath) -> Self {
        Self::new(session, mailbox, EventPayload::MailboxRenamed { new_path })
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Added { .. } => EventKind::Added,
            EventPayload::Expunged { .. } => EventKind::Expunged,
            EventPayload::FlagsUpdated { .. } => EventKind::FlagsUpdated,
            EventPayload::MailboxDeletion { .. } => EventKind::MailboxDeletion,
            EventPayload::MailboxAdded => EventKind::MailboxAdded,
            EventPayload::MailboxRenamed { .. } => EventKind::MailboxRenamed,
        }
    }

    /// UIDs referenced by an Added or Expunged event, ascending
    pub fn uids(&self) -> Vec<MessageUid> {
        match &self.payload {
            EventPayload::Added { added, .. } => added.iter().map(|m| m.uid).collect(),
            EventPayload::Expunged { expunged } => expunged.iter().map(|m| m.uid).collect(),
            EventPayload::FlagsUpdated { updated_flags } => updated_flags.iter().map(|u| u.uid).collect(),
            _ => Vec::new(),
        }
    }

    /// An event carrying no change at all. The bus does not dispatch those.
    pub fn is_noop(&self) -> bool {
        match &self.payload {
            EventPayload::Added { added, .. } => added.is_empty(),
            EventPayload::Expunged { expunged } => expunged.is_empty(),
            EventPayload::FlagsUpdated { updated_flags } => {
                !updated_flags.iter().any(UpdatedFlags::flags_changed)
            }
            _ => false,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Preloaded messages of an Added event are not part of the JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
