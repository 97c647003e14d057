//! Core mailbox types carried by events and consumed by listeners

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Message UID (unique within a mailbox, strictly increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageUid(u64);

impl MessageUid {
    pub const MIN: MessageUid = MessageUid(1);

    pub fn of(uid: u64) -> Self {
        Self(uid)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message sequence number (1-based, contiguous, session local)
pub type Msn = u32;

/// The lowest message sequence number of a non-empty mailbox view
pub const FIRST_MSN: Msn = 1;

/// Unique identifier for a mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxId(pub Uuid);

impl MailboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MailboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified mailbox name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxPath {
    pub namespace: String,
    pub user: String,
    pub name: String,
}

impl MailboxPath {
    pub const PRIVATE_NAMESPACE: &'static str = "#private";

    pub fn for_user(user: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Self::PRIVATE_NAMESPACE.to_string(),
            user: user.into(),
            name: name.into(),
        }
    }

    pub fn inbox(user: impl Into<String>) -> Self {
        Self::for_user(user, "INBOX")
    }
}

impl fmt::Display for MailboxPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.user, self.name)
    }
}

/// Mailbox identity and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: MailboxId,
    pub path: MailboxPath,
    pub uid_validity: u32,
}

impl Mailbox {
    pub fn new(path: MailboxPath, uid_validity: u32) -> Self {
        Self {
            id: MailboxId::new(),
            path,
            uid_validity,
        }
    }
}

/// Identifier of the session at the origin of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

/// The user session a mailbox mutation originates from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxSession {
    pub session_id: SessionId,
    pub username: String,
}

impl MailboxSession {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            session_id: SessionId(Uuid::new_v4()),
            username: username.into(),
        }
    }
}

/// Message flags as defined by IMAP
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageFlag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    Custom(String),
}

impl MessageFlag {
    pub fn to_imap_string(&self) -> String {
        match self {
            MessageFlag::Seen => "\\Seen".to_string(),
            MessageFlag::Answered => "\\Answered".to_string(),
            MessageFlag::Flagged => "\\Flagged".to_string(),
            MessageFlag::Deleted => "\\Deleted".to_string(),
            MessageFlag::Draft => "\\Draft".to_string(),
            MessageFlag::Recent => "\\Recent".to_string(),
            MessageFlag::Custom(s) => s.clone(),
        }
    }

    pub fn from_imap_string(s: &str) -> Self {
        match s {
            "\\Seen" => MessageFlag::Seen,
            "\\Answered" => MessageFlag::Answered,
            "\\Flagged" => MessageFlag::Flagged,
            "\\Deleted" => MessageFlag::Deleted,
            "\\Draft" => MessageFlag::Draft,
            "\\Recent" => MessageFlag::Recent,
            _ => MessageFlag::Custom(s.to_string()),
        }
    }
}

/// Flags of one message before and after a STORE-like mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedFlags {
    pub uid: MessageUid,
    pub old_flags: Vec<MessageFlag>,
    pub new_flags: Vec<MessageFlag>,
}

impl UpdatedFlags {
    /// Whether the flag set actually changed
    pub fn flags_changed(&self) -> bool {
        let added = self.new_flags.iter().any(|f| !self.old_flags.contains(f));
        let removed = self.old_flags.iter().any(|f| !self.new_flags.contains(f));
        added || removed
    }
}

/// Lightweight description of a message referenced by Added/Expunged events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetaData {
    pub uid: MessageUid,
    pub flags: Vec<MessageFlag>,
    pub size: usize,
    pub internal_date: DateTime<Utc>,
}

/// A complete message as held by the message store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxMessage {
    pub mailbox_id: MailboxId,
    pub uid: MessageUid,
    pub flags: Vec<MessageFlag>,
    pub internal_date: DateTime<Utc>,
    pub size: usize,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl MailboxMessage {
    pub fn metadata(&self) -> MessageMetaData {
        MessageMetaData {
            uid: self.uid,
            flags: self.flags.clone(),
            size: self.size,
            internal_date: self.internal_date,
        }
    }
}

/// Range of UIDs used when querying a message store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRange {
    One(MessageUid),
    From(MessageUid),
    Range(MessageUid, MessageUid),
    All,
}

impl MessageRange {
    pub fn includes(&self, uid: MessageUid) -> bool {
        match *self {
            MessageRange::One(one) => one == uid,
            MessageRange::From(from) => uid >= from,
            MessageRange::Range(from, to) => uid >= from && uid <= to,
            MessageRange::All => true,
        }
    }
}

/// How much of a message the store has to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchType {
    Metadata,
    Headers,
    Body,
    Full,
}

/// Search query for finding messages
#[derive(Debug, Clone)]
pub enum SearchQuery {
    All,
    Text(String),
    From(String),
    To(String),
    Subject(String),
    Body(String),
    Uid(Vec<MessageUid>),
    Seen,
    Unseen,
    Flagged,
    Unflagged,
    Deleted,
    Undeleted,
    And(Box<SearchQuery>, Box<SearchQuery>),
    Or(Box<SearchQuery>, Box<SearchQuery>),
    Not(Box<SearchQuery>),
}
