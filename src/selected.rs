//! Session view of a selected mailbox
//!
//! A [`SelectedMailbox`] is registered on the bus under the key of its
//! mailbox and keeps the session's [`UidMsnConverter`] in step with the
//! messages added and expunged by any session.

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use crate::error::Result;
use crate::events::{Event, EventBus, EventPayload, ExecutionMode, MailboxListener, Registration, RegistrationKey};
use crate::types::{Mailbox, MailboxId, MailboxSession, MessageUid};
use crate::uid_msn::UidMsnConverter;

pub struct SelectedMailbox {
    session: MailboxSession,
    mailbox: Mailbox,
    converter: Arc<UidMsnConverter>,
}

impl SelectedMailbox {
    /// Select a mailbox currently holding `uids`
    pub fn new(session: MailboxSession, mailbox: Mailbox, uids: impl IntoIterator<Item = MessageUid>) -> Self {
        let converter = UidMsnConverter::new();
        converter.add_all(uids);
        Self {
            session,
            mailbox,
            converter: Arc::new(converter),
        }
    }

    pub fn session(&self) -> &MailboxSession {
        &self.session
    }

    pub fn mailbox_id(&self) -> MailboxId {
        self.mailbox.id
    }

    pub fn converter(&self) -> Arc<UidMsnConverter> {
        self.converter.clone()
    }

    pub fn registration_key(&self) -> RegistrationKey {
        RegistrationKey::Mailbox(self.mailbox.id)
    }

    /// Start following the mailbox's events
    pub fn listen(self: &Arc<Self>, bus: &EventBus) -> Registration {
        bus.register(self.clone(), self.registration_key())
    }

    /// Stop following the mailbox and forget its messages
    pub fn close(&self, registration: Registration) {
        registration.unregister();
        self.converter.clear();
    }
}

#[async_trait]
impl MailboxListener for SelectedMailbox {
    async fn event(&self, event: &Event) -> Result<()> {
        match &event.payload {
            EventPayload::Added { added, .. } => {
                for message in added {
                    self.converter.add_uid(message.uid);
                }
            }
            EventPayload::Expunged { expunged } => {
                for message in expunged {
                    self.converter.remove(message.uid);
                }
            }
            EventPayload::MailboxDeletion { .. } => {
                debug!("Selected mailbox {} of {} was deleted", self.mailbox.path, self.session.username);
                self.converter.clear();
            }
            EventPayload::FlagsUpdated { .. } | EventPayload::MailboxAdded | EventPayload::MailboxRenamed { .. } => {}
        }
        Ok(())
    }

    // The MSN view must be current by the time the mutating command returns
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Synchronous
    }

    fn is_handling(&self, event: &Event) -> bool {
        event.mailbox.id == self.mailbox.id
    }
}
