//! Access to stored messages
//!
//! The message store itself lives outside this crate. Listeners that need a
//! message which did not travel with its event fetch it through these traits.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::*;

pub mod r#impl;

/// Reads messages of one session
#[async_trait]
pub trait MessageMapper: Send + Sync {
    /// Messages of `mailbox` within `range`, ascending by UID, at most `limit`
    async fn find_in_mailbox(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
        fetch_type: FetchType,
        limit: Option<usize>,
    ) -> Result<Vec<MailboxMessage>>;
}

/// Hands out message mappers bound to a session
pub trait MessageMapperFactory: Send + Sync {
    fn message_mapper(&self, session: &MailboxSession) -> Result<Arc<dyn MessageMapper>>;
}
