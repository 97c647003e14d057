//! Listener traits

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::events::group::Group;
use crate::events::Event;

/// Whether dispatch waits for a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Dispatch completes only once the listener is done (success or
    /// exhausted retries). Used by listeners whose effect must be visible
    /// when the mutation returns.
    Synchronous,
    /// Dispatch only enqueues the event for the listener
    Asynchronous,
}

/// A consumer of mailbox events
#[async_trait]
pub trait MailboxListener: Send + Sync {
    /// Handle one event. An error triggers a delayed retry.
    async fn event(&self, event: &Event) -> Result<()>;

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Asynchronous
    }

    /// Events a listener does not handle are never delivered to it
    fn is_handling(&self, _event: &Event) -> bool {
        true
    }

    /// Identity used when reporting delivery failures
    fn identity(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// A listener with a natural durable group
pub trait GroupMailboxListener: MailboxListener {
    fn default_group(&self) -> Group;
}
