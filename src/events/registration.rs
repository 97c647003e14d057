//! Registration keys and registration handles

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{MailboxId, MailboxPath};

/// Routing token for key based (fan-out) registrations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationKey {
    Mailbox(MailboxId),
    Path(MailboxPath),
    Username(String),
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationKey::Mailbox(id) => write!(f, "mailbox:{}", id),
            RegistrationKey::Path(path) => write!(f, "path:{}", path),
            RegistrationKey::Username(user) => write!(f, "user:{}", user),
        }
    }
}

/// Handle to a listener binding returned by the bus
///
/// Unregistering removes only this binding. Unregistering twice is a no-op.
pub struct Registration {
    description: String,
    unregister: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Registration {
    pub(crate) fn new(description: String, unregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            description,
            unregister: Mutex::new(Some(Box::new(unregister))),
        }
    }

    pub fn unregister(&self) {
        let action = self.unregister.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_active(&self) -> bool {
        self.unregister.lock().is_some()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("binding", &self.description)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unregister_is_idempotent() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let registration = Registration::new("test".to_string(), move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registration.is_active());
        registration.unregister();
        registration.unregister();

        assert!(!registration.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_key_display() {
        let key = RegistrationKey::Path(MailboxPath::inbox("alice"));
        assert_eq!(key.to_string(), "path:#private:alice:INBOX");
    }
}
