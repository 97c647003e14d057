//! Error types for the mailbox event core

use thiserror::Error;

use crate::events::group::Group;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Group already registered: {0}")]
    GroupAlreadyRegistered(Group),

    #[error("Groups already registered: the event bus is already initialized")]
    GroupsAlreadyRegistered,

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Message mapper error: {0}")]
    Mapper(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
