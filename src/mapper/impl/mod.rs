//! Message mapper implementations

pub mod memory;

pub use memory::InMemoryMessageMapperFactory;
