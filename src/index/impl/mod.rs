//! Search index implementations

pub mod inmemory;

pub use inmemory::InMemoryMessageIndexer;
