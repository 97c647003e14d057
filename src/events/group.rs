//! Group identities for durable listeners
//!
//! A [`Group`] names the one consumer of a durable listener registration.
//! Its string form is what gets persisted (dead letters, registration
//! stores). Turning that string back into a group goes through a
//! [`GroupRegistry`] populated at startup: there is no lookup by type name
//! at runtime.
//!
//! Listener groups are named by [`GroupName::GROUP_NAME`]. Changing that
//! constant orphans the group's persisted state.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// Stable name under which a listener type's group is persisted
pub trait GroupName {
    const GROUP_NAME: &'static str;
}

/// Durable listener identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    /// Named after a listener type, see [`GroupName`]
    Listener(String),
    /// Explicitly named group, usable by several instances of one type
    Generic(String),
}

impl Group {
    pub const GENERIC_PREFIX: &'static str = "GenericGroup-";

    /// The group of a listener type
    pub fn of<T: GroupName + ?Sized>() -> Self {
        Group::Listener(T::GROUP_NAME.to_string())
    }

    pub fn generic(name: impl Into<String>) -> Self {
        Group::Generic(name.into())
    }

    pub fn as_string(&self) -> String {
        match self {
            Group::Listener(name) => name.clone(),
            Group::Generic(name) => format!("{}{}", Self::GENERIC_PREFIX, name),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

type GroupFactory = Box<dyn Fn() -> Group + Send + Sync>;

/// Maps serialized group names back to groups
#[derive(Default)]
pub struct GroupRegistry {
    factories: HashMap<String, GroupFactory>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the group of listener type `T` deserializable
    pub fn register_type<T: GroupName + ?Sized + 'static>(&mut self) -> &mut Self {
        self.register(Group::of::<T>().as_string(), Group::of::<T>)
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Group + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn is_known(&self, name: &str) -> bool {
        name.starts_with(Group::GENERIC_PREFIX) || self.factories.contains_key(name)
    }

    pub fn deserialize(&self, serialized: &str) -> Result<Group> {
        if let Some(name) = serialized.strip_prefix(Group::GENERIC_PREFIX) {
            return Ok(Group::Generic(name.to_string()));
        }
        self.factories
            .get(serialized)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownGroup(serialized.to_string()))
    }
}

impl fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    struct QuotaListener;
    struct IndexListener;

    impl GroupName for QuotaListener {
        const GROUP_NAME: &'static str = "org.example.QuotaListener";
    }

    impl GroupName for IndexListener {
        const GROUP_NAME: &'static str = "org.example.IndexListener";
    }

    fn hash_of(group: &Group) -> u64 {
        let mut hasher = DefaultHasher::new();
        group.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_group_of_type_is_stable() {
        assert_eq!(Group::of::<QuotaListener>(), Group::of::<QuotaListener>());
        assert_ne!(Group::of::<QuotaListener>(), Group::of::<IndexListener>());
        assert_eq!(Group::of::<QuotaListener>().as_string(), "org.example.QuotaListener");
    }

    #[test]
    fn test_deserialized_groups_are_equal() {
        let mut registry = GroupRegistry::new();
        registry.register_type::<QuotaListener>();

        let serialized = Group::of::<QuotaListener>().as_string();
        let first = registry.deserialize(&serialized).unwrap();
        let second = registry.deserialize(&serialized).unwrap();

        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));
        assert_eq!(first, Group::of::<QuotaListener>());
    }

    #[test]
    fn test_deserialize_unknown_group_fails() {
        let registry = GroupRegistry::new();
        let result = registry.deserialize("org.example.DoesNotExist");
        assert!(matches!(result, Err(Error::UnknownGroup(name)) if name == "org.example.DoesNotExist"));
    }

    #[test]
    fn test_listener_group_needs_registration() {
        let mut registry = GroupRegistry::new();
        let persisted = Group::of::<IndexListener>().as_string();
        assert!(!registry.is_known(&persisted));
        assert!(matches!(registry.deserialize(&persisted), Err(Error::UnknownGroup(_))));

        registry.register_type::<IndexListener>();
        assert_eq!(registry.deserialize(&persisted).unwrap(), Group::of::<IndexListener>());
    }

    #[test]
    fn test_generic_group() {
        let registry = GroupRegistry::new();
        let group = Group::generic("indexer-node-1");

        assert_eq!(group.as_string(), "GenericGroup-indexer-node-1");
        assert_eq!(registry.deserialize(&group.as_string()).unwrap(), group);
        assert_ne!(group, Group::Listener("indexer-node-1".to_string()));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = GroupRegistry::new();
        registry.register("legacy-indexer", || Group::of::<IndexListener>());

        assert!(registry.is_known("legacy-indexer"));
        assert_eq!(registry.deserialize("legacy-indexer").unwrap(), Group::of::<IndexListener>());
    }
}
