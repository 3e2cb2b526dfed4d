use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};

use foldhash::fast::RandomState;
use serde::{Deserialize, Serialize};

/// Network-wide identifier of a shared object.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub const UNASSIGNED: NetworkId = NetworkId(u64::MAX);

    #[must_use]
    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_assigned() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#unassigned")
        }
    }
}

/// An object that can be addressed across the network.
pub trait NetworkObject {
    fn network_id(&self) -> NetworkId;
}

/// Type-erased handle to a `RefCell<T>` living in a directory.
pub type ObjectHandle = Rc<dyn Any>;

/// Resolves network ids to live local objects.
pub trait ObjectDirectory {
    fn resolve(&self, id: NetworkId) -> Option<ObjectHandle>;
}

/// Directory holding weak references, so dropped objects stop resolving.
#[derive(Default)]
pub struct NetworkIdManager {
    objects: RefCell<HashMap<NetworkId, Weak<dyn Any>, RandomState>>,
}

impl NetworkIdManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object` under its own network id, replacing any previous
    /// object with that id. Returns `false` for an unassigned id.
    pub fn register<T: NetworkObject + 'static>(&self, object: &Rc<RefCell<T>>) -> bool {
        let id = object.borrow().network_id();
        if !id.is_assigned() {
            tracing::warn!("refusing to register object without a network id");
            return false;
        }
        let handle: Rc<dyn Any> = object.clone();
        self.objects.borrow_mut().insert(id, Rc::downgrade(&handle));
        true
    }

    pub fn unregister(&self, id: NetworkId) -> bool {
        self.objects.borrow_mut().remove(&id).is_some()
    }

    #[must_use]
    pub fn get<T: 'static>(&self, id: NetworkId) -> Option<Rc<RefCell<T>>> {
        self.resolve(id)?.downcast::<RefCell<T>>().ok()
    }

    /// Number of registered ids whose objects are still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects
            .borrow()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectDirectory for NetworkIdManager {
    fn resolve(&self, id: NetworkId) -> Option<ObjectHandle> {
        let mut objects = self.objects.borrow_mut();
        let handle = objects.get(&id)?.upgrade();
        if handle.is_none() {
            objects.remove(&id);
        }
        handle
    }
}

impl std::fmt::Debug for NetworkIdManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkIdManager")
            .field("objects", &self.objects.borrow().keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Crate {
        id: NetworkId,
        hp: i32,
    }

    impl NetworkObject for Crate {
        fn network_id(&self) -> NetworkId {
            self.id
        }
    }

    #[test]
    fn test_register_resolve_drop() {
        let manager = NetworkIdManager::new();
        let object = Rc::new(RefCell::new(Crate {
            id: NetworkId(7),
            hp: 10,
        }));
        assert!(manager.register(&object));
        assert_eq!(manager.len(), 1);

        let found = manager.get::<Crate>(NetworkId(7)).unwrap();
        found.borrow_mut().hp = 3;
        assert_eq!(object.borrow().hp, 3);
        assert!(manager.get::<String>(NetworkId(7)).is_none());

        drop(found);
        drop(object);
        assert!(manager.resolve(NetworkId(7)).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_unassigned_rejected() {
        let manager = NetworkIdManager::new();
        let object = Rc::new(RefCell::new(Crate {
            id: NetworkId::UNASSIGNED,
            hp: 0,
        }));
        assert!(!manager.register(&object));
        assert!(!manager.unregister(NetworkId::UNASSIGNED));
        assert_eq!(NetworkId::default().to_string(), "#unassigned");
        assert_eq!(NetworkId(3).to_string(), "#3");
    }
}
