use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{Catalog, Collection, CollectionDef, Component, Id, Stage};

/// Registered components in registration order, plus the collection lookups
/// components use while booting
#[derive(Default)]
pub struct Registry {
    components: RwLock<Vec<Arc<dyn Component>>>,
    collections: RwLock<HashMap<Id, Arc<Collection>>>,
    /// Name -> id of compiled collections, rebuilt by `refresh_index`
    link_index: RwLock<HashMap<String, Id>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. Re-registering an id replaces the component in place,
    /// keeping its registration position.
    pub fn register(&self, component: Arc<dyn Component>) {
        let mut components = self.components.write();
        match components.iter_mut().find(|c| c.id() == component.id()) {
            Some(existing) => *existing = component,
            None => components.push(component),
        }
    }

    pub fn register_collection(&self, def: CollectionDef) -> Arc<Collection> {
        let collection = Arc::new(Collection::new(def));
        self.collections
            .write()
            .insert(collection.def().id.clone(), collection.clone());
        self.register(collection.clone());
        collection
    }

    /// Unregister a component; returns whether it was registered
    pub fn forget(&self, id: &str) -> bool {
        let mut components = self.components.write();
        let before = components.len();
        components.retain(|c| c.id() != id);

        if let Some(collection) = self.collections.write().remove(id) {
            let mut index = self.link_index.write();
            if index.get(&collection.def().name).map(String::as_str) == Some(id) {
                index.remove(&collection.def().name);
            }
        }

        components.len() != before
    }

    /// Snapshot of all components in registration order
    pub fn components(&self) -> Vec<Arc<dyn Component>> {
        self.components.read().clone()
    }

    pub fn collection(&self, id: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(id).cloned()
    }

    pub fn collection_by_name(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections
            .read()
            .values()
            .find(|c| c.def().name == name)
            .cloned()
    }

    pub fn collections(&self) -> Vec<Arc<Collection>> {
        let mut collections: Vec<Arc<Collection>> =
            self.collections.read().values().cloned().collect();
        collections.sort_by(|a, b| a.def().name.cmp(&b.def().name));
        collections
    }

    /// Rebuild the link index from collections that finished compiling.
    /// Runs between the compile and link stages.
    pub fn refresh_index(&self) -> usize {
        let index: HashMap<String, Id> = self
            .collections
            .read()
            .values()
            .filter(|c| c.completed_stage().is_some())
            .map(|c| (c.def().name.clone(), c.def().id.clone()))
            .collect();
        let count = index.len();
        *self.link_index.write() = index;
        count
    }
}

impl Catalog for Registry {
    fn resolve_link(&self, name: &str) -> Option<Id> {
        self.link_index.read().get(name).cloned()
    }

    fn completed_stage(&self, name: &str) -> Option<Stage> {
        self.collection_by_name(name)
            .and_then(|collection| collection.completed_stage())
    }
}
