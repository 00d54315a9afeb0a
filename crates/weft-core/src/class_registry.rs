//! Class registry for loaded runtime classes

use crate::object::{ClassId, RuntimeClass};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Class registry for the VM
///
/// Append-only: a class keeps its ID for the lifetime of the registry.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    /// Classes indexed by ID
    classes: Vec<Arc<RuntimeClass>>,
    /// Class name to ID mapping
    name_to_id: FxHashMap<String, ClassId>,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class built for [`Self::next_class_id`]
    ///
    /// The caller checks for name clashes first; re-registering a name
    /// rebinds it to the new class.
    pub fn register_class(&mut self, class: RuntimeClass) -> ClassId {
        let id = class.id;
        debug_assert_eq!(id, self.next_class_id());
        self.name_to_id.insert(class.name.clone(), id);
        self.classes.push(Arc::new(class));
        id
    }

    /// Get class by ID
    pub fn get_class(&self, id: ClassId) -> Option<&Arc<RuntimeClass>> {
        self.classes.get(id.0)
    }

    /// Get class by name
    pub fn get_class_by_name(&self, name: &str) -> Option<&Arc<RuntimeClass>> {
        self.name_to_id
            .get(name)
            .and_then(|id| self.classes.get(id.0))
    }

    /// Look up a class ID by name
    pub fn id_of(&self, name: &str) -> Option<ClassId> {
        self.name_to_id.get(name).copied()
    }

    /// Check whether a name is taken
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    /// Get next available class ID
    pub fn next_class_id(&self) -> ClassId {
        ClassId(self.classes.len())
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if no classes are registered
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over all classes
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RuntimeClass>> {
        self.classes.iter()
    }

    /// The class and all its ancestors, most derived first
    pub fn ancestry(&self, id: ClassId) -> Ancestry<'_> {
        Ancestry {
            registry: self,
            next: Some(id),
        }
    }
}

/// Iterator over a class and its superclasses
pub struct Ancestry<'a> {
    registry: &'a ClassRegistry,
    next: Option<ClassId>,
}

impl<'a> Iterator for Ancestry<'a> {
    type Item = &'a Arc<RuntimeClass>;

    fn next(&mut self) -> Option<Self::Item> {
        let class = self.registry.get_class(self.next?)?;
        self.next = class.super_id;
        Some(class)
    }
}
