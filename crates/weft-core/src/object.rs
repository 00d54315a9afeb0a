//! Object model and runtime class metadata

use crate::value::Value;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use weft_bytecode::{ClassNode, Label, MethodNode};

/// Index of a class in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

/// Handle to a heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub u32);

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Object instance (heap-allocated)
#[derive(Debug, Clone)]
pub struct Object {
    /// Class of the instance
    pub class_id: ClassId,
    /// Field values, inherited fields first
    pub fields: Vec<Value>,
}

/// Append-only object arena
///
/// Objects are never freed; the runtime hosts short-lived test and
/// synthesis workloads.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an object
    pub fn alloc(&mut self, class_id: ClassId, fields: Vec<Value>) -> ObjectRef {
        let id = ObjectRef(self.objects.len() as u32);
        self.objects.push(Object { class_id, fields });
        id
    }

    /// Get an object
    pub fn get(&self, r: ObjectRef) -> Option<&Object> {
        self.objects.get(r.0 as usize)
    }

    /// Get a mutable object
    pub fn get_mut(&mut self, r: ObjectRef) -> Option<&mut Object> {
        self.objects.get_mut(r.0 as usize)
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if nothing has been allocated
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Instance field position within the object layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    /// Index into [`Object::fields`]
    pub index: usize,
    /// Field descriptor
    pub descriptor: String,
}

/// A loaded method with its label table
#[derive(Debug)]
pub struct MethodEntry {
    /// Declaring class
    pub owner: ClassId,
    /// The method declaration and body
    pub node: MethodNode,
    labels: FxHashMap<Label, usize>,
}

impl MethodEntry {
    fn new(owner: ClassId, node: MethodNode) -> Self {
        let labels = node
            .insns
            .iter()
            .enumerate()
            .filter_map(|(i, insn)| match insn {
                weft_bytecode::Insn::Label(l) => Some((*l, i)),
                _ => None,
            })
            .collect();
        Self {
            owner,
            node,
            labels,
        }
    }

    /// Instruction index of a label
    pub fn label_index(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }
}

/// Class definition metadata
#[derive(Debug)]
pub struct RuntimeClass {
    /// Class ID
    pub id: ClassId,
    /// Internal name
    pub name: String,
    /// Access flags
    pub access: u16,
    /// Superclass (None for hierarchy roots)
    pub super_id: Option<ClassId>,
    /// Declared interfaces
    pub interfaces: Vec<String>,
    /// Number of instance fields, inherited included
    pub field_count: usize,
    fields: FxHashMap<String, FieldSlot>,
    statics: FxHashMap<String, String>,
    methods: FxHashMap<(String, String), Arc<MethodEntry>>,
    defaults: Vec<Value>,
    bytes: Arc<[u8]>,
}

impl RuntimeClass {
    /// Lay out a class on top of its (already loaded) parent
    pub fn new(
        id: ClassId,
        node: ClassNode,
        bytes: Arc<[u8]>,
        parent: Option<&RuntimeClass>,
    ) -> Self {
        let mut defaults = parent.map(|p| p.defaults.clone()).unwrap_or_default();
        let mut fields = FxHashMap::default();
        let mut statics = FxHashMap::default();

        for field in node.fields {
            if field.is_static() {
                statics.insert(field.name, field.descriptor);
                continue;
            }
            defaults.push(Value::default_for_descriptor(&field.descriptor));
            fields.insert(
                field.name,
                FieldSlot {
                    index: defaults.len() - 1,
                    descriptor: field.descriptor,
                },
            );
        }

        let methods = node
            .methods
            .into_iter()
            .map(|m| {
                let key = (m.name.clone(), m.descriptor.clone());
                (key, Arc::new(MethodEntry::new(id, m)))
            })
            .collect();

        Self {
            id,
            name: node.name,
            access: node.access,
            super_id: parent.map(|p| p.id),
            interfaces: node.interfaces,
            field_count: defaults.len(),
            fields,
            statics,
            methods,
            defaults,
            bytes,
        }
    }

    /// Instance field declared by this class
    pub fn declared_field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.get(name)
    }

    /// Descriptor of a static field declared by this class
    pub fn declared_static(&self, name: &str) -> Option<&str> {
        self.statics.get(name).map(String::as_str)
    }

    /// Method declared by this class
    pub fn declared_method(&self, name: &str, descriptor: &str) -> Option<&Arc<MethodEntry>> {
        self.methods
            .get(&(name.to_string(), descriptor.to_string()))
    }

    /// Names and descriptors of declared methods
    pub fn method_signatures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.methods
            .keys()
            .map(|(n, d)| (n.as_str(), d.as_str()))
    }

    /// Zero-initialized field values for a new instance
    pub fn instance_defaults(&self) -> Vec<Value> {
        self.defaults.clone()
    }

    /// The encoded class this runtime class was defined from
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }
}
