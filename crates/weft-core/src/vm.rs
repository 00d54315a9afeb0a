//! The virtual machine: class loading, resolution and the public call API

use crate::class_registry::ClassRegistry;
use crate::host::{ClassDefiner, ClassSource, InMemorySource, InstanceBinder};
use crate::interpreter::Interpreter;
use crate::object::{ClassId, Heap, MethodEntry, ObjectRef, RuntimeClass};
use crate::options::VmOptions;
use crate::value::Value;
use crate::{VmError, VmResult};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use weft_bytecode::class::CONSTRUCTOR_NAME;
use weft_bytecode::descriptor::ROOT_CLASS;
use weft_bytecode::{
    access, verify_class, ClassBuilder, ClassNode, FieldType, MethodDescriptor,
};

/// Internal name of the built-in string type
pub const STRING_CLASS: &str = "weft/lang/String";

/// A Weft virtual machine
///
/// All methods take `&self`; the registry, heap and static storage are
/// individually locked and no lock is held while bytecode runs.
pub struct Vm {
    options: VmOptions,
    classes: RwLock<ClassRegistry>,
    heap: Mutex<Heap>,
    statics: Mutex<FxHashMap<(ClassId, String), Value>>,
    sources: InMemorySource,
    external: RwLock<Vec<Arc<dyn ClassSource + Send + Sync>>>,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("options", &self.options)
            .field("classes", &self.classes.read().len())
            .field("objects", &self.heap.lock().len())
            .finish()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Create a VM with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a VM with the given options
    ///
    /// The root class `weft/lang/Object` (with a no-op `<init>()V`) is
    /// installed up front.
    pub fn with_options(options: VmOptions) -> Self {
        let vm = Self {
            options,
            classes: RwLock::new(ClassRegistry::new()),
            heap: Mutex::new(Heap::new()),
            statics: Mutex::new(FxHashMap::default()),
            sources: InMemorySource::new(),
            external: RwLock::new(Vec::new()),
        };
        vm.install_root();
        vm
    }

    fn install_root(&self) {
        let node = ClassBuilder::new(ROOT_CLASS)
            .method(access::PUBLIC, CONSTRUCTOR_NAME, "()V", |m| {
                m.emit_return();
            })
            .build();
        let bytes: Arc<[u8]> = Arc::from(node.encode());
        let mut classes = self.classes.write();
        let id = classes.next_class_id();
        classes.register_class(RuntimeClass::new(id, node, bytes, None));
    }

    /// Active options
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    // ===== Loading =====

    /// Define a class from encoded bytes
    ///
    /// The bytes must decode to a class called `name` whose superclass is
    /// already loaded; the class is verified unless disabled in the options.
    pub fn define(&self, name: &str, bytes: &[u8]) -> VmResult<ClassId> {
        let node = ClassNode::decode(bytes)?;
        if node.name != name {
            return Err(VmError::NameMismatch {
                expected: name.to_string(),
                found: node.name,
            });
        }
        if self.options.verify {
            verify_class(&node)?;
        }

        let mut classes = self.classes.write();
        if classes.contains(name) {
            return Err(VmError::DuplicateClass(name.to_string()));
        }
        let parent = match &node.super_name {
            Some(super_name) => Some(classes.get_class_by_name(super_name).cloned().ok_or_else(
                || VmError::SuperclassNotLoaded {
                    class: name.to_string(),
                    super_name: super_name.clone(),
                },
            )?),
            None => None,
        };

        let id = classes.next_class_id();
        let method_count = node.methods.len();
        let class = RuntimeClass::new(id, node, Arc::from(bytes), parent.as_deref());
        classes.register_class(class);
        tracing::debug!(class = name, id = id.0, methods = method_count, "defined class");
        Ok(id)
    }

    /// Encode and define a class node
    pub fn load_class(&self, node: &ClassNode) -> VmResult<ClassId> {
        self.define(&node.name, &node.encode())
    }

    /// Make class bytes readable through [`ClassSource`] without defining
    /// the class
    pub fn register_source(&self, name: &str, bytes: impl Into<Arc<[u8]>>) {
        self.sources.insert(name, bytes);
    }

    /// Encode a node and register it as source only
    pub fn register_source_class(&self, node: &ClassNode) {
        self.register_source(&node.name, node.encode());
    }

    /// Consult another byte source after loaded and registered classes
    pub fn add_source(&self, source: Arc<dyn ClassSource + Send + Sync>) {
        self.external.write().push(source);
    }

    // ===== Lookup =====

    /// ID of a loaded class
    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.classes.read().id_of(name)
    }

    /// Loaded class by ID
    pub fn class(&self, id: ClassId) -> Option<Arc<RuntimeClass>> {
        self.classes.read().get_class(id).cloned()
    }

    /// Loaded class by name
    pub fn class_by_name(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.classes.read().get_class_by_name(name).cloned()
    }

    fn require_class(&self, name: &str) -> VmResult<Arc<RuntimeClass>> {
        self.class_by_name(name)
            .ok_or_else(|| VmError::ClassNotFound(name.to_string()))
    }

    /// Names of a class and its superclasses, most derived first
    pub fn ancestry_names(&self, id: ClassId) -> Vec<String> {
        self.classes
            .read()
            .ancestry(id)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Whether instances of `id` are assignable to `target`
    pub fn is_subtype(&self, id: ClassId, target: &str) -> bool {
        if target == ROOT_CLASS {
            return true;
        }
        let classes = self.classes.read();
        let found = classes.ancestry(id).any(|class| {
            class.name == target
                || class
                    .interfaces
                    .iter()
                    .any(|iface| Self::interface_reaches(&classes, iface, target))
        });
        found
    }

    fn interface_reaches(classes: &ClassRegistry, iface: &str, target: &str) -> bool {
        if iface == target {
            return true;
        }
        match classes.get_class_by_name(iface) {
            Some(class) => class
                .interfaces
                .iter()
                .any(|parent| Self::interface_reaches(classes, parent, target)),
            None => false,
        }
    }

    /// Most-derived declaration of a method, starting at `start`
    pub fn resolve_method(
        &self,
        start: ClassId,
        name: &str,
        descriptor: &str,
    ) -> Option<Arc<MethodEntry>> {
        let classes = self.classes.read();
        let found = classes
            .ancestry(start)
            .find_map(|class| class.declared_method(name, descriptor).cloned());
        found
    }

    /// Resolve a method reference against a named class
    pub(crate) fn resolve_method_in(
        &self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> VmResult<Arc<MethodEntry>> {
        let class = self.require_class(owner)?;
        self.resolve_method(class.id, name, descriptor)
            .ok_or_else(|| VmError::MethodNotFound {
                class: owner.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })
    }

    /// Slot index of an instance field, searching from `owner` upward
    pub(crate) fn resolve_field(&self, owner: &str, name: &str) -> VmResult<usize> {
        let class = self.require_class(owner)?;
        let classes = self.classes.read();
        let found = classes
            .ancestry(class.id)
            .find_map(|c| c.declared_field(name).map(|slot| slot.index));
        found.ok_or_else(|| VmError::FieldNotFound {
            class: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Declaring class and descriptor of a static field
    pub(crate) fn resolve_static(&self, owner: &str, name: &str) -> VmResult<(ClassId, String)> {
        let class = self.require_class(owner)?;
        let classes = self.classes.read();
        let found = classes.ancestry(class.id).find_map(|c| {
            c.declared_static(name)
                .map(|descriptor| (c.id, descriptor.to_string()))
        });
        found.ok_or_else(|| VmError::FieldNotFound {
            class: owner.to_string(),
            name: name.to_string(),
        })
    }

    // ===== Heap =====

    /// Allocate a zero-initialized instance without running a constructor
    pub(crate) fn allocate(&self, class_name: &str) -> VmResult<ObjectRef> {
        let class = self.require_class(class_name)?;
        if class.access & (access::ABSTRACT | access::INTERFACE) != 0 {
            return Err(VmError::Instantiation(class_name.to_string()));
        }
        Ok(self.heap.lock().alloc(class.id, class.instance_defaults()))
    }

    /// Class of a heap object
    pub fn class_of(&self, obj: ObjectRef) -> VmResult<ClassId> {
        self.heap
            .lock()
            .get(obj)
            .map(|o| o.class_id)
            .ok_or(VmError::InvalidObject(obj))
    }

    pub(crate) fn read_slot(&self, obj: ObjectRef, index: usize) -> VmResult<Value> {
        let heap = self.heap.lock();
        let object = heap.get(obj).ok_or(VmError::InvalidObject(obj))?;
        object
            .fields
            .get(index)
            .cloned()
            .ok_or(VmError::InvalidObject(obj))
    }

    pub(crate) fn write_slot(&self, obj: ObjectRef, index: usize, value: Value) -> VmResult<()> {
        let mut heap = self.heap.lock();
        let object = heap.get_mut(obj).ok_or(VmError::InvalidObject(obj))?;
        let slot = object
            .fields
            .get_mut(index)
            .ok_or(VmError::InvalidObject(obj))?;
        *slot = value;
        Ok(())
    }

    pub(crate) fn read_static(&self, class: ClassId, name: &str, descriptor: &str) -> Value {
        self.statics
            .lock()
            .get(&(class, name.to_string()))
            .cloned()
            .unwrap_or_else(|| Value::default_for_descriptor(descriptor))
    }

    pub(crate) fn write_static(&self, class: ClassId, name: &str, value: Value) {
        self.statics.lock().insert((class, name.to_string()), value);
    }

    fn field_index_by_name(&self, obj: ObjectRef, name: &str) -> VmResult<usize> {
        let class_id = self.class_of(obj)?;
        let classes = self.classes.read();
        let found = classes
            .ancestry(class_id)
            .find_map(|c| c.declared_field(name).map(|slot| slot.index));
        found.ok_or_else(|| VmError::FieldNotFound {
            class: classes
                .get_class(class_id)
                .map(|c| c.name.clone())
                .unwrap_or_default(),
            name: name.to_string(),
        })
    }

    /// Read an instance field by name (most-derived declaration wins)
    pub fn get_field(&self, obj: ObjectRef, name: &str) -> VmResult<Value> {
        let index = self.field_index_by_name(obj, name)?;
        self.read_slot(obj, index)
    }

    /// Write an instance field by name
    pub fn set_field(&self, obj: ObjectRef, name: &str, value: Value) -> VmResult<()> {
        let index = self.field_index_by_name(obj, name)?;
        self.write_slot(obj, index, value)
    }

    /// Read a static field
    pub fn get_static(&self, class: &str, name: &str) -> VmResult<Value> {
        let (id, descriptor) = self.resolve_static(class, name)?;
        Ok(self.read_static(id, name, &descriptor))
    }

    /// Write a static field
    ///
    /// A reference stored into a class-typed field must be an instance of
    /// that class.
    pub fn set_static(&self, class: &str, name: &str, value: Value) -> VmResult<()> {
        let (id, descriptor) = self.resolve_static(class, name)?;
        let field_type =
            FieldType::parse(&descriptor).map_err(|e| VmError::TypeError(e.to_string()))?;
        if !value.fits(field_type.category()) {
            return Err(VmError::TypeError(format!(
                "{:?} does not fit static {}.{} of type {}",
                value, class, name, descriptor
            )));
        }
        if let (Value::Ref(obj), FieldType::Object(target)) = (&value, &field_type) {
            if !self.is_instance_of(*obj, target)? {
                let from = self
                    .class(self.class_of(*obj)?)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                return Err(VmError::ClassCast {
                    from,
                    to: target.clone(),
                });
            }
        }
        self.write_static(id, name, value);
        Ok(())
    }

    /// Whether an object is an instance of a class or interface
    pub fn is_instance_of(&self, obj: ObjectRef, type_name: &str) -> VmResult<bool> {
        let id = self.class_of(obj)?;
        Ok(self.is_subtype(id, type_name))
    }

    // ===== Calls =====

    fn check_args(descriptor: &MethodDescriptor, args: &[Value], what: &str) -> VmResult<()> {
        let fits = args.len() == descriptor.params.len()
            && args
                .iter()
                .zip(&descriptor.params)
                .all(|(arg, param)| arg.fits(param.category()));
        if fits {
            Ok(())
        } else {
            Err(VmError::BadArguments(what.to_string()))
        }
    }

    fn parse_descriptor(descriptor: &str) -> VmResult<MethodDescriptor> {
        MethodDescriptor::parse(descriptor).map_err(|e| VmError::TypeError(e.to_string()))
    }

    /// Allocate an instance of `class` and run the constructor with
    /// descriptor `ctor_descriptor`
    pub fn new_instance(
        &self,
        class: &str,
        ctor_descriptor: &str,
        args: Vec<Value>,
    ) -> VmResult<ObjectRef> {
        let desc = Self::parse_descriptor(ctor_descriptor)?;
        Self::check_args(&desc, &args, &format!("{}.<init>{}", class, ctor_descriptor))?;

        let ctor = self.require_class(class).and_then(|c| {
            c.declared_method(CONSTRUCTOR_NAME, ctor_descriptor)
                .cloned()
                .ok_or_else(|| VmError::MethodNotFound {
                    class: class.to_string(),
                    name: CONSTRUCTOR_NAME.to_string(),
                    descriptor: ctor_descriptor.to_string(),
                })
        })?;

        let obj = self.allocate(class)?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Ref(obj));
        full.extend(args);
        Interpreter::new(self).call(&ctor, full)?;
        Ok(obj)
    }

    /// Invoke an instance method with virtual dispatch on the receiver
    pub fn invoke_virtual(
        &self,
        receiver: ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        let desc = Self::parse_descriptor(descriptor)?;
        Self::check_args(&desc, &args, &format!("{}{}", name, descriptor))?;
        let class_id = self.class_of(receiver)?;
        let entry = self
            .resolve_method(class_id, name, descriptor)
            .ok_or_else(|| VmError::MethodNotFound {
                class: self.class(class_id).map(|c| c.name.clone()).unwrap_or_default(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })?;

        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Ref(receiver));
        full.extend(args);
        Interpreter::new(self).call(&entry, full)
    }

    /// Invoke a static method
    pub fn invoke_static(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        let desc = Self::parse_descriptor(descriptor)?;
        Self::check_args(&desc, &args, &format!("{}.{}{}", class, name, descriptor))?;
        let entry = self.resolve_method_in(class, name, descriptor)?;
        Interpreter::new(self).call(&entry, args)
    }
}

impl ClassSource for Vm {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        if let Some(class) = self.class_by_name(name) {
            return Some(class.bytes().to_vec());
        }
        if let Some(bytes) = self.sources.class_bytes(name) {
            return Some(bytes);
        }
        self.external
            .read()
            .iter()
            .find_map(|source| source.class_bytes(name))
    }
}

impl ClassDefiner for Vm {
    type Handle = ClassId;

    fn define_class(&self, name: &str, bytes: &[u8]) -> VmResult<ClassId> {
        self.define(name, bytes)
    }

    fn is_defined(&self, name: &str) -> bool {
        self.classes.read().contains(name)
    }
}

impl InstanceBinder for Vm {
    type Instance = ObjectRef;

    fn instance_of(&self, instance: &ObjectRef, class: &str) -> VmResult<bool> {
        self.is_instance_of(*instance, class)
    }

    fn bind_instance(&self, class: &str, field: &str, instance: &ObjectRef) -> VmResult<()> {
        self.set_static(class, field, Value::Ref(*instance))
    }
}
