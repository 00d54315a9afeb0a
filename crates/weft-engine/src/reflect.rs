//! Structural reflection over the host byte source

use crate::error::{SynthesisError, SynthesisResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use weft_bytecode::{ClassNode, FieldNode, MethodNode};
use weft_core::ClassSource;

/// Reads class trees through a [`ClassSource`], once per class
pub struct Reflector<'s, S: ClassSource + ?Sized> {
    source: &'s S,
    cache: FxHashMap<String, Arc<ClassNode>>,
}

impl<'s, S: ClassSource + ?Sized> Reflector<'s, S> {
    /// Create a reflector over a byte source
    pub fn new(source: &'s S) -> Self {
        Self {
            source,
            cache: FxHashMap::default(),
        }
    }

    /// Load and decode one class
    pub fn load(&mut self, name: &str) -> SynthesisResult<Arc<ClassNode>> {
        if let Some(node) = self.cache.get(name) {
            return Ok(Arc::clone(node));
        }

        let bytes = self
            .source
            .class_bytes(name)
            .ok_or_else(|| SynthesisError::MissingSource(name.to_string()))?;
        let node = ClassNode::decode(&bytes).map_err(|source| SynthesisError::Decode {
            class: name.to_string(),
            source,
        })?;
        if node.name != name {
            return Err(SynthesisError::MissingSource(format!(
                "{} (source returned {})",
                name, node.name
            )));
        }

        tracing::trace!(class = name, bytes = bytes.len(), "reflected class");
        let node = Arc::new(node);
        self.cache.insert(name.to_string(), Arc::clone(&node));
        Ok(node)
    }

    /// Load a class and all its superclasses, nearest first
    pub fn hierarchy(&mut self, base: &str) -> SynthesisResult<Hierarchy> {
        let mut classes = Vec::new();
        let mut seen = FxHashSet::default();
        let mut next = Some(base.to_string());

        while let Some(name) = next {
            if !seen.insert(name.clone()) {
                return Err(SynthesisError::CyclicHierarchy(name));
            }
            let node = self.load(&name)?;
            next = node.super_name.clone();
            classes.push(node);
        }

        Ok(Hierarchy { classes })
    }
}

/// A base class and its ancestors, nearest first
#[derive(Debug, Clone)]
pub struct Hierarchy {
    classes: Vec<Arc<ClassNode>>,
}

impl Hierarchy {
    /// The class the hierarchy was loaded for
    pub fn base(&self) -> &ClassNode {
        // hierarchy() always pushes the base before returning
        &self.classes[0]
    }

    /// Classes, nearest first
    pub fn classes(&self) -> impl Iterator<Item = &ClassNode> {
        self.classes.iter().map(|c| c.as_ref())
    }

    /// Nearest declaration of a method, with its declaring class
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<(&ClassNode, &MethodNode)> {
        self.classes()
            .find_map(|class| class.find_method(name, descriptor).map(|m| (class, m)))
    }

    /// Nearest declaration of a field, with its declaring class
    pub fn find_field(&self, name: &str) -> Option<(&ClassNode, &FieldNode)> {
        self.classes()
            .find_map(|class| class.find_field(name).map(|f| (class, f)))
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the hierarchy holds no classes
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_bytecode::{access, ClassBuilder};
    use weft_core::InMemorySource;

    fn put(source: &InMemorySource, node: ClassNode) {
        source.insert(node.name.clone(), node.encode());
    }

    fn chain() -> InMemorySource {
        let source = InMemorySource::new();
        put(
            &source,
            ClassBuilder::new("demo/A")
                .method(access::PUBLIC, "get", "()I", |m| {
                    m.emit_push_int(1).emit_return();
                })
                .field(access::PUBLIC, "a", "I")
                .build(),
        );
        put(
            &source,
            ClassBuilder::new("demo/B")
                .extends("demo/A")
                .method(access::PUBLIC, "get", "()I", |m| {
                    m.emit_push_int(2).emit_return();
                })
                .build(),
        );
        source
    }

    #[test]
    fn test_hierarchy_nearest_first() {
        let source = chain();
        let mut reflector = Reflector::new(&source);
        let hierarchy = reflector.hierarchy("demo/B").unwrap();
        let names: Vec<&str> = hierarchy.classes().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["demo/B", "demo/A"]);
        assert_eq!(hierarchy.base().name, "demo/B");
        assert_eq!(hierarchy.len(), 2);
        assert!(!hierarchy.is_empty());

        let (owner, _) = hierarchy.find_method("get", "()I").unwrap();
        assert_eq!(owner.name, "demo/B");
        let (owner, _) = hierarchy.find_field("a").unwrap();
        assert_eq!(owner.name, "demo/A");
    }

    #[test]
    fn test_missing_ancestor() {
        let source = InMemorySource::new();
        put(&source, ClassBuilder::new("demo/C").extends("demo/Gone").build());
        let mut reflector = Reflector::new(&source);
        assert!(matches!(
            reflector.hierarchy("demo/C"),
            Err(SynthesisError::MissingSource(name)) if name == "demo/Gone"
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let source = InMemorySource::new();
        put(&source, ClassBuilder::new("demo/X").extends("demo/Y").build());
        put(&source, ClassBuilder::new("demo/Y").extends("demo/X").build());
        let mut reflector = Reflector::new(&source);
        assert!(matches!(
            reflector.hierarchy("demo/X"),
            Err(SynthesisError::CyclicHierarchy(_))
        ));
    }

    #[test]
    fn test_corrupt_bytes() {
        let source = InMemorySource::new();
        source.insert("demo/Bad", vec![0u8; 4]);
        let mut reflector = Reflector::new(&source);
        assert!(matches!(
            reflector.load("demo/Bad"),
            Err(SynthesisError::Decode { .. })
        ));
    }
}
