//! Programmatic class construction
//!
//! [`ClassBuilder`] assembles a [`ClassNode`] without going through an
//! encoder; method bodies are written with [`MethodBuilder`], which computes
//! stack and local bounds unless they are given explicitly.

use crate::class::{access, ClassNode, FieldNode, Marker, MethodNode};
use crate::descriptor::{Category, MethodDescriptor};
use crate::insn::{Constant, Insn, Label, MemberRef};
use crate::opcode::Opcode;
use crate::verify::{compute_max_locals, compute_max_stack};

/// Builder for a whole class
#[derive(Debug)]
pub struct ClassBuilder {
    class: ClassNode,
}

impl ClassBuilder {
    /// Start a public class with no superclass
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            class: ClassNode::new(name, None),
        }
    }

    /// Set the superclass
    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.class.super_name = Some(super_name.into());
        self
    }

    /// Add a declared interface
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.class.interfaces.push(interface.into());
        self
    }

    /// Replace the class access flags
    pub fn access(mut self, flags: u16) -> Self {
        self.class.access = flags;
        self
    }

    /// Set the source file tag
    pub fn source_file(mut self, source: impl Into<String>) -> Self {
        self.class.source_file = Some(source.into());
        self
    }

    /// Attach a class-level marker
    pub fn marker(mut self, marker: Marker) -> Self {
        self.class.markers.push(marker);
        self
    }

    /// Declare a field
    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.class.fields.push(FieldNode::new(access, name, descriptor));
        self
    }

    /// Declare a field carrying markers
    pub fn field_with(mut self, field: FieldNode) -> Self {
        self.class.fields.push(field);
        self
    }

    /// Declare a method and write its body
    pub fn method(
        mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut MethodBuilder),
    ) -> Self {
        let mut builder = MethodBuilder::new(&self.class.name, access, name, descriptor);
        body(&mut builder);
        self.class.methods.push(builder.finish());
        self
    }

    /// Declare a method without a body
    pub fn abstract_method(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.class
            .methods
            .push(MethodNode::new(access | access::ABSTRACT, name, descriptor));
        self
    }

    /// Finish the class
    pub fn build(self) -> ClassNode {
        self.class
    }
}

/// Builder for one method body
#[derive(Debug)]
pub struct MethodBuilder {
    owner: String,
    node: MethodNode,
    maxs: Option<(u16, u16)>,
}

impl MethodBuilder {
    /// Start a method owned by `owner`
    pub fn new(owner: &str, access: u16, name: &str, descriptor: &str) -> Self {
        Self {
            owner: owner.to_string(),
            node: MethodNode::new(access, name, descriptor),
            maxs: None,
        }
    }

    /// Internal name of the class being built
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Attach a marker to the method
    pub fn marker(&mut self, marker: Marker) -> &mut Self {
        self.node.markers.push(marker);
        self
    }

    /// Use explicit bounds instead of computing them
    pub fn maxs(&mut self, max_stack: u16, max_locals: u16) -> &mut Self {
        self.maxs = Some((max_stack, max_locals));
        self
    }

    /// Append any node
    pub fn emit(&mut self, insn: Insn) -> &mut Self {
        self.node.insns.push(insn);
        self
    }

    /// Append an operand-less opcode
    pub fn emit_op(&mut self, opcode: Opcode) -> &mut Self {
        self.emit(Insn::Simple(opcode))
    }

    // ===== Constants =====

    /// Push an int using the shortest encoding
    pub fn emit_push_int(&mut self, value: i32) -> &mut Self {
        let insn = match value {
            -1 => Insn::Simple(Opcode::IconstM1),
            0 => Insn::Simple(Opcode::Iconst0),
            1 => Insn::Simple(Opcode::Iconst1),
            2 => Insn::Simple(Opcode::Iconst2),
            3 => Insn::Simple(Opcode::Iconst3),
            4 => Insn::Simple(Opcode::Iconst4),
            5 => Insn::Simple(Opcode::Iconst5),
            -128..=127 => Insn::Int {
                opcode: Opcode::Bipush,
                value,
            },
            -32768..=32767 => Insn::Int {
                opcode: Opcode::Sipush,
                value,
            },
            _ => Insn::Ldc(Constant::Int(value)),
        };
        self.emit(insn)
    }

    /// Push a constant
    pub fn emit_ldc(&mut self, constant: Constant) -> &mut Self {
        self.emit(Insn::Ldc(constant))
    }

    /// Push null
    pub fn emit_null(&mut self) -> &mut Self {
        self.emit_op(Opcode::AconstNull)
    }

    // ===== Locals =====

    /// Load a local of the given category
    pub fn emit_load(&mut self, category: Category, slot: u16) -> &mut Self {
        self.emit(Insn::Var {
            opcode: category.load_opcode(),
            slot,
        })
    }

    /// Store into a local of the given category
    pub fn emit_store(&mut self, category: Category, slot: u16) -> &mut Self {
        self.emit(Insn::Var {
            opcode: category.store_opcode(),
            slot,
        })
    }

    /// ALOAD
    pub fn emit_aload(&mut self, slot: u16) -> &mut Self {
        self.emit_load(Category::Reference, slot)
    }

    /// ILOAD
    pub fn emit_iload(&mut self, slot: u16) -> &mut Self {
        self.emit_load(Category::SmallInt, slot)
    }

    /// LLOAD
    pub fn emit_lload(&mut self, slot: u16) -> &mut Self {
        self.emit_load(Category::WideInt, slot)
    }

    /// IINC
    pub fn emit_iinc(&mut self, slot: u16, delta: i16) -> &mut Self {
        self.emit(Insn::Iinc { slot, delta })
    }

    // ===== Members =====

    fn emit_field(&mut self, opcode: Opcode, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Insn::Field {
            opcode,
            member: MemberRef::new(owner, name, desc),
        })
    }

    /// GETFIELD
    pub fn emit_getfield(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit_field(Opcode::Getfield, owner, name, desc)
    }

    /// PUTFIELD
    pub fn emit_putfield(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit_field(Opcode::Putfield, owner, name, desc)
    }

    /// GETSTATIC
    pub fn emit_getstatic(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit_field(Opcode::Getstatic, owner, name, desc)
    }

    /// PUTSTATIC
    pub fn emit_putstatic(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit_field(Opcode::Putstatic, owner, name, desc)
    }

    /// Any invocation
    pub fn emit_invoke(&mut self, opcode: Opcode, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Insn::Method {
            opcode,
            member: MemberRef::new(owner, name, desc),
        })
    }

    /// INVOKEVIRTUAL
    pub fn emit_invokevirtual(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit_invoke(Opcode::Invokevirtual, owner, name, desc)
    }

    /// INVOKESPECIAL
    pub fn emit_invokespecial(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit_invoke(Opcode::Invokespecial, owner, name, desc)
    }

    /// INVOKESTATIC
    pub fn emit_invokestatic(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit_invoke(Opcode::Invokestatic, owner, name, desc)
    }

    /// INVOKEINTERFACE
    pub fn emit_invokeinterface(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit_invoke(Opcode::Invokeinterface, owner, name, desc)
    }

    // ===== Types =====

    /// NEW
    pub fn emit_new(&mut self, class: &str) -> &mut Self {
        self.emit(Insn::Type {
            opcode: Opcode::New,
            class: class.to_string(),
        })
    }

    /// CHECKCAST
    pub fn emit_checkcast(&mut self, class: &str) -> &mut Self {
        self.emit(Insn::Type {
            opcode: Opcode::Checkcast,
            class: class.to_string(),
        })
    }

    /// INSTANCEOF
    pub fn emit_instanceof(&mut self, class: &str) -> &mut Self {
        self.emit(Insn::Type {
            opcode: Opcode::Instanceof,
            class: class.to_string(),
        })
    }

    // ===== Control flow =====

    /// Allocate a label
    pub fn define_label(&mut self) -> Label {
        self.node.insns.new_label()
    }

    /// Place a label at the current position
    pub fn mark_label(&mut self, label: Label) -> &mut Self {
        self.emit(Insn::Label(label))
    }

    /// Branch to a label
    pub fn emit_jump(&mut self, opcode: Opcode, target: Label) -> &mut Self {
        self.emit(Insn::Jump { opcode, target })
    }

    /// Source line marker
    pub fn emit_line(&mut self, line: u32) -> &mut Self {
        self.emit(Insn::Line(line))
    }

    /// Return matching the method descriptor
    pub fn emit_return(&mut self) -> &mut Self {
        let category = MethodDescriptor::parse(&self.node.descriptor)
            .map(|d| d.return_category())
            .unwrap_or(Category::Void);
        self.emit_op(category.return_opcode())
    }

    /// Finish the method, filling in bounds
    pub fn finish(mut self) -> MethodNode {
        let (max_stack, max_locals) = match self.maxs {
            Some(maxs) => maxs,
            None => (
                compute_max_stack(&self.node.insns).unwrap_or(0),
                compute_max_locals(&self.node.descriptor, self.node.is_static(), &self.node.insns)
                    .unwrap_or(0),
            ),
        };
        self.node.max_stack = max_stack;
        self.node.max_locals = max_locals;
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::verify_class;

    #[test]
    fn test_build_counter() {
        let class = ClassBuilder::new("demo/Counter")
            .field(access::PRIVATE, "value", "I")
            .method(access::PUBLIC, "<init>", "(I)V", |m| {
                m.emit_aload(0)
                    .emit_iload(1)
                    .emit_putfield("demo/Counter", "value", "I")
                    .emit_return();
            })
            .method(access::PUBLIC, "get", "()I", |m| {
                m.emit_aload(0)
                    .emit_getfield("demo/Counter", "value", "I")
                    .emit_return();
            })
            .build();

        verify_class(&class).unwrap();
        let ctor = class.find_method("<init>", "(I)V").unwrap();
        assert_eq!((ctor.max_stack, ctor.max_locals), (2, 2));
        let get = class.find_method("get", "()I").unwrap();
        assert_eq!((get.max_stack, get.max_locals), (1, 1));
    }

    #[test]
    fn test_push_int_encodings() {
        let mut m = MethodBuilder::new("demo/A", access::STATIC, "f", "()V");
        m.emit_push_int(5).emit_push_int(100).emit_push_int(1000).emit_push_int(100_000);
        let node = m.finish();
        let insns = node.insns.as_slice();
        assert_eq!(insns[0], Insn::Simple(Opcode::Iconst5));
        assert_eq!(insns[1], Insn::Int { opcode: Opcode::Bipush, value: 100 });
        assert_eq!(insns[2], Insn::Int { opcode: Opcode::Sipush, value: 1000 });
        assert_eq!(insns[3], Insn::Ldc(Constant::Int(100_000)));
    }

    #[test]
    fn test_labels_and_explicit_maxs() {
        let mut m = MethodBuilder::new("demo/A", access::PUBLIC, "f", "(I)I");
        let done = m.define_label();
        m.emit_iload(1)
            .emit_jump(Opcode::Ifeq, done)
            .emit_push_int(7)
            .emit_return()
            .mark_label(done)
            .emit_push_int(0)
            .emit_return()
            .maxs(9, 9);
        let node = m.finish();
        assert_eq!((node.max_stack, node.max_locals), (9, 9));
        assert_eq!(compute_max_stack(&node.insns).unwrap(), 1);
    }
}
