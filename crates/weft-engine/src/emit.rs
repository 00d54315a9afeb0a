//! Class assembly
//!
//! Builds the synthesized class from classified members: exported fields,
//! one constructor per base constructor, a shadow and an override per
//! overridden method, then implementations. The result is verified before it
//! is handed to the loader.
//!
//! A delegated override does not copy the template body. It points the
//! sentinel of the template instance held in the class's template slot at
//! the receiver and calls the template method on that instance.

use crate::classify::{ClassifiedMembers, ConstructorMapping, OverrideMapping};
use crate::error::{SynthesisError, SynthesisResult};
use crate::mapping::MemberSignature;
use crate::options::SynthOptions;
use crate::reflect::Hierarchy;
use crate::rewrite::{RewriteStats, Rewriter, SuperHandle};
use weft_bytecode::class::{flags, CONSTRUCTOR_NAME};
use weft_bytecode::{
    access, verify_class, ClassNode, FieldNode, FieldType, Insn, InsnList, MemberRef,
    MethodDescriptor, MethodNode, Opcode,
};

/// Assembles one synthesized class
pub struct ClassEmitter<'a> {
    /// Output class name
    pub name: &'a str,
    /// Template class
    pub template: &'a ClassNode,
    /// Base class and ancestors
    pub hierarchy: &'a Hierarchy,
    /// Classified template members
    pub members: &'a ClassifiedMembers,
    /// Sentinel field of the template
    pub handle: Option<&'a SuperHandle>,
    /// Naming options
    pub options: &'a SynthOptions,
}

/// An assembled class and what rewriting did to it
#[derive(Debug, Clone)]
pub struct Emitted {
    /// The synthesized class
    pub class: ClassNode,
    /// Shadow methods generated, by name and descriptor
    pub shadows: Vec<MemberSignature>,
    /// Static field holding the template instance, when any override delegates
    pub template_slot: Option<String>,
    /// Totals over all rewritten bodies
    pub stats: RewriteStats,
}

impl<'a> ClassEmitter<'a> {
    fn rewriter(&self) -> Rewriter<'_> {
        Rewriter {
            template: &self.template.name,
            synthesized: self.name,
            hierarchy: self.hierarchy,
            members: self.members,
            handle: self.handle,
            shadow_prefix: &self.options.shadow_prefix,
        }
    }

    fn template_method(&self, signature: &MemberSignature) -> SynthesisResult<&'a MethodNode> {
        self.template
            .find_method(&signature.name, &signature.descriptor)
            .ok_or_else(|| {
                SynthesisError::Configuration(format!(
                    "template {} declares no method {}",
                    self.template.name, signature
                ))
            })
    }

    /// Assemble, verify and return the class
    pub fn emit(&self) -> SynthesisResult<Emitted> {
        let base = self.hierarchy.base();
        let mut class = ClassNode::new(self.name, Some(base.name.clone()));
        class.flags = flags::SYNTHESIZED;
        class.access = access::PUBLIC | access::SUPER;
        class.interfaces = self.template.interfaces.clone();
        class.source_file = Some(self.options.source_file.clone());
        class.fields = self.members.exported_fields.clone();

        let mut emitted = Emitted {
            class,
            shadows: Vec::new(),
            template_slot: None,
            stats: RewriteStats::default(),
        };

        if self.members.delegates() {
            let slot = &self.options.template_field;
            if emitted.class.find_field(slot).is_some() {
                return Err(SynthesisError::Configuration(format!(
                    "exported field {} collides with the template slot",
                    slot
                )));
            }
            emitted.class.fields.push(FieldNode::new(
                access::PUBLIC | access::STATIC,
                slot.clone(),
                FieldType::object(&self.template.name).to_string(),
            ));
            emitted.template_slot = Some(slot.clone());
        }

        for ctor in &self.members.constructors {
            let method = self.constructor(ctor, &mut emitted.stats)?;
            add_method(&mut emitted.class, method)?;
        }

        for over in &self.members.overrides {
            if let Some(shadow) = self.shadow(over)? {
                emitted.shadows.push(MemberSignature::of_method(&shadow));
                add_method(&mut emitted.class, shadow)?;
            }
            let method = if over.delegated {
                self.delegating_override(over)?
            } else {
                self.override_method(over, &mut emitted.stats)?
            };
            add_method(&mut emitted.class, method)?;
        }

        for implementation in &self.members.implementations {
            let source = self.template_method(&implementation.source)?;
            let (insns, stats) = self.rewriter().rewrite(source)?;
            emitted.stats += stats;

            let mut method = MethodNode::new(
                implementation.access & !access::ABSTRACT,
                implementation.signature.name.clone(),
                implementation.signature.descriptor.clone(),
            );
            method.insns = insns;
            method.max_stack = source.max_stack;
            method.max_locals = source.max_locals;
            add_method(&mut emitted.class, method)?;
        }

        verify_class(&emitted.class)?;
        if self.options.verify_references {
            check_references(&emitted.class, self.hierarchy)?;
        }

        tracing::debug!(
            class = self.name,
            fields = emitted.class.fields.len(),
            methods = emitted.class.methods.len(),
            super_accesses = emitted.stats.super_accesses,
            redirections = emitted.stats.redirections,
            "assembled class"
        );
        Ok(emitted)
    }

    /// Call the base constructor with the same arguments, then the initializer
    fn constructor(
        &self,
        ctor: &ConstructorMapping,
        stats: &mut RewriteStats,
    ) -> SynthesisResult<MethodNode> {
        let base = &self.hierarchy.base().name;
        let desc = MethodDescriptor::parse(&ctor.descriptor)?;
        let param_slots = desc.param_slots();

        let mut insns = InsnList::new();
        insns.push(Insn::Var {
            opcode: Opcode::Aload,
            slot: 0,
        });
        let mut slot = 1;
        for param in &desc.params {
            insns.push(Insn::Var {
                opcode: param.category().load_opcode(),
                slot,
            });
            slot += param.slot_size();
        }
        insns.push(Insn::Method {
            opcode: Opcode::Invokespecial,
            member: MemberRef::new(base.as_str(), CONSTRUCTOR_NAME, ctor.descriptor.as_str()),
        });

        let mut max_stack = 1 + param_slots;
        let mut max_locals = 1 + param_slots;

        if let Some(initializer) = &ctor.initializer {
            let source = self.template_method(initializer)?;
            let exit = insns.new_label();
            *stats += self.rewriter().rewrite_into(source, &mut insns, Some(exit))?;
            insns.push(Insn::Label(exit));
            max_stack += source.max_stack;
            max_locals += source.max_locals;
        }
        insns.push(Insn::Simple(Opcode::Return));

        let mut method = MethodNode::new(access::PUBLIC, CONSTRUCTOR_NAME, ctor.descriptor.clone());
        method.insns = insns;
        method.max_stack = max_stack;
        method.max_locals = max_locals;
        Ok(method)
    }

    /// Copy of the nearest base body under the shadow name
    fn shadow(&self, over: &OverrideMapping) -> SynthesisResult<Option<MethodNode>> {
        let Some(source) = &over.shadow else {
            return Ok(None);
        };
        let (_, declared) = self
            .hierarchy
            .find_method(&over.signature.name, &source.descriptor)
            .ok_or_else(|| {
                SynthesisError::MissingSource(format!(
                    "{}.{}{}",
                    source.owner, over.signature.name, source.descriptor
                ))
            })?;

        let mut method = MethodNode::new(
            access::PUBLIC,
            format!("{}{}", self.options.shadow_prefix, over.signature.name),
            source.descriptor.clone(),
        );
        method
            .insns
            .append_copy(&declared.insns, |insn| !matches!(insn, Insn::Line(_)));
        method.max_stack = declared.max_stack;
        method.max_locals = declared.max_locals;
        Ok(Some(method))
    }

    fn override_method(
        &self,
        over: &OverrideMapping,
        stats: &mut RewriteStats,
    ) -> SynthesisResult<MethodNode> {
        let source = self.template_method(&over.source)?;
        let (insns, rewritten) = self.rewriter().rewrite(source)?;
        *stats += rewritten;

        let param_slots = over.signature.parsed()?.param_slots();
        let mut method = MethodNode::new(
            access::PUBLIC,
            over.signature.name.clone(),
            over.signature.descriptor.clone(),
        );
        method.insns = insns;
        method.max_stack = 1 + param_slots + source.max_stack;
        method.max_locals = 1 + param_slots + source.max_locals;
        Ok(method)
    }

    /// Bind the sentinel to the receiver and call the template instance
    fn delegating_override(&self, over: &OverrideMapping) -> SynthesisResult<MethodNode> {
        let template = &self.template.name;
        let instance_type = FieldType::object(template).to_string();
        let effective = over.signature.parsed()?;
        let declared = over.source.parsed()?;
        let param_slots = effective.param_slots();

        let mut insns = InsnList::new();
        insns.push(Insn::Field {
            opcode: Opcode::Getstatic,
            member: MemberRef::new(
                self.name,
                self.options.template_field.as_str(),
                instance_type.as_str(),
            ),
        });
        if let Some(handle) = self.handle {
            insns.push(Insn::Simple(Opcode::Dup));
            insns.push(Insn::Var {
                opcode: Opcode::Aload,
                slot: 0,
            });
            insns.push(Insn::Field {
                opcode: Opcode::Putfield,
                member: MemberRef::new(
                    handle.owner.as_str(),
                    handle.name.as_str(),
                    handle.descriptor.as_str(),
                ),
            });
        }
        let mut slot = 1;
        for param in &effective.params {
            insns.push(Insn::Var {
                opcode: param.category().load_opcode(),
                slot,
            });
            slot += param.slot_size();
        }
        insns.push(Insn::Method {
            opcode: Opcode::Invokevirtual,
            member: MemberRef::new(
                template.as_str(),
                over.source.name.as_str(),
                over.source.descriptor.as_str(),
            ),
        });
        if let Some(FieldType::Object(class)) = &effective.ret {
            if effective.ret != declared.ret {
                insns.push(Insn::Type {
                    opcode: Opcode::Checkcast,
                    class: class.clone(),
                });
            }
        }
        insns.push(Insn::Simple(effective.return_category().return_opcode()));

        let mut method = MethodNode::new(
            access::PUBLIC,
            over.signature.name.clone(),
            over.signature.descriptor.clone(),
        );
        method.insns = insns;
        // instance, sentinel store pair and arguments
        method.max_stack = 3 + param_slots.max(effective.return_slots());
        method.max_locals = 1 + param_slots;
        Ok(method)
    }
}

fn add_method(class: &mut ClassNode, method: MethodNode) -> SynthesisResult<()> {
    if class.find_method(&method.name, &method.descriptor).is_some() {
        return Err(SynthesisError::Configuration(format!(
            "{} would declare {}{} twice",
            class.name, method.name, method.descriptor
        )));
    }
    class.methods.push(method);
    Ok(())
}

/// Every reference owned by the class must name a member it declares or inherits
pub fn check_references(class: &ClassNode, hierarchy: &Hierarchy) -> SynthesisResult<()> {
    for method in &class.methods {
        for insn in &method.insns {
            let resolves = match insn {
                Insn::Method { member, .. } if member.owner == class.name => {
                    class.find_method(&member.name, &member.descriptor).is_some()
                        || hierarchy.find_method(&member.name, &member.descriptor).is_some()
                }
                Insn::Field { member, .. } if member.owner == class.name => {
                    class.find_field(&member.name).is_some()
                        || hierarchy.find_field(&member.name).is_some()
                }
                _ => true,
            };
            if !resolves {
                let member = insn.member().map(|m| m.to_string()).unwrap_or_default();
                return Err(SynthesisError::UnresolvedReference {
                    class: class.name.clone(),
                    member,
                });
            }
        }
    }
    Ok(())
}
