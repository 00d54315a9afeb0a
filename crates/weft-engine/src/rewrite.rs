//! Instruction stream rewriting
//!
//! Template bodies reach the base implementation through a sentinel field:
//!
//! ```text
//! ALOAD 0
//! GETFIELD <template>.<sentinel>
//! CHECKCAST <type>
//! ...arguments...
//! INVOKEVIRTUAL m | GETFIELD f | PUTFIELD f
//! ```
//!
//! [`scan_super_accesses`] finds every such sequence up front and records it
//! as a [`SuperAccess`]. The [`Rewriter`] then copies the body in one pass:
//! the sentinel read and the cast are dropped, the trailing access is sent to
//! the shadow method or the base class, and every other reference to the
//! template is moved to the synthesized class.

use crate::classify::ClassifiedMembers;
use crate::error::{SynthesisError, SynthesisResult};
use crate::reflect::Hierarchy;
use rustc_hash::FxHashSet;
use weft_bytecode::{
    stack_effect, ClassNode, Insn, InsnList, Label, LabelMap, MemberRef, MethodNode, Opcode,
};

/// The template field that stands in for the base instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperHandle {
    /// Declaring class (the template)
    pub owner: String,
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
}

impl SuperHandle {
    /// Handle for a template's declared sentinel field, if it has one
    pub fn resolve(template: &ClassNode, field: &str) -> Option<Self> {
        template.find_field(field).map(|f| Self {
            owner: template.name.clone(),
            name: f.name.clone(),
            descriptor: f.descriptor.clone(),
        })
    }

    fn matches(&self, member: &MemberRef) -> bool {
        member.owner == self.owner && member.name == self.name
    }
}

/// One recognized super access, as node indices into the source body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperAccess {
    /// `ALOAD 0`, kept
    pub receiver: usize,
    /// Sentinel read, dropped
    pub read: usize,
    /// Cast of the sentinel value, dropped
    pub cast: usize,
    /// Method call or field access on the base instance
    pub trailing: usize,
}

/// Counts reported back to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Super accesses rewritten
    pub super_accesses: usize,
    /// References moved from the template to the synthesized class
    pub redirections: usize,
}

impl std::ops::AddAssign for RewriteStats {
    fn add_assign(&mut self, other: Self) {
        self.super_accesses += other.super_accesses;
        self.redirections += other.redirections;
    }
}

fn assumption(class: &str, method: &MethodNode, index: usize, reason: impl Into<String>) -> SynthesisError {
    SynthesisError::RewriteAssumption {
        method: format!("{}.{}{}", class, method.name, method.descriptor),
        index,
        reason: reason.into(),
    }
}

/// Nearest real node before or after `from`, skipping line markers
fn neighbour(body: &[Insn], from: usize, forward: bool) -> Option<usize> {
    let mut index = from;
    loop {
        index = if forward {
            index.checked_add(1).filter(|i| *i < body.len())?
        } else {
            index.checked_sub(1)?
        };
        if !matches!(body[index], Insn::Line(_)) {
            return Some(index);
        }
    }
}

/// Find every super access in a template body
///
/// Fails on any use of the sentinel field outside the recognized shape.
pub fn scan_super_accesses(
    class: &str,
    method: &MethodNode,
    handle: &SuperHandle,
) -> SynthesisResult<Vec<SuperAccess>> {
    let body = method.insns.as_slice();
    let mut accesses = Vec::new();

    for (index, insn) in body.iter().enumerate() {
        let Insn::Field { opcode, member } = insn else {
            continue;
        };
        if !handle.matches(member) {
            continue;
        }
        if *opcode != Opcode::Getfield {
            return Err(assumption(class, method, index, format!("{} of the super field", opcode)));
        }

        let receiver = neighbour(body, index, false)
            .filter(|i| matches!(body[*i], Insn::Var { opcode: Opcode::Aload, slot: 0 }))
            .ok_or_else(|| assumption(class, method, index, "super field read without ALOAD 0"))?;
        let cast = neighbour(body, index, true)
            .filter(|i| matches!(body[*i], Insn::Type { opcode: Opcode::Checkcast, .. }))
            .ok_or_else(|| assumption(class, method, index, "super field read without CHECKCAST"))?;
        let trailing = trailing_access(class, method, cast)?;

        accesses.push(SuperAccess {
            receiver,
            read: index,
            cast,
            trailing,
        });
    }

    Ok(accesses)
}

/// The node that consumes the cast base instance
///
/// Only straight-line argument pushes may sit between the cast and the
/// access.
fn trailing_access(class: &str, method: &MethodNode, cast: usize) -> SynthesisResult<usize> {
    let body = method.insns.as_slice();
    // words on the stack from the base instance upward
    let mut depth: u16 = 1;

    for (index, insn) in body.iter().enumerate().skip(cast + 1) {
        match insn {
            Insn::Line(_) => continue,
            Insn::Label(_) | Insn::Jump { .. } => {
                return Err(assumption(class, method, index, "control flow inside a super access"))
            }
            Insn::Simple(op) if op.is_return() => {
                return Err(assumption(class, method, index, "return inside a super access"))
            }
            _ => {}
        }

        let (pops, pushes) =
            stack_effect(insn).map_err(|e| assumption(class, method, index, e.to_string()))?;
        if pops < depth {
            depth = depth - pops + pushes;
            continue;
        }

        let is_access = pops == depth
            && match insn {
                Insn::Method { opcode, .. } => *opcode != Opcode::Invokestatic,
                Insn::Field { opcode, .. } => {
                    matches!(opcode, Opcode::Getfield | Opcode::Putfield)
                }
                _ => false,
            };
        if is_access {
            return Ok(index);
        }
        return Err(assumption(
            class,
            method,
            index,
            format!("base instance consumed by {}", insn),
        ));
    }

    Err(assumption(class, method, cast, "super access has no trailing member access"))
}

/// Rewrites template bodies for one synthesized class
pub struct Rewriter<'a> {
    /// Template class name
    pub template: &'a str,
    /// Synthesized class name
    pub synthesized: &'a str,
    /// Base class and ancestors
    pub hierarchy: &'a Hierarchy,
    /// Classification of the template
    pub members: &'a ClassifiedMembers,
    /// Sentinel field, None if the template declares none
    pub handle: Option<&'a SuperHandle>,
    /// Name prefix of shadow methods
    pub shadow_prefix: &'a str,
}

impl<'a> Rewriter<'a> {
    /// Rewrite a body into a fresh list
    pub fn rewrite(&self, method: &MethodNode) -> SynthesisResult<(InsnList, RewriteStats)> {
        let mut insns = InsnList::new();
        let stats = self.rewrite_into(method, &mut insns, None)?;
        Ok((insns, stats))
    }

    /// Append a rewritten copy of a body to `dest`
    ///
    /// With an `exit` label, `RETURN` becomes a jump to it so the copy can be
    /// spliced ahead of more code.
    pub fn rewrite_into(
        &self,
        method: &MethodNode,
        dest: &mut InsnList,
        exit: Option<Label>,
    ) -> SynthesisResult<RewriteStats> {
        let accesses = match self.handle {
            Some(handle) => scan_super_accesses(self.template, method, handle)?,
            None => Vec::new(),
        };
        let elided: FxHashSet<usize> = accesses.iter().flat_map(|a| [a.read, a.cast]).collect();
        let trailing: FxHashSet<usize> = accesses.iter().map(|a| a.trailing).collect();

        let mut stats = RewriteStats::default();
        let labels = LabelMap::new(&method.insns, dest);

        for (index, insn) in method.insns.iter().enumerate() {
            if elided.contains(&index) {
                continue;
            }

            let rewritten = if trailing.contains(&index) {
                stats.super_accesses += 1;
                self.super_target(method, index, insn)?
            } else {
                self.redirect(insn, &mut stats)
            };

            let rewritten = match (labels.remap(&rewritten), exit) {
                (Insn::Simple(Opcode::Return), Some(exit)) => Insn::Jump {
                    opcode: Opcode::Goto,
                    target: exit,
                },
                (other, _) => other,
            };
            dest.push(rewritten);
        }

        Ok(stats)
    }

    /// Replacement for the trailing access of a super access
    fn super_target(&self, method: &MethodNode, index: usize, insn: &Insn) -> SynthesisResult<Insn> {
        let base = self.hierarchy.base().name.as_str();

        match insn {
            Insn::Method { member, .. } => {
                let descriptor = self.members.effective_descriptor(&member.name, &member.descriptor);

                if let Some(over) = self.members.override_for(&member.name, descriptor) {
                    let shadow = over.shadow.as_ref().ok_or_else(|| {
                        assumption(
                            self.template,
                            method,
                            index,
                            format!("super access to abstract method {}", over.signature),
                        )
                    })?;
                    let target = MemberRef::new(
                        self.synthesized,
                        format!("{}{}", self.shadow_prefix, member.name),
                        shadow.descriptor.clone(),
                    );
                    tracing::debug!(from = %member, to = %target, "super access to shadow");
                    return Ok(Insn::Method {
                        opcode: Opcode::Invokespecial,
                        member: target,
                    });
                }

                match self.hierarchy.find_method(&member.name, descriptor) {
                    Some((owner, declared)) if declared.is_abstract() || declared.is_static() => {
                        Err(assumption(
                            self.template,
                            method,
                            index,
                            format!(
                                "super access to {} method {}.{}{}",
                                if declared.is_static() { "static" } else { "abstract" },
                                owner.name,
                                declared.name,
                                declared.descriptor
                            ),
                        ))
                    }
                    Some(_) => {
                        let target = MemberRef::new(base, member.name.clone(), descriptor);
                        tracing::debug!(from = %member, to = %target, "super access to base");
                        Ok(Insn::Method {
                            opcode: Opcode::Invokespecial,
                            member: target,
                        })
                    }
                    None => Err(SynthesisError::UnresolvedReference {
                        class: self.synthesized.to_string(),
                        member: format!("{}.{}{}", base, member.name, descriptor),
                    }),
                }
            }
            Insn::Field { opcode, member } => {
                let target = member.with_owner(self.synthesized);
                tracing::debug!(from = %member, to = %target, "super access to field");
                Ok(Insn::Field {
                    opcode: *opcode,
                    member: target,
                })
            }
            other => Err(assumption(
                self.template,
                method,
                index,
                format!("unexpected trailing {}", other),
            )),
        }
    }

    /// Move a template-owned reference to the synthesized class
    fn redirect(&self, insn: &Insn, stats: &mut RewriteStats) -> Insn {
        let redirected = match insn {
            Insn::Field { opcode, member } if member.owner == self.template => Insn::Field {
                opcode: *opcode,
                member: member.with_owner(self.synthesized),
            },
            Insn::Method { opcode, member } if member.owner == self.template => Insn::Method {
                opcode: *opcode,
                member: MemberRef::new(
                    self.synthesized,
                    member.name.clone(),
                    self.members.effective_descriptor(&member.name, &member.descriptor),
                ),
            },
            Insn::Type { opcode, class } if class == self.template => Insn::Type {
                opcode: *opcode,
                class: self.synthesized.to_string(),
            },
            other => return other.clone(),
        };

        stats.redirections += 1;
        tracing::debug!(from = %insn, to = %redirected, "redirected template reference");
        redirected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::directive::TemplateSpec;
    use crate::reflect::Reflector;
    use weft_bytecode::{access, ClassBuilder, MethodBuilder};
    use weft_core::InMemorySource;

    const OBJ: &str = "Lweft/lang/Object;";

    fn handle() -> SuperHandle {
        SuperHandle {
            owner: "demo/Tpl".to_string(),
            name: "_super".to_string(),
            descriptor: OBJ.to_string(),
        }
    }

    fn body(build: impl FnOnce(&mut MethodBuilder)) -> MethodNode {
        let mut m = MethodBuilder::new("demo/Tpl", access::PUBLIC, "get", "()I");
        build(&mut m);
        m.finish()
    }

    fn super_get(m: &mut MethodBuilder) -> &mut MethodBuilder {
        m.emit_aload(0)
            .emit_getfield("demo/Tpl", "_super", OBJ)
            .emit_checkcast("demo/Base")
    }

    #[test]
    fn test_scan_simple_access() {
        let method = body(|m| {
            super_get(m)
                .emit_invokevirtual("demo/Base", "get", "()I")
                .emit_return();
        });
        let found = scan_super_accesses("demo/Tpl", &method, &handle()).unwrap();
        assert_eq!(
            found,
            vec![SuperAccess {
                receiver: 0,
                read: 1,
                cast: 2,
                trailing: 3
            }]
        );
    }

    #[test]
    fn test_scan_access_with_arguments() {
        let method = body(|m| {
            super_get(m)
                .emit_push_int(4)
                .emit_lload(1)
                .emit_invokevirtual("demo/Base", "scale", "(IJ)I")
                .emit_return();
        });
        let found = scan_super_accesses("demo/Tpl", &method, &handle()).unwrap();
        assert_eq!(found[0].trailing, 5);
    }

    #[test]
    fn test_scan_rejects_missing_cast() {
        let method = body(|m| {
            m.emit_aload(0)
                .emit_getfield("demo/Tpl", "_super", OBJ)
                .emit_invokevirtual("weft/lang/Object", "hash", "()I")
                .emit_return();
        });
        assert!(matches!(
            scan_super_accesses("demo/Tpl", &method, &handle()),
            Err(SynthesisError::RewriteAssumption { index: 1, .. })
        ));
    }

    #[test]
    fn test_scan_rejects_escaping_instance() {
        let method = body(|m| {
            super_get(m).emit_op(Opcode::Pop).emit_push_int(0).emit_return();
        });
        assert!(matches!(
            scan_super_accesses("demo/Tpl", &method, &handle()),
            Err(SynthesisError::RewriteAssumption { index: 3, .. })
        ));
    }

    #[test]
    fn test_scan_rejects_sentinel_write() {
        let method = body(|m| {
            m.emit_aload(0)
                .emit_null()
                .emit_putfield("demo/Tpl", "_super", OBJ)
                .emit_push_int(0)
                .emit_return();
        });
        assert!(scan_super_accesses("demo/Tpl", &method, &handle()).is_err());
    }

    fn fixture() -> (Hierarchy, ClassNode) {
        let source = InMemorySource::new();
        let base = ClassBuilder::new("demo/Base")
            .method(access::PUBLIC, "get", "()I", |m| {
                m.emit_push_int(1).emit_return();
            })
            .method(access::PUBLIC, "other", "()I", |m| {
                m.emit_push_int(7).emit_return();
            })
            .build();
        source.insert("demo/Base", base.encode());
        let hierarchy = Reflector::new(&source).hierarchy("demo/Base").unwrap();

        let template = ClassBuilder::new("demo/Tpl")
            .field(access::PUBLIC, "_super", OBJ)
            .field(access::PUBLIC, "bonus", "I")
            .method(access::PUBLIC, "get", "()I", |m| {
                let skip = m.define_label();
                m.emit_line(10);
                super_get(m)
                    .emit_invokevirtual("demo/Base", "get", "()I")
                    .emit_aload(0)
                    .emit_getfield("demo/Tpl", "bonus", "I")
                    .emit_op(Opcode::Iadd)
                    .emit_op(Opcode::Dup)
                    .emit_jump(Opcode::Ifeq, skip)
                    .mark_label(skip);
                super_get(m)
                    .emit_invokevirtual("demo/Base", "other", "()I")
                    .emit_op(Opcode::Iadd)
                    .emit_return();
            })
            .build();
        (hierarchy, template)
    }

    #[test]
    fn test_rewrite_body() {
        let (hierarchy, template) = fixture();
        let spec = TemplateSpec::new().override_method("get", "()I").export("bonus", "I");
        let members = classify(&template, &spec, &hierarchy).unwrap();
        let handle = SuperHandle::resolve(&template, "_super").unwrap();
        let rewriter = Rewriter {
            template: "demo/Tpl",
            synthesized: "demo/Out",
            hierarchy: &hierarchy,
            members: &members,
            handle: Some(&handle),
            shadow_prefix: "default_",
        };

        let source = template.find_method("get", "()I").unwrap();
        let (insns, stats) = rewriter.rewrite(source).unwrap();
        assert_eq!(stats.super_accesses, 2);
        assert_eq!(stats.redirections, 1);

        let calls: Vec<String> = insns
            .iter()
            .filter(|i| matches!(i, Insn::Method { .. } | Insn::Field { .. }))
            .map(|i| i.to_string())
            .collect();
        assert_eq!(
            calls,
            vec![
                Insn::Method {
                    opcode: Opcode::Invokespecial,
                    member: MemberRef::new("demo/Out", "default_get", "()I"),
                }
                .to_string(),
                Insn::Field {
                    opcode: Opcode::Getfield,
                    member: MemberRef::new("demo/Out", "bonus", "I"),
                }
                .to_string(),
                Insn::Method {
                    opcode: Opcode::Invokespecial,
                    member: MemberRef::new("demo/Base", "other", "()I"),
                }
                .to_string(),
            ]
        );
        assert!(!insns.iter().any(|i| matches!(i, Insn::Type { .. })));
        // sentinel reads and casts are gone, line markers kept
        assert_eq!(insns.len(), source.insns.len() - 4);
    }

    #[test]
    fn test_splice_turns_return_into_exit_jump() {
        let (hierarchy, template) = fixture();
        let members = classify(&template, &TemplateSpec::new(), &hierarchy).unwrap();
        let rewriter = Rewriter {
            template: "demo/Tpl",
            synthesized: "demo/Out",
            hierarchy: &hierarchy,
            members: &members,
            handle: None,
            shadow_prefix: "default_",
        };
        let mut method = MethodBuilder::new("demo/Tpl", access::PUBLIC, "init", "()V").finish();
        method.insns.push(Insn::Simple(Opcode::Return));

        let mut dest = InsnList::new();
        let exit = dest.new_label();
        rewriter.rewrite_into(&method, &mut dest, Some(exit)).unwrap();
        assert_eq!(
            dest.as_slice(),
            &[Insn::Jump {
                opcode: Opcode::Goto,
                target: exit
            }]
        );
    }
}
