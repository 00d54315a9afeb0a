//! Structural verification of method bodies
//!
//! Checks that a body can be executed without the interpreter running off
//! its declared bounds: labels resolve, locals stay within `max_locals`, the
//! operand stack never underflows, agrees at merge points and stays within
//! `max_stack`, and control never falls off the end.

use crate::class::{ClassNode, MethodNode};
use crate::descriptor::{Category, DescriptorError, MethodDescriptor};
use crate::insn::{Insn, InsnList, Label};
use crate::opcode::{Opcode, OperandForm};
use rustc_hash::FxHashMap;

/// Verification errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyError {
    /// Branch to a label that is never placed
    #[error("Undefined label {label} at instruction {index}")]
    UndefinedLabel { label: Label, index: usize },

    /// Label placed twice
    #[error("Label {0} is defined more than once")]
    DuplicateLabel(Label),

    /// Operand kind does not match the opcode
    #[error("Malformed {opcode} at instruction {index}")]
    MalformedInsn { opcode: Opcode, index: usize },

    /// Local slot outside `max_locals`
    #[error("Invalid local {slot} (max {max}) at instruction {index}")]
    InvalidLocal { slot: u16, max: u16, index: usize },

    /// Pop from an empty stack
    #[error("Stack underflow at instruction {0}")]
    StackUnderflow(usize),

    /// Stack deeper than `max_stack`
    #[error("Stack overflow at instruction {index} (depth {depth}, max {max})")]
    StackOverflow { index: usize, depth: u16, max: u16 },

    /// Two paths reach an instruction with different depths
    #[error("Stack depth mismatch at instruction {index}: {expected} vs {found}")]
    StackMismatch {
        index: usize,
        expected: u16,
        found: u16,
    },

    /// Control reaches the end of the body
    #[error("Execution falls off end of body")]
    FallOffEnd,

    /// Return opcode disagrees with the method descriptor
    #[error("{found} at instruction {index} does not match return type ({expected})")]
    ReturnMismatch {
        index: usize,
        found: Opcode,
        expected: Opcode,
    },

    /// Abstract method with a body, or concrete method without one
    #[error("Body presence does not match abstract flag")]
    BodyMismatch,

    /// Malformed descriptor
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Error inside a particular method
    #[error("{class}.{method}{descriptor}: {error}")]
    InMethod {
        class: String,
        method: String,
        descriptor: String,
        error: Box<VerifyError>,
    },
}

/// Verify every method of a class
pub fn verify_class(class: &ClassNode) -> Result<(), VerifyError> {
    for method in &class.methods {
        verify_method(method).map_err(|error| VerifyError::InMethod {
            class: class.name.clone(),
            method: method.name.clone(),
            descriptor: method.descriptor.clone(),
            error: Box::new(error),
        })?;
    }
    Ok(())
}

/// Verify a single method
pub fn verify_method(method: &MethodNode) -> Result<(), VerifyError> {
    let descriptor = MethodDescriptor::parse(&method.descriptor)?;

    if method.is_abstract() {
        return if method.insns.real_len() == 0 {
            Ok(())
        } else {
            Err(VerifyError::BodyMismatch)
        };
    }
    if method.insns.real_len() == 0 {
        return Err(VerifyError::BodyMismatch);
    }

    let receiver = u16::from(!method.is_static());
    let min_locals = descriptor.param_slots() + receiver;
    if min_locals > method.max_locals {
        return Err(VerifyError::InvalidLocal {
            slot: min_locals.saturating_sub(1),
            max: method.max_locals,
            index: 0,
        });
    }

    verify_locals(&method.insns, method.max_locals)?;
    verify_returns(&method.insns, descriptor.return_category())?;
    analyze_stack(&method.insns, Some(method.max_stack))?;
    Ok(())
}

/// Deepest operand stack any path through `insns` reaches, in words
pub fn compute_max_stack(insns: &InsnList) -> Result<u16, VerifyError> {
    analyze_stack(insns, None)
}

/// Local slots needed by a body with the given descriptor
pub fn compute_max_locals(
    descriptor: &str,
    is_static: bool,
    insns: &InsnList,
) -> Result<u16, VerifyError> {
    let params = MethodDescriptor::parse(descriptor)?.param_slots() + u16::from(!is_static);
    let used = insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Var { opcode, slot } => Some(slot + var_size(*opcode)),
            Insn::Iinc { slot, .. } => Some(slot + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    Ok(params.max(used))
}

fn var_size(opcode: Opcode) -> u16 {
    match opcode {
        Opcode::Lload | Opcode::Dload | Opcode::Lstore | Opcode::Dstore => 2,
        _ => 1,
    }
}

fn verify_locals(insns: &InsnList, max: u16) -> Result<(), VerifyError> {
    for (index, insn) in insns.iter().enumerate() {
        let (slot, end) = match insn {
            Insn::Var { opcode, slot } => (*slot, u32::from(*slot) + u32::from(var_size(*opcode))),
            Insn::Iinc { slot, .. } => (*slot, u32::from(*slot) + 1),
            _ => continue,
        };
        if end > u32::from(max) {
            return Err(VerifyError::InvalidLocal { slot, max, index });
        }
    }
    Ok(())
}

fn verify_returns(insns: &InsnList, category: Category) -> Result<(), VerifyError> {
    let expected = category.return_opcode();
    for (index, insn) in insns.iter().enumerate() {
        if let Insn::Simple(op) = insn {
            if op.is_return() && *op != expected {
                return Err(VerifyError::ReturnMismatch {
                    index,
                    found: *op,
                    expected,
                });
            }
        }
    }
    Ok(())
}

fn check_form(insn: &Insn, index: usize) -> Result<(), VerifyError> {
    let (opcode, form) = match insn {
        Insn::Simple(op) => (*op, OperandForm::None),
        Insn::Int { opcode, .. } => (*opcode, OperandForm::Int),
        Insn::Var { opcode, .. } => (*opcode, OperandForm::Var),
        Insn::Type { opcode, .. } => (*opcode, OperandForm::Type),
        Insn::Field { opcode, .. } => (*opcode, OperandForm::Field),
        Insn::Method { opcode, .. } => (*opcode, OperandForm::Method),
        Insn::Jump { opcode, .. } => (*opcode, OperandForm::Jump),
        Insn::Ldc(_) | Insn::Iinc { .. } | Insn::Label(_) | Insn::Line(_) => return Ok(()),
    };
    if opcode.form() != form {
        return Err(VerifyError::MalformedInsn { opcode, index });
    }
    Ok(())
}

/// Words popped and pushed by one node
///
/// Pseudo nodes have no effect.
pub fn stack_effect(insn: &Insn) -> Result<(u16, u16), VerifyError> {
    let effect = match insn {
        Insn::Label(_) | Insn::Line(_) => (0, 0),
        Insn::Ldc(constant) => (0, constant.slot_size()),
        Insn::Field { opcode, member } => {
            let size = Category::from_descriptor(&member.descriptor).slot_size();
            match opcode {
                Opcode::Getfield => (1, size),
                Opcode::Putfield => (1 + size, 0),
                Opcode::Getstatic => (0, size),
                _ => (size, 0),
            }
        }
        Insn::Method { opcode, member } => {
            let desc = MethodDescriptor::parse(&member.descriptor)?;
            let receiver = u16::from(*opcode != Opcode::Invokestatic);
            (desc.param_slots() + receiver, desc.return_slots())
        }
        other => other
            .opcode()
            .and_then(Opcode::stack_effect)
            .unwrap_or((0, 0)),
    };
    Ok(effect)
}

fn analyze_stack(insns: &InsnList, limit: Option<u16>) -> Result<u16, VerifyError> {
    let body = insns.as_slice();

    let mut labels: FxHashMap<Label, usize> = FxHashMap::default();
    for (index, insn) in body.iter().enumerate() {
        check_form(insn, index)?;
        if let Insn::Label(label) = insn {
            if labels.insert(*label, index).is_some() {
                return Err(VerifyError::DuplicateLabel(*label));
            }
        }
    }
    for (index, insn) in body.iter().enumerate() {
        if let Insn::Jump { target, .. } = insn {
            if !labels.contains_key(target) {
                return Err(VerifyError::UndefinedLabel {
                    label: *target,
                    index,
                });
            }
        }
    }

    let mut depths: Vec<Option<u16>> = vec![None; body.len()];
    let mut work: Vec<(usize, u16)> = vec![(0, 0)];
    let mut max_depth = 0u16;

    while let Some((index, depth)) = work.pop() {
        let Some(insn) = body.get(index) else {
            return Err(VerifyError::FallOffEnd);
        };
        match depths[index] {
            Some(seen) if seen == depth => continue,
            Some(seen) => {
                return Err(VerifyError::StackMismatch {
                    index,
                    expected: seen,
                    found: depth,
                })
            }
            None => depths[index] = Some(depth),
        }

        let (pops, pushes) = stack_effect(insn)?;
        if depth < pops {
            return Err(VerifyError::StackUnderflow(index));
        }
        let after = depth - pops + pushes;
        if let Some(max) = limit {
            if after > max {
                return Err(VerifyError::StackOverflow {
                    index,
                    depth: after,
                    max,
                });
            }
        }
        max_depth = max_depth.max(after);

        match insn {
            Insn::Jump { opcode, target } => {
                // validated above
                let target_index = labels[target];
                work.push((target_index, after));
                if *opcode != Opcode::Goto {
                    work.push((index + 1, after));
                }
            }
            Insn::Simple(op) if op.is_return() => {}
            _ => work.push((index + 1, after)),
        }
    }

    Ok(max_depth)
}
