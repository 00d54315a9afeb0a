//! Stack-machine interpreter
//!
//! Each invocation gets a [`Frame`] sized from the method's declared
//! `max_locals`; the operand stack is bounded by `max_stack` words. Calls
//! recurse on the host stack, limited by [`VmOptions::max_call_depth`].
//!
//! [`VmOptions::max_call_depth`]: crate::VmOptions::max_call_depth

use crate::object::{MethodEntry, ObjectRef};
use crate::value::Value;
use crate::vm::{Vm, STRING_CLASS};
use crate::{VmError, VmResult};
use std::sync::Arc;
use weft_bytecode::descriptor::ROOT_CLASS;
use weft_bytecode::{Constant, Insn, MemberRef, MethodDescriptor, Opcode};

/// Bytecode interpreter bound to a VM
pub struct Interpreter<'vm> {
    vm: &'vm Vm,
    depth: usize,
}

/// Activation record of one invocation
struct Frame<'m> {
    entry: &'m MethodEntry,
    locals: Vec<Value>,
    stack: Vec<Value>,
    words: u16,
}

impl<'m> Frame<'m> {
    fn method_name(&self) -> String {
        format!("{}{}", self.entry.node.name, self.entry.node.descriptor)
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        let words = self.words + value.slot_size();
        if words > self.entry.node.max_stack {
            return Err(VmError::StackOverflow {
                method: self.method_name(),
                max: self.entry.node.max_stack,
            });
        }
        self.words = words;
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        let value = self
            .stack
            .pop()
            .ok_or_else(|| VmError::StackUnderflow(self.method_name()))?;
        self.words -= value.slot_size();
        Ok(value)
    }

    fn pop_int(&mut self) -> VmResult<i32> {
        let value = self.pop()?;
        value
            .as_int()
            .ok_or_else(|| VmError::TypeError(format!("expected int, found {:?}", value)))
    }

    fn pop_long(&mut self) -> VmResult<i64> {
        let value = self.pop()?;
        value
            .as_long()
            .ok_or_else(|| VmError::TypeError(format!("expected long, found {:?}", value)))
    }

    fn pop_object(&mut self) -> VmResult<ObjectRef> {
        match self.pop()? {
            Value::Ref(r) => Ok(r),
            Value::Null => Err(VmError::NullPointer),
            other => Err(VmError::TypeError(format!("expected object, found {:?}", other))),
        }
    }

    fn check_slot(&self, slot: u16, size: u16) -> VmResult<usize> {
        let end = usize::from(slot) + usize::from(size);
        if end > self.locals.len() {
            return Err(VmError::InvalidLocal {
                method: self.method_name(),
                slot,
                max: self.entry.node.max_locals,
            });
        }
        Ok(usize::from(slot))
    }

    fn load(&self, slot: u16) -> VmResult<Value> {
        let index = self.check_slot(slot, 1)?;
        Ok(self.locals[index].clone())
    }

    fn store(&mut self, slot: u16, value: Value) -> VmResult<()> {
        let size = value.slot_size();
        let index = self.check_slot(slot, size)?;
        if size == 2 {
            self.locals[index + 1] = Value::Null;
        }
        self.locals[index] = value;
        Ok(())
    }
}

enum Flow {
    Next,
    Jump(weft_bytecode::Label),
    Return(Option<Value>),
}

impl<'vm> Interpreter<'vm> {
    /// Create an interpreter at call depth zero
    pub fn new(vm: &'vm Vm) -> Self {
        Self { vm, depth: 0 }
    }

    /// Run a method; `args` includes the receiver for instance methods
    pub fn call(&mut self, entry: &Arc<MethodEntry>, args: Vec<Value>) -> VmResult<Option<Value>> {
        let node = &entry.node;
        if node.is_abstract() {
            return Err(VmError::AbstractMethod {
                class: self.owner_name(entry),
                name: node.name.clone(),
                descriptor: node.descriptor.clone(),
            });
        }
        if self.depth >= self.vm.options().max_call_depth {
            return Err(VmError::CallDepthExceeded(self.vm.options().max_call_depth));
        }

        let mut frame = Frame {
            entry: entry.as_ref(),
            locals: vec![Value::Null; usize::from(node.max_locals)],
            stack: Vec::with_capacity(usize::from(node.max_stack)),
            words: 0,
        };
        let mut slot = 0u16;
        for arg in args {
            let size = arg.slot_size();
            frame.store(slot, arg)?;
            slot += size;
        }

        tracing::trace!(
            class = %self.owner_name(entry),
            method = %frame.method_name(),
            depth = self.depth,
            "invoke"
        );

        self.depth += 1;
        let result = self.run(&mut frame);
        self.depth -= 1;
        result
    }

    fn owner_name(&self, entry: &MethodEntry) -> String {
        self.vm
            .class(entry.owner)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn run(&mut self, frame: &mut Frame<'_>) -> VmResult<Option<Value>> {
        let entry = frame.entry;
        let insns = entry.node.insns.as_slice();
        let mut pc = 0usize;
        loop {
            let insn = insns.get(pc).ok_or_else(|| {
                VmError::TypeError(format!("execution fell off the end of {}", frame.method_name()))
            })?;
            pc += 1;

            match self.step(frame, insn)? {
                Flow::Next => {}
                Flow::Jump(label) => {
                    pc = frame.entry.label_index(label).ok_or_else(|| {
                        VmError::TypeError(format!("undefined label {} in {}", label, frame.method_name()))
                    })?;
                }
                Flow::Return(value) => return Ok(value),
            }
        }
    }

    fn step(&mut self, frame: &mut Frame<'_>, insn: &Insn) -> VmResult<Flow> {
        match insn {
            Insn::Label(_) | Insn::Line(_) => {}
            Insn::Simple(op) => return self.simple(frame, *op),
            Insn::Int { value, .. } => frame.push(Value::Int(*value))?,
            Insn::Ldc(constant) => frame.push(match constant {
                Constant::Int(v) => Value::Int(*v),
                Constant::Long(v) => Value::Long(*v),
                Constant::Float(v) => Value::Float(*v),
                Constant::Double(v) => Value::Double(*v),
                Constant::Str(s) => Value::str(s),
            })?,
            Insn::Var { opcode, slot } => match opcode {
                Opcode::Iload | Opcode::Lload | Opcode::Fload | Opcode::Dload | Opcode::Aload => {
                    let value = frame.load(*slot)?;
                    frame.push(value)?;
                }
                _ => {
                    let value = frame.pop()?;
                    frame.store(*slot, value)?;
                }
            },
            Insn::Iinc { slot, delta } => {
                let value = frame.load(*slot)?;
                let current = value
                    .as_int()
                    .ok_or_else(|| VmError::TypeError(format!("IINC on {:?}", value)))?;
                frame.store(*slot, Value::Int(current.wrapping_add(i32::from(*delta))))?;
            }
            Insn::Type { opcode, class } => self.type_op(frame, *opcode, class)?,
            Insn::Field { opcode, member } => self.field_op(frame, *opcode, member)?,
            Insn::Method { opcode, member } => self.invoke(frame, *opcode, member)?,
            Insn::Jump { opcode, target } => {
                if self.branch_taken(frame, *opcode)? {
                    return Ok(Flow::Jump(*target));
                }
            }
        }
        Ok(Flow::Next)
    }

    fn simple(&mut self, frame: &mut Frame<'_>, op: Opcode) -> VmResult<Flow> {
        use Opcode::*;
        match op {
            Nop => {}
            AconstNull => frame.push(Value::Null)?,
            IconstM1 => frame.push(Value::Int(-1))?,
            Iconst0 => frame.push(Value::Int(0))?,
            Iconst1 => frame.push(Value::Int(1))?,
            Iconst2 => frame.push(Value::Int(2))?,
            Iconst3 => frame.push(Value::Int(3))?,
            Iconst4 => frame.push(Value::Int(4))?,
            Iconst5 => frame.push(Value::Int(5))?,
            Lconst0 => frame.push(Value::Long(0))?,
            Lconst1 => frame.push(Value::Long(1))?,
            Fconst0 => frame.push(Value::Float(0.0))?,
            Fconst1 => frame.push(Value::Float(1.0))?,
            Fconst2 => frame.push(Value::Float(2.0))?,
            Dconst0 => frame.push(Value::Double(0.0))?,
            Dconst1 => frame.push(Value::Double(1.0))?,
            Pop => {
                frame.pop()?;
            }
            Pop2 => {
                if frame.pop()?.slot_size() == 1 {
                    frame.pop()?;
                }
            }
            Dup => {
                let top = frame.pop()?;
                frame.push(top.clone())?;
                frame.push(top)?;
            }
            Swap => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a)?;
                frame.push(b)?;
            }
            Iadd | Isub | Imul | Idiv | Irem => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                let r = match op {
                    Iadd => a.wrapping_add(b),
                    Isub => a.wrapping_sub(b),
                    Imul => a.wrapping_mul(b),
                    Idiv | Irem if b == 0 => {
                        return Err(VmError::Arithmetic("/ by zero".to_string()))
                    }
                    Idiv => a.wrapping_div(b),
                    _ => a.wrapping_rem(b),
                };
                frame.push(Value::Int(r))?;
            }
            Ladd | Lsub | Lmul => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                let r = match op {
                    Ladd => a.wrapping_add(b),
                    Lsub => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                };
                frame.push(Value::Long(r))?;
            }
            Fadd => {
                let (b, a) = (frame.pop()?, frame.pop()?);
                match (a.as_float(), b.as_float()) {
                    (Some(a), Some(b)) => frame.push(Value::Float(a + b))?,
                    _ => return Err(VmError::TypeError("FADD on non-float".to_string())),
                }
            }
            Dadd => {
                let (b, a) = (frame.pop()?, frame.pop()?);
                match (a.as_double(), b.as_double()) {
                    (Some(a), Some(b)) => frame.push(Value::Double(a + b))?,
                    _ => return Err(VmError::TypeError("DADD on non-double".to_string())),
                }
            }
            Ineg => {
                let a = frame.pop_int()?;
                frame.push(Value::Int(a.wrapping_neg()))?;
            }
            I2l => {
                let a = frame.pop_int()?;
                frame.push(Value::Long(i64::from(a)))?;
            }
            L2i => {
                let a = frame.pop_long()?;
                frame.push(Value::Int(a as i32))?;
            }
            Lcmp => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                frame.push(Value::Int(a.cmp(&b) as i32))?;
            }
            Ireturn | Lreturn | Freturn | Dreturn | Areturn => {
                return Ok(Flow::Return(Some(frame.pop()?)))
            }
            Return => return Ok(Flow::Return(None)),
            other => {
                return Err(VmError::TypeError(format!(
                    "{} used without its operand",
                    other
                )))
            }
        }
        Ok(Flow::Next)
    }

    fn branch_taken(&mut self, frame: &mut Frame<'_>, op: Opcode) -> VmResult<bool> {
        use Opcode::*;
        let taken = match op {
            Goto => true,
            Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle => {
                let a = frame.pop_int()?;
                match op {
                    Ifeq => a == 0,
                    Ifne => a != 0,
                    Iflt => a < 0,
                    Ifge => a >= 0,
                    Ifgt => a > 0,
                    _ => a <= 0,
                }
            }
            IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                match op {
                    IfIcmpeq => a == b,
                    IfIcmpne => a != b,
                    IfIcmplt => a < b,
                    IfIcmpge => a >= b,
                    IfIcmpgt => a > b,
                    _ => a <= b,
                }
            }
            IfAcmpeq | IfAcmpne => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                (a == b) == (op == IfAcmpeq)
            }
            Ifnull => frame.pop()?.is_null(),
            Ifnonnull => !frame.pop()?.is_null(),
            other => return Err(VmError::TypeError(format!("{} is not a branch", other))),
        };
        Ok(taken)
    }

    fn is_assignable(&self, value: &Value, target: &str) -> VmResult<bool> {
        Ok(match value {
            Value::Null => true,
            Value::Ref(r) => self.vm.is_instance_of(*r, target)?,
            Value::Str(_) => target == STRING_CLASS || target == ROOT_CLASS,
            _ => false,
        })
    }

    fn type_op(&mut self, frame: &mut Frame<'_>, op: Opcode, class: &str) -> VmResult<()> {
        match op {
            Opcode::New => {
                let obj = self.vm.allocate(class)?;
                frame.push(Value::Ref(obj))?;
            }
            Opcode::Checkcast => {
                let value = frame.pop()?;
                if !self.is_assignable(&value, class)? {
                    let from = match &value {
                        Value::Ref(r) => self
                            .vm
                            .class(self.vm.class_of(*r)?)
                            .map(|c| c.name.clone())
                            .unwrap_or_default(),
                        other => format!("{:?}", other),
                    };
                    return Err(VmError::ClassCast {
                        from,
                        to: class.to_string(),
                    });
                }
                frame.push(value)?;
            }
            _ => {
                let value = frame.pop()?;
                let is = !value.is_null() && self.is_assignable(&value, class)?;
                frame.push(Value::from(is))?;
            }
        }
        Ok(())
    }

    fn field_op(&mut self, frame: &mut Frame<'_>, op: Opcode, member: &MemberRef) -> VmResult<()> {
        match op {
            Opcode::Getfield => {
                let obj = frame.pop_object()?;
                let index = self.vm.resolve_field(&member.owner, &member.name)?;
                frame.push(self.vm.read_slot(obj, index)?)?;
            }
            Opcode::Putfield => {
                let value = frame.pop()?;
                let obj = frame.pop_object()?;
                let index = self.vm.resolve_field(&member.owner, &member.name)?;
                self.vm.write_slot(obj, index, value)?;
            }
            Opcode::Getstatic => {
                let (class, descriptor) = self.vm.resolve_static(&member.owner, &member.name)?;
                frame.push(self.vm.read_static(class, &member.name, &descriptor))?;
            }
            _ => {
                let value = frame.pop()?;
                let (class, _) = self.vm.resolve_static(&member.owner, &member.name)?;
                self.vm.write_static(class, &member.name, value);
            }
        }
        Ok(())
    }

    fn invoke(&mut self, frame: &mut Frame<'_>, op: Opcode, member: &MemberRef) -> VmResult<()> {
        let desc = MethodDescriptor::parse(&member.descriptor)
            .map_err(|e| VmError::TypeError(e.to_string()))?;

        let mut args = Vec::with_capacity(desc.params.len() + 1);
        for _ in 0..desc.params.len() {
            args.push(frame.pop()?);
        }

        let entry = if op == Opcode::Invokestatic {
            self.vm
                .resolve_method_in(&member.owner, &member.name, &member.descriptor)?
        } else {
            let receiver = frame.pop_object()?;
            args.push(Value::Ref(receiver));
            if op == Opcode::Invokespecial {
                self.vm
                    .resolve_method_in(&member.owner, &member.name, &member.descriptor)?
            } else {
                let class_id = self.vm.class_of(receiver)?;
                self.vm
                    .resolve_method(class_id, &member.name, &member.descriptor)
                    .ok_or_else(|| VmError::MethodNotFound {
                        class: member.owner.clone(),
                        name: member.name.clone(),
                        descriptor: member.descriptor.clone(),
                    })?
            }
        };
        args.reverse();

        if let Some(result) = self.call(&entry, args)? {
            frame.push(result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmOptions;
    use weft_bytecode::{access, ClassBuilder, Label};

    fn math_class() -> weft_bytecode::ClassNode {
        ClassBuilder::new("demo/Math")
            .extends(ROOT_CLASS)
            .field(access::STATIC, "calls", "I")
            .method(access::PUBLIC | access::STATIC, "sum", "(I)I", |m| {
                // sum of 1..=n with a loop
                let top = m.define_label();
                let done = m.define_label();
                m.emit_push_int(0)
                    .emit(Insn::Var { opcode: Opcode::Istore, slot: 1 })
                    .mark_label(top)
                    .emit_iload(0)
                    .emit_jump(Opcode::Ifle, done)
                    .emit_iload(1)
                    .emit_iload(0)
                    .emit_op(Opcode::Iadd)
                    .emit(Insn::Var { opcode: Opcode::Istore, slot: 1 })
                    .emit_iinc(0, -1)
                    .emit_jump(Opcode::Goto, top)
                    .mark_label(done)
                    .emit_getstatic("demo/Math", "calls", "I")
                    .emit_push_int(1)
                    .emit_op(Opcode::Iadd)
                    .emit_putstatic("demo/Math", "calls", "I")
                    .emit_iload(1)
                    .emit_return();
            })
            .method(access::PUBLIC | access::STATIC, "widen", "(IJ)J", |m| {
                m.emit_iload(0)
                    .emit_op(Opcode::I2l)
                    .emit_lload(1)
                    .emit_op(Opcode::Ladd)
                    .emit_return();
            })
            .method(access::PUBLIC | access::STATIC, "recurse", "()V", |m| {
                m.emit_invokestatic("demo/Math", "recurse", "()V").emit_return();
            })
            .method(access::PUBLIC | access::STATIC, "div", "(II)I", |m| {
                m.emit_iload(0).emit_iload(1).emit_op(Opcode::Idiv).emit_return();
            })
            .build()
    }

    #[test]
    fn test_loop_and_statics() {
        let vm = Vm::new();
        vm.load_class(&math_class()).unwrap();
        let r = vm.invoke_static("demo/Math", "sum", "(I)I", vec![Value::Int(10)]).unwrap();
        assert_eq!(r, Some(Value::Int(55)));
        vm.invoke_static("demo/Math", "sum", "(I)I", vec![Value::Int(1)]).unwrap();
        assert_eq!(vm.get_static("demo/Math", "calls").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_wide_arguments_take_two_slots() {
        let vm = Vm::new();
        vm.load_class(&math_class()).unwrap();
        let r = vm
            .invoke_static("demo/Math", "widen", "(IJ)J", vec![Value::Int(2), Value::Long(40)])
            .unwrap();
        assert_eq!(r, Some(Value::Long(42)));
    }

    #[test]
    fn test_call_depth_limit() {
        let vm = Vm::with_options(VmOptions {
            max_call_depth: 16,
            ..VmOptions::default()
        });
        vm.load_class(&math_class()).unwrap();
        assert!(matches!(
            vm.invoke_static("demo/Math", "recurse", "()V", vec![]),
            Err(VmError::CallDepthExceeded(16))
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let vm = Vm::new();
        vm.load_class(&math_class()).unwrap();
        assert!(matches!(
            vm.invoke_static("demo/Math", "div", "(II)I", vec![Value::Int(1), Value::Int(0)]),
            Err(VmError::Arithmetic(_))
        ));
    }

    #[test]
    fn test_declared_max_stack_is_enforced() {
        // verification off so the understated bound reaches the interpreter
        let vm = Vm::with_options(VmOptions {
            verify: false,
            ..VmOptions::default()
        });
        let class = ClassBuilder::new("demo/Tight")
            .extends(ROOT_CLASS)
            .method(access::PUBLIC | access::STATIC, "f", "()I", |m| {
                m.emit_push_int(1)
                    .emit_push_int(2)
                    .emit_op(Opcode::Iadd)
                    .emit_return()
                    .maxs(1, 0);
            })
            .build();
        vm.load_class(&class).unwrap();
        assert!(matches!(
            vm.invoke_static("demo/Tight", "f", "()I", vec![]),
            Err(VmError::StackOverflow { max: 1, .. })
        ));
    }

    #[test]
    fn test_checkcast_failure() {
        let vm = Vm::new();
        let a = ClassBuilder::new("demo/A")
            .extends(ROOT_CLASS)
            .method(access::PUBLIC, "<init>", "()V", |m| {
                m.emit_aload(0)
                    .emit_invokespecial(ROOT_CLASS, "<init>", "()V")
                    .emit_return();
            })
            .method(access::PUBLIC, "asB", "()Ldemo/B;", |m| {
                m.emit_aload(0).emit_checkcast("demo/B").emit_return();
            })
            .method(access::PUBLIC, "isA", "()Z", |m| {
                m.emit_aload(0).emit_instanceof("demo/A").emit_return();
            })
            .build();
        let b = ClassBuilder::new("demo/B").extends(ROOT_CLASS).build();
        vm.load_class(&a).unwrap();
        vm.load_class(&b).unwrap();

        let obj = vm.new_instance("demo/A", "()V", vec![]).unwrap();
        assert_eq!(
            vm.invoke_virtual(obj, "isA", "()Z", vec![]).unwrap(),
            Some(Value::Int(1))
        );
        assert!(matches!(
            vm.invoke_virtual(obj, "asB", "()Ldemo/B;", vec![]),
            Err(VmError::ClassCast { .. })
        ));
    }

    #[test]
    fn test_undefined_label_without_verification() {
        let vm = Vm::with_options(VmOptions {
            verify: false,
            ..VmOptions::default()
        });
        let class = ClassBuilder::new("demo/Jumpy")
            .extends(ROOT_CLASS)
            .method(access::PUBLIC | access::STATIC, "f", "()V", |m| {
                m.emit_jump(Opcode::Goto, Label(42)).maxs(0, 0);
            })
            .build();
        vm.load_class(&class).unwrap();
        assert!(matches!(
            vm.invoke_static("demo/Jumpy", "f", "()V", vec![]),
            Err(VmError::TypeError(_))
        ));
    }
}
