//! Weft class file definitions
//!
//! This crate provides the structural class model (classes, fields, methods
//! and instruction lists), its binary encoding, type descriptors, a
//! structural verifier and a builder for writing classes by hand.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod class;
pub mod descriptor;
pub mod encoder;
pub mod insn;
pub mod opcode;
pub mod verify;

pub use builder::{ClassBuilder, MethodBuilder};
pub use class::{access, ClassFileError, ClassNode, FieldNode, Marker, MarkerValue, MethodNode};
pub use descriptor::{internal_name, Category, DescriptorError, FieldType, MethodDescriptor};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use insn::{Constant, Insn, InsnList, Label, LabelMap, MemberRef};
pub use opcode::{Opcode, OperandForm};
pub use verify::{
    compute_max_locals, compute_max_stack, stack_effect, verify_class, verify_method, VerifyError,
};
