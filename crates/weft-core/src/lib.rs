//! Weft Core Runtime
//!
//! This crate provides the managed runtime that Weft classes execute in:
//! - Class loading from encoded bytes, with verification
//! - Object model with inherited field layout
//! - Stack-machine interpreter with virtual, special and static dispatch
//! - Byte sources for reading compiled classes

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class_registry;
pub mod host;
pub mod interpreter;
pub mod object;
pub mod options;
pub mod value;
pub mod vm;

pub use class_registry::ClassRegistry;
pub use host::{ClassDefiner, ClassSource, DirectorySource, InMemorySource, InstanceBinder};
pub use object::{ClassId, Heap, Object, ObjectRef, RuntimeClass};
pub use options::VmOptions;
pub use value::Value;
pub use vm::Vm;

use weft_bytecode::{ClassFileError, VerifyError};

/// VM errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// No class with this name is loaded
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    /// A class with this name is already defined
    #[error("Class already defined: {0}")]
    DuplicateClass(String),

    /// Requested name differs from the name inside the bytes
    #[error("Class name mismatch: defining '{expected}' but bytes declare '{found}'")]
    NameMismatch { expected: String, found: String },

    /// Superclass must be loaded before its subclasses
    #[error("Superclass {super_name} of {class} is not loaded")]
    SuperclassNotLoaded { class: String, super_name: String },

    /// Bytes could not be decoded
    #[error("Class format error: {0}")]
    ClassFormat(#[from] ClassFileError),

    /// Class failed verification
    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// Method resolution failed
    #[error("Method not found: {class}.{name}{descriptor}")]
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },

    /// Field resolution failed
    #[error("Field not found: {class}.{name}")]
    FieldNotFound { class: String, name: String },

    /// Invoked method has no body
    #[error("Abstract method called: {class}.{name}{descriptor}")]
    AbstractMethod {
        class: String,
        name: String,
        descriptor: String,
    },

    /// Abstract classes and interfaces cannot be instantiated
    #[error("Cannot instantiate {0}")]
    Instantiation(String),

    /// Null dereference
    #[error("Null pointer exception")]
    NullPointer,

    /// Failed CHECKCAST
    #[error("{from} cannot be cast to {to}")]
    ClassCast { from: String, to: String },

    /// Operand stack grew past the declared bound
    #[error("Operand stack overflow in {method} (max {max})")]
    StackOverflow { method: String, max: u16 },

    /// Pop from an empty operand stack
    #[error("Operand stack underflow in {0}")]
    StackUnderflow(String),

    /// Local slot outside the declared bound
    #[error("Local {slot} out of range in {method} (max {max})")]
    InvalidLocal { method: String, slot: u16, max: u16 },

    /// Too many nested invocations
    #[error("Call depth limit {0} exceeded")]
    CallDepthExceeded(usize),

    /// Wrong argument count or kinds for an invocation
    #[error("Bad arguments for {0}")]
    BadArguments(String),

    /// Arithmetic fault
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// Value of the wrong kind for an instruction
    #[error("Type error: {0}")]
    TypeError(String),

    /// Dangling object handle
    #[error("Invalid object reference {0:?}")]
    InvalidObject(ObjectRef),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
