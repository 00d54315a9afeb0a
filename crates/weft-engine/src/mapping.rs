//! Member signatures used as lookup keys

use crate::error::SynthesisResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use weft_bytecode::{FieldNode, MemberRef, MethodDescriptor, MethodNode};

/// A method identity: name plus canonical descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberSignature {
    /// Method name
    pub name: String,
    /// Canonical `(params)ret` descriptor
    pub descriptor: String,
}

impl MemberSignature {
    /// Create a signature, canonicalizing the descriptor
    ///
    /// Constructor-style descriptors without a return type gain `V`.
    pub fn new(name: impl Into<String>, descriptor: &str) -> SynthesisResult<Self> {
        Ok(Self {
            name: name.into(),
            descriptor: MethodDescriptor::parse(descriptor)?.to_string(),
        })
    }

    /// Signature of a declared method
    pub fn of_method(method: &MethodNode) -> Self {
        Self {
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
        }
    }

    /// Signature of a method reference
    pub fn of_ref(member: &MemberRef) -> Self {
        Self {
            name: member.name.clone(),
            descriptor: member.descriptor.clone(),
        }
    }

    /// Same descriptor under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: self.descriptor.clone(),
        }
    }

    /// Parsed descriptor
    pub fn parsed(&self) -> SynthesisResult<MethodDescriptor> {
        Ok(MethodDescriptor::parse(&self.descriptor)?)
    }
}

impl fmt::Display for MemberSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

/// A field identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSignature {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
}

impl FieldSignature {
    /// Signature of a declared field
    pub fn of_field(field: &FieldNode) -> Self {
        Self {
            name: field.name.clone(),
            descriptor: field.descriptor.clone(),
        }
    }
}

impl fmt::Display for FieldSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.descriptor)
    }
}
