//! Error types for class synthesis
//!
//! Every failure is raised before the synthesized class is defined, so an
//! error never leaves a partially installed type behind.

use thiserror::Error;
use weft_bytecode::{ClassFileError, DescriptorError, VerifyError};
use weft_core::VmError;

/// Errors that can occur while synthesizing a class
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Directives do not fit the base or template
    #[error("Invalid template configuration: {0}")]
    Configuration(String),

    /// The byte source has no bytes for a class
    #[error("No class data available for '{0}'")]
    MissingSource(String),

    /// A class could not be decoded
    #[error("Failed to decode '{class}': {source}")]
    Decode {
        /// Class being read
        class: String,
        /// Underlying decode failure
        #[source]
        source: ClassFileError,
    },

    /// Following super names led back to a class already visited
    #[error("Cyclic superclass chain through '{0}'")]
    CyclicHierarchy(String),

    /// A super access did not have the expected shape
    #[error("Unexpected super access in {method} at instruction {index}: {reason}")]
    RewriteAssumption {
        /// Template method being rewritten
        method: String,
        /// Index of the offending node in the source body
        index: usize,
        /// What was wrong
        reason: String,
    },

    /// A reference on the synthesized class names no declared or inherited member
    #[error("Unresolved reference {member} in synthesized class {class}")]
    UnresolvedReference {
        /// Synthesized class name
        class: String,
        /// Unresolved member, `owner.name descriptor`
        member: String,
    },

    /// A class with the output name already exists
    #[error("A class named '{0}' is already defined")]
    LoadCollision(String),

    /// A directive carried a malformed descriptor
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// The emitted class failed structural verification
    #[error("Synthesized class failed verification: {0}")]
    Verify(#[from] VerifyError),

    /// The host refused to define the class
    #[error("Failed to load synthesized class: {0}")]
    Load(#[source] VmError),
}

impl From<VmError> for SynthesisError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::DuplicateClass(name) => Self::LoadCollision(name),
            other => Self::Load(other),
        }
    }
}

/// Synthesis result
pub type SynthesisResult<T> = Result<T, SynthesisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_class_is_a_collision() {
        let err: SynthesisError = VmError::DuplicateClass("demo/A".to_string()).into();
        assert!(matches!(err, SynthesisError::LoadCollision(name) if name == "demo/A"));
    }

    #[test]
    fn test_other_vm_errors_wrap() {
        let err: SynthesisError = VmError::ClassNotFound("demo/A".to_string()).into();
        assert!(matches!(err, SynthesisError::Load(VmError::ClassNotFound(_))));
        assert_eq!(
            err.to_string(),
            "Failed to load synthesized class: Class not found: demo/A"
        );
    }
}
