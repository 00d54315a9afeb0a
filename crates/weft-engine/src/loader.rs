//! Defining synthesized classes in the host

use crate::error::{SynthesisError, SynthesisResult};
use weft_bytecode::ClassNode;
use weft_core::ClassDefiner;

/// Defines encoded classes through a [`ClassDefiner`]
pub struct Loader<'h, H: ClassDefiner + ?Sized> {
    host: &'h H,
}

impl<'h, H: ClassDefiner + ?Sized> Loader<'h, H> {
    /// Wrap a host
    pub fn new(host: &'h H) -> Self {
        Self { host }
    }

    /// Fail if `name` is already taken
    pub fn ensure_free(&self, name: &str) -> SynthesisResult<()> {
        if self.host.is_defined(name) {
            return Err(SynthesisError::LoadCollision(name.to_string()));
        }
        Ok(())
    }

    /// Encode and define a class, returning the host's handle
    pub fn define(&self, class: &ClassNode) -> SynthesisResult<H::Handle> {
        self.ensure_free(&class.name)?;
        let bytes = class.encode();
        let handle = self.host.define_class(&class.name, &bytes)?;
        tracing::info!(class = %class.name, bytes = bytes.len(), "defined synthesized class");
        Ok(handle)
    }
}
