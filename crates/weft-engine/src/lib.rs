//! Weft Synthesis Engine
//!
//! Weaves a template class onto a compiled base class and defines the
//! result at runtime:
//! - Reflection over a host byte source, base hierarchy included
//! - Directive classification into constructors, overrides, implementations
//!   and exported fields
//! - Body rewriting that turns super accesses into calls on preserved base
//!   bodies and moves template references onto the new class
//! - Class assembly, verification and loading through a [`ClassDefiner`]
//!
//! [`ClassDefiner`]: weft_core::ClassDefiner

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod classify;
pub mod directive;
pub mod emit;
pub mod error;
pub mod loader;
pub mod mapping;
pub mod options;
pub mod reflect;
pub mod rewrite;
pub mod synth;

pub use classify::{classify, ClassifiedMembers};
pub use directive::{Cast, Directive, DirectiveKind, TemplateSpec};
pub use emit::{ClassEmitter, Emitted};
pub use error::{SynthesisError, SynthesisResult};
pub use loader::Loader;
pub use mapping::{FieldSignature, MemberSignature};
pub use options::SynthOptions;
pub use reflect::{Hierarchy, Reflector};
pub use rewrite::{RewriteStats, Rewriter, SuperHandle};
pub use synth::{SynthesisReport, SynthesizedType, Synthesizer, TemplateRef};
