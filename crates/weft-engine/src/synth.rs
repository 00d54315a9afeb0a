//! The synthesis entry point
//!
//! [`Synthesizer`] runs reflect, classify, rewrite, emit and load as one
//! critical section per call. Every check happens before the class is
//! defined, so a failed call installs nothing.
//!
//! Classes with delegated overrides own their template instance: it lives
//! in a static slot of the synthesized class, named on the returned
//! [`SynthesizedType`], and is bound right after the class is defined.

use crate::classify::{classify, ClassifiedMembers};
use crate::directive::TemplateSpec;
use crate::emit::{ClassEmitter, Emitted};
use crate::error::{SynthesisError, SynthesisResult};
use crate::loader::Loader;
use crate::mapping::{FieldSignature, MemberSignature};
use crate::options::SynthOptions;
use crate::reflect::Reflector;
use crate::rewrite::SuperHandle;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use weft_core::{ClassDefiner, ClassId, ClassSource, InstanceBinder};

/// A template class, optionally with explicit directives
///
/// Without a spec, directives are read from the markers on the compiled
/// template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    /// Internal name of the template class
    pub name: String,
    /// Directives overriding the template's markers
    pub spec: Option<TemplateSpec>,
}

impl TemplateRef {
    /// Template whose directives come from its markers
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: None,
        }
    }

    /// Use explicit directives instead of markers
    pub fn with_spec(mut self, spec: TemplateSpec) -> Self {
        self.spec = Some(spec);
        self
    }
}

impl From<&str> for TemplateRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TemplateRef {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// What went into a synthesized class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SynthesisReport {
    /// Constructor descriptors, in base declaration order
    pub constructors: Vec<String>,
    /// Constructors that run a template body after the base constructor
    pub initialized_constructors: usize,
    /// Overridden methods, effective signatures
    pub overrides: Vec<MemberSignature>,
    /// Overrides that call the bound template instance
    pub delegated: Vec<MemberSignature>,
    /// Shadow methods holding base bodies
    pub shadows: Vec<MemberSignature>,
    /// Methods added from the template
    pub implementations: Vec<MemberSignature>,
    /// Fields moved onto the class
    pub fields: Vec<FieldSignature>,
    /// Signatures changed by casts
    pub casts: usize,
    /// Super accesses rewritten
    pub super_accesses: usize,
    /// References moved from the template to the class
    pub redirections: usize,
}

impl SynthesisReport {
    fn new(members: &ClassifiedMembers, emitted: &Emitted) -> Self {
        Self {
            constructors: members
                .constructors
                .iter()
                .map(|c| c.descriptor.clone())
                .collect(),
            initialized_constructors: members
                .constructors
                .iter()
                .filter(|c| c.initializer.is_some())
                .count(),
            overrides: members.overrides.iter().map(|o| o.signature.clone()).collect(),
            delegated: members
                .overrides
                .iter()
                .filter(|o| o.delegated)
                .map(|o| o.signature.clone())
                .collect(),
            shadows: emitted.shadows.clone(),
            implementations: members
                .implementations
                .iter()
                .map(|i| i.signature.clone())
                .collect(),
            fields: members
                .exported_fields
                .iter()
                .map(FieldSignature::of_field)
                .collect(),
            casts: members.cast_count(),
            super_accesses: emitted.stats.super_accesses,
            redirections: emitted.stats.redirections,
        }
    }
}

/// A class defined by the synthesizer
#[derive(Debug, Clone)]
pub struct SynthesizedType<H = ClassId> {
    /// Internal name of the defined class
    pub name: String,
    /// Base class it extends
    pub base: String,
    /// Template it was woven from
    pub template: String,
    /// Interfaces taken from the template
    pub interfaces: Vec<String>,
    /// Host handle for the defined class
    pub handle: H,
    /// Static field of this class holding its template instance, when any
    /// override delegates
    pub template_slot: Option<String>,
    /// What was woven
    pub report: SynthesisReport,
}

/// Template instance handed to a class with delegated overrides
trait TemplateBinding {
    fn check(&self, template: &str) -> SynthesisResult<()>;
    fn bind(&self, class: &str, field: &str) -> SynthesisResult<()>;
}

struct Bound<'a, S: InstanceBinder + ?Sized> {
    host: &'a S,
    instance: &'a S::Instance,
}

impl<S: InstanceBinder + ?Sized> TemplateBinding for Bound<'_, S> {
    fn check(&self, template: &str) -> SynthesisResult<()> {
        if self.host.instance_of(self.instance, template)? {
            Ok(())
        } else {
            Err(SynthesisError::Configuration(format!(
                "{:?} is not an instance of template {}",
                self.instance, template
            )))
        }
    }

    fn bind(&self, class: &str, field: &str) -> SynthesisResult<()> {
        self.host.bind_instance(class, field, self.instance)?;
        Ok(())
    }
}

struct CacheEntry<H> {
    /// Directives the entry was synthesized from
    requested: Option<TemplateSpec>,
    synthesized: SynthesizedType<H>,
}

/// Weaves templates onto base classes and defines the result
///
/// Every synthesized class is remembered under its (base, template) pair;
/// the first class made for a pair is what [`Synthesizer::get_or_synthesize`]
/// returns.
pub struct Synthesizer<H = ClassId> {
    options: SynthOptions,
    cache: Mutex<FxHashMap<(String, String), CacheEntry<H>>>,
}

impl<H> Default for Synthesizer<H> {
    fn default() -> Self {
        Self::new(SynthOptions::default())
    }
}

impl<H> fmt::Debug for Synthesizer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synthesizer")
            .field("options", &self.options)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl<H> Synthesizer<H> {
    /// Create a synthesizer
    pub fn new(options: SynthOptions) -> Self {
        Self {
            options,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Active options
    pub fn options(&self) -> &SynthOptions {
        &self.options
    }

    /// Name used when the caller does not pick one
    pub fn default_name(&self, base: &str, template: &str) -> String {
        self.options.default_name(base, template)
    }
}

impl<H: Clone + fmt::Debug> Synthesizer<H> {
    /// Synthesize under the default name
    pub fn synthesize<S>(
        &self,
        host: &S,
        base: &str,
        template: impl Into<TemplateRef>,
    ) -> SynthesisResult<SynthesizedType<H>>
    where
        S: ClassSource + ClassDefiner<Handle = H> + ?Sized,
    {
        let template = template.into();
        let name = self.default_name(base, &template.name);
        let mut cache = self.cache.lock();
        let synthesized = self.run(host, base, &template, &name, None)?;
        remember(&mut cache, base, &template, &synthesized);
        Ok(synthesized)
    }

    /// Synthesize under an explicit name
    pub fn synthesize_named<S>(
        &self,
        host: &S,
        base: &str,
        template: impl Into<TemplateRef>,
        name: &str,
    ) -> SynthesisResult<SynthesizedType<H>>
    where
        S: ClassSource + ClassDefiner<Handle = H> + ?Sized,
    {
        let template = template.into();
        let mut cache = self.cache.lock();
        let synthesized = self.run(host, base, &template, name, None)?;
        remember(&mut cache, base, &template, &synthesized);
        Ok(synthesized)
    }

    /// Synthesize under the default name, handing `instance` to delegated
    /// overrides
    ///
    /// The template must be defined in the host and `instance` must be one of
    /// its instances. The instance is stored in the class's template slot,
    /// so every instance of the synthesized class shares it.
    pub fn synthesize_with_instance<S>(
        &self,
        host: &S,
        base: &str,
        template: impl Into<TemplateRef>,
        instance: &S::Instance,
    ) -> SynthesisResult<SynthesizedType<H>>
    where
        S: ClassSource + ClassDefiner<Handle = H> + InstanceBinder + ?Sized,
    {
        let template = template.into();
        let name = self.default_name(base, &template.name);
        let binding: &dyn TemplateBinding = &Bound { host, instance };
        let mut cache = self.cache.lock();
        let synthesized = self.run(host, base, &template, &name, Some(binding))?;
        remember(&mut cache, base, &template, &synthesized);
        Ok(synthesized)
    }

    /// Return the class already synthesized for this pair, or synthesize it
    /// under the default name
    ///
    /// Asking again with directives other than the ones the cached class
    /// was built from is a configuration error.
    pub fn get_or_synthesize<S>(
        &self,
        host: &S,
        base: &str,
        template: impl Into<TemplateRef>,
    ) -> SynthesisResult<SynthesizedType<H>>
    where
        S: ClassSource + ClassDefiner<Handle = H> + ?Sized,
    {
        let template = template.into();
        let key = (base.to_string(), template.name.clone());

        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(&key) {
            if entry.requested != template.spec {
                return Err(SynthesisError::Configuration(format!(
                    "{} was already synthesized onto {} as {} from other directives",
                    template.name, base, entry.synthesized.name
                )));
            }
            tracing::trace!(class = %entry.synthesized.name, "synthesis cache hit");
            return Ok(entry.synthesized.clone());
        }

        let name = self.default_name(base, &template.name);
        let synthesized = self.run(host, base, &template, &name, None)?;
        remember(&mut cache, base, &template, &synthesized);
        Ok(synthesized)
    }

    /// First class synthesized for a pair, if any
    pub fn cached(&self, base: &str, template: &str) -> Option<SynthesizedType<H>> {
        self.cache
            .lock()
            .get(&(base.to_string(), template.to_string()))
            .map(|entry| entry.synthesized.clone())
    }

    fn run<S>(
        &self,
        host: &S,
        base: &str,
        template: &TemplateRef,
        name: &str,
        binding: Option<&dyn TemplateBinding>,
    ) -> SynthesisResult<SynthesizedType<H>>
    where
        S: ClassSource + ClassDefiner<Handle = H> + ?Sized,
    {
        if name.is_empty() {
            return Err(SynthesisError::Configuration(
                "synthesized class name is empty".to_string(),
            ));
        }
        let loader = Loader::new(host);
        loader.ensure_free(name)?;

        let mut reflector = Reflector::new(host);
        let hierarchy = reflector.hierarchy(base)?;
        if hierarchy.base().is_interface() {
            return Err(SynthesisError::Configuration(format!(
                "{} is an interface and cannot be extended",
                base
            )));
        }
        let template_node = reflector.load(&template.name)?;

        let spec = match &template.spec {
            Some(spec) => spec.clone(),
            None => TemplateSpec::scan(&template_node)?,
        };
        let handle = SuperHandle::resolve(&template_node, &spec.super_field);
        if handle.is_none() {
            tracing::debug!(
                template = %template.name,
                field = %spec.super_field,
                "template declares no sentinel field"
            );
        }

        let members = classify(&template_node, &spec, &hierarchy)?;
        let binding = if members.delegates() {
            let Some(binding) = binding else {
                return Err(SynthesisError::Configuration(format!(
                    "{} delegates overrides and needs a template instance",
                    template.name
                )));
            };
            if !host.is_defined(&template.name) {
                return Err(SynthesisError::Configuration(format!(
                    "template {} must be defined to delegate to it",
                    template.name
                )));
            }
            binding.check(&template.name)?;
            Some(binding)
        } else {
            None
        };

        let emitted = ClassEmitter {
            name,
            template: &template_node,
            hierarchy: &hierarchy,
            members: &members,
            handle: handle.as_ref(),
            options: &self.options,
        }
        .emit()?;

        let defined = loader.define(&emitted.class)?;
        if let (Some(binding), Some(slot)) = (binding, &emitted.template_slot) {
            binding.bind(name, slot)?;
            tracing::debug!(class = name, slot = %slot, "bound template instance");
        }

        let report = SynthesisReport::new(&members, &emitted);
        tracing::info!(
            class = name,
            base,
            template = %template.name,
            overrides = report.overrides.len(),
            delegated = report.delegated.len(),
            implementations = report.implementations.len(),
            "synthesized class"
        );

        Ok(SynthesizedType {
            name: name.to_string(),
            base: base.to_string(),
            template: template.name.clone(),
            interfaces: emitted.class.interfaces.clone(),
            handle: defined,
            template_slot: emitted.template_slot,
            report,
        })
    }
}

fn remember<H: Clone>(
    cache: &mut FxHashMap<(String, String), CacheEntry<H>>,
    base: &str,
    template: &TemplateRef,
    synthesized: &SynthesizedType<H>,
) {
    cache
        .entry((base.to_string(), template.name.clone()))
        .or_insert_with(|| CacheEntry {
            requested: template.spec.clone(),
            synthesized: synthesized.clone(),
        });
}
