//! Member classification
//!
//! Turns a [`TemplateSpec`] into the member sets the emitter works from:
//! constructors keyed by the base constructor they extend, overrides,
//! implementations and exported fields. Descriptor casts are applied here,
//! so everything downstream sees effective signatures only.

use crate::directive::{Directive, DirectiveKind, TemplateSpec};
use crate::error::{SynthesisError, SynthesisResult};
use crate::mapping::MemberSignature;
use crate::reflect::Hierarchy;
use rustc_hash::FxHashMap;
use weft_bytecode::{ClassNode, DescriptorError, FieldNode, MethodDescriptor, MethodNode};

/// A base constructor and the template method that runs after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorMapping {
    /// Base constructor descriptor
    pub descriptor: String,
    /// Template construct method, as declared
    pub initializer: Option<MemberSignature>,
}

/// Base body a shadow method is copied from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowSource {
    /// Nearest class declaring the overridden method
    pub owner: String,
    /// Descriptor of that declaration
    pub descriptor: String,
}

/// A template method replacing a base method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideMapping {
    /// Effective signature on the synthesized class
    pub signature: MemberSignature,
    /// Template method, as declared
    pub source: MemberSignature,
    /// Concrete base body, None when the base declaration is abstract
    pub shadow: Option<ShadowSource>,
    /// Call the bound template instance instead of a copied body
    pub delegated: bool,
}

impl OverrideMapping {
    /// Whether a call with this name and descriptor targets the overridden method
    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.signature.name == name
            && (self.signature.descriptor == descriptor
                || self.shadow.as_ref().is_some_and(|s| s.descriptor == descriptor))
    }
}

/// A template method added to the synthesized class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementMapping {
    /// Effective signature on the synthesized class
    pub signature: MemberSignature,
    /// Template method, as declared
    pub source: MemberSignature,
    /// Access flags of the template method
    pub access: u16,
}

/// Output of classification, in directive order
#[derive(Debug, Clone, Default)]
pub struct ClassifiedMembers {
    /// One entry per base constructor
    pub constructors: Vec<ConstructorMapping>,
    /// Overridden base methods
    pub overrides: Vec<OverrideMapping>,
    /// New methods
    pub implementations: Vec<ImplementMapping>,
    /// Template fields copied to the synthesized class
    pub exported_fields: Vec<FieldNode>,
    /// Declared template signature to effective descriptor, for cast members
    descriptor_map: FxHashMap<MemberSignature, String>,
}

impl ClassifiedMembers {
    /// Override targeted by a call, if any
    pub fn override_for(&self, name: &str, descriptor: &str) -> Option<&OverrideMapping> {
        self.overrides.iter().find(|o| o.matches(name, descriptor))
    }

    /// Descriptor a template-local call should use on the synthesized class
    pub fn effective_descriptor<'a>(&'a self, name: &str, descriptor: &'a str) -> &'a str {
        let key = MemberSignature {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        };
        self.descriptor_map
            .get(&key)
            .map(String::as_str)
            .unwrap_or(descriptor)
    }

    /// Whether any override calls the bound template instance
    pub fn delegates(&self) -> bool {
        self.overrides.iter().any(|o| o.delegated)
    }

    /// Number of signatures whose descriptor changed through casts
    pub fn cast_count(&self) -> usize {
        self.descriptor_map.len()
    }
}

/// Classify the template's directives against the base hierarchy
pub fn classify(
    template: &ClassNode,
    spec: &TemplateSpec,
    hierarchy: &Hierarchy,
) -> SynthesisResult<ClassifiedMembers> {
    let base = hierarchy.base();
    let mut members = ClassifiedMembers {
        constructors: base
            .constructors()
            .map(|ctor| ConstructorMapping {
                descriptor: ctor.descriptor.clone(),
                initializer: None,
            })
            .collect(),
        ..ClassifiedMembers::default()
    };

    for directive in &spec.directives {
        if !directive.copy && directive.kind != DirectiveKind::Override {
            return Err(configuration(format!(
                "{}.{}{}: only override directives can delegate",
                template.name, directive.name, directive.descriptor
            )));
        }
        match directive.kind {
            DirectiveKind::Export => export(template, spec, directive, &mut members)?,
            DirectiveKind::Construct => construct(template, directive, &mut members)?,
            DirectiveKind::Override => override_method(template, directive, hierarchy, &mut members)?,
            DirectiveKind::Implement => implement(template, directive, &mut members)?,
        }
    }

    Ok(members)
}

fn configuration(message: String) -> SynthesisError {
    SynthesisError::Configuration(message)
}

fn export(
    template: &ClassNode,
    spec: &TemplateSpec,
    directive: &Directive,
    members: &mut ClassifiedMembers,
) -> SynthesisResult<()> {
    if directive.name == spec.super_field {
        return Err(configuration(format!(
            "{}.{} is the super field and cannot be exported",
            template.name, directive.name
        )));
    }
    let field = template
        .find_field(&directive.name)
        .filter(|f| f.descriptor == directive.descriptor)
        .ok_or_else(|| {
            configuration(format!(
                "template {} declares no field {}:{}",
                template.name, directive.name, directive.descriptor
            ))
        })?;
    if members.exported_fields.iter().any(|f| f.name == field.name) {
        return Err(configuration(format!("field {} exported twice", field.name)));
    }

    tracing::debug!(template = %template.name, field = %field.name, "exporting field");
    let mut exported = field.clone();
    exported.markers.clear();
    members.exported_fields.push(exported);
    Ok(())
}

/// The template method a directive names, with its effective signature
fn source_method<'t>(
    template: &'t ClassNode,
    directive: &Directive,
) -> SynthesisResult<(&'t MethodNode, MemberSignature, MemberSignature)> {
    let source = MemberSignature::new(&directive.name, &directive.descriptor)?;
    let method = template
        .find_method(&source.name, &source.descriptor)
        .ok_or_else(|| {
            configuration(format!(
                "template {} declares no method {}",
                template.name, source
            ))
        })?;
    if method.is_abstract() || method.is_static() {
        return Err(configuration(format!(
            "{}.{} must be a concrete instance method",
            template.name, source
        )));
    }

    let mut effective = source.parsed()?;
    for cast in &directive.casts {
        effective = effective
            .with_cast(cast.index, &cast.target)
            .map_err(|err| match err {
                DescriptorError::SlotOutOfRange { descriptor, index } => configuration(format!(
                    "cast index {} is out of range for {}{}",
                    index, source.name, descriptor
                )),
                other => other.into(),
            })?;
    }
    let effective = MemberSignature {
        name: source.name.clone(),
        descriptor: effective.to_string(),
    };

    Ok((method, source, effective))
}

fn record_cast(members: &mut ClassifiedMembers, source: &MemberSignature, effective: &MemberSignature) {
    if source.descriptor != effective.descriptor {
        tracing::debug!(
            method = %source.name,
            declared = %source.descriptor,
            effective = %effective.descriptor,
            "cast rewrote descriptor"
        );
        members
            .descriptor_map
            .insert(source.clone(), effective.descriptor.clone());
    }
}

fn construct(
    template: &ClassNode,
    directive: &Directive,
    members: &mut ClassifiedMembers,
) -> SynthesisResult<()> {
    let (_, source, effective) = source_method(template, directive)?;
    let params = effective.parsed()?.params;

    let mut matched = None;
    for ctor in &mut members.constructors {
        if MethodDescriptor::parse(&ctor.descriptor)?.params == params {
            matched = Some(ctor);
            break;
        }
    }

    match matched {
        Some(ctor) if ctor.initializer.is_some() => Err(configuration(format!(
            "two construct directives extend constructor {}",
            ctor.descriptor
        ))),
        Some(ctor) => {
            tracing::debug!(initializer = %source, constructor = %ctor.descriptor, "construct directive");
            ctor.initializer = Some(source);
            Ok(())
        }
        None => {
            tracing::warn!(
                template = %template.name,
                initializer = %source,
                "construct directive matches no base constructor; ignored"
            );
            Ok(())
        }
    }
}

fn override_method(
    template: &ClassNode,
    directive: &Directive,
    hierarchy: &Hierarchy,
    members: &mut ClassifiedMembers,
) -> SynthesisResult<()> {
    let (_, source, effective) = source_method(template, directive)?;

    let (owner, declared, effective) = match hierarchy
        .find_method(&effective.name, &effective.descriptor)
    {
        Some((owner, declared)) => (owner, declared, effective),
        None => {
            let (owner, declared) = hierarchy
                .find_method(&source.name, &source.descriptor)
                .ok_or_else(|| {
                    configuration(format!(
                        "cannot override {}: no such method on {} or its superclasses",
                        effective,
                        hierarchy.base().name
                    ))
                })?;
            if !directive.casts.is_empty() {
                tracing::warn!(
                    method = %source,
                    cast = %effective.descriptor,
                    "base declares only the uncast descriptor; casts ignored"
                );
            }
            (owner, declared, source.clone())
        }
    };
    if declared.is_static() {
        return Err(configuration(format!(
            "cannot override static method {}.{}",
            owner.name, effective
        )));
    }
    if members.overrides.iter().any(|o| o.signature == effective) {
        return Err(configuration(format!("{} overridden twice", effective)));
    }

    let shadow = (!declared.is_abstract()).then(|| ShadowSource {
        owner: owner.name.clone(),
        descriptor: declared.descriptor.clone(),
    });
    tracing::debug!(
        method = %effective,
        declared_in = %owner.name,
        shadowed = shadow.is_some(),
        delegated = !directive.copy,
        "override directive"
    );

    record_cast(members, &source, &effective);
    members.overrides.push(OverrideMapping {
        signature: effective,
        source,
        shadow,
        delegated: !directive.copy,
    });
    Ok(())
}

fn implement(
    template: &ClassNode,
    directive: &Directive,
    members: &mut ClassifiedMembers,
) -> SynthesisResult<()> {
    let (method, source, effective) = source_method(template, directive)?;
    if members.implementations.iter().any(|i| i.signature == effective) {
        return Err(configuration(format!("{} implemented twice", effective)));
    }

    tracing::debug!(method = %effective, "implement directive");
    record_cast(members, &source, &effective);
    members.implementations.push(ImplementMapping {
        signature: effective,
        source,
        access: method.access,
    });
    Ok(())
}
