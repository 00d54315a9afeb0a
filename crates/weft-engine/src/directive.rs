//! Template directives
//!
//! A [`TemplateSpec`] says which template members are woven and how. It can
//! be written by hand, read from JSON, or scanned from the markers a
//! compiled template carries:
//!
//! | Marker               | Applies to | Meaning                               |
//! |----------------------|------------|---------------------------------------|
//! | `Lweft/Template;`    | class      | `super_field` names the sentinel      |
//! | `Lweft/Construct;`   | method     | extra initializer for a constructor   |
//! | `Lweft/Override;`    | method     | replaces a base method; `copy=false`  |
//! |                      |            | calls a bound template instance       |
//! | `Lweft/Implement;`   | method     | new method on the synthesized class   |
//! | `Lweft/Export;`      | field      | field copied to the synthesized class |
//! | `Lweft/Cast;`        | method     | `index`/`target` descriptor rewrite   |

use crate::error::{SynthesisError, SynthesisResult};
use serde::{Deserialize, Serialize};
use weft_bytecode::{ClassNode, Marker, MarkerValue};

/// Class marker naming the sentinel field
pub const TEMPLATE_MARKER: &str = "Lweft/Template;";
/// Method marker for construct directives
pub const CONSTRUCT_MARKER: &str = "Lweft/Construct;";
/// Method marker for override directives
pub const OVERRIDE_MARKER: &str = "Lweft/Override;";
/// Method marker for implement directives
pub const IMPLEMENT_MARKER: &str = "Lweft/Implement;";
/// Field marker for export directives
pub const EXPORT_MARKER: &str = "Lweft/Export;";
/// Method marker for a descriptor cast
pub const CAST_MARKER: &str = "Lweft/Cast;";

/// Sentinel field name used when none is given
pub const DEFAULT_SUPER_FIELD: &str = "_super";

/// What a directive does with its member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
    /// Run after the base constructor with the same parameters
    Construct,
    /// Replace a base method
    Override,
    /// Add a method
    Implement,
    /// Add a field
    Export,
}

impl DirectiveKind {
    fn marker(self) -> &'static str {
        match self {
            Self::Construct => CONSTRUCT_MARKER,
            Self::Override => OVERRIDE_MARKER,
            Self::Implement => IMPLEMENT_MARKER,
            Self::Export => EXPORT_MARKER,
        }
    }

    fn method_kinds() -> [Self; 3] {
        [Self::Construct, Self::Override, Self::Implement]
    }
}

/// Replace the class at one descriptor slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cast {
    /// Parameter index, or -1 for the return slot
    pub index: i32,
    /// Target class, dotted or slashed
    pub target: String,
}

/// One woven member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    /// Member name on the template
    pub name: String,
    /// Member descriptor as declared on the template
    pub descriptor: String,
    /// How the member is woven
    pub kind: DirectiveKind,
    /// Descriptor casts, applied in order
    #[serde(default)]
    pub casts: Vec<Cast>,
    /// Override only: copy the template body onto the class, or delegate
    /// to a bound template instance when false
    #[serde(default = "default_copy")]
    pub copy: bool,
}

fn default_copy() -> bool {
    true
}

impl Directive {
    /// Directive without casts
    pub fn new(kind: DirectiveKind, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            kind,
            casts: Vec::new(),
            copy: true,
        }
    }

    /// Call the template instance instead of copying the body
    pub fn delegated(mut self) -> Self {
        self.copy = false;
        self
    }

    /// Add a cast
    pub fn cast(mut self, index: i32, target: impl Into<String>) -> Self {
        self.casts.push(Cast {
            index,
            target: target.into(),
        });
        self
    }
}

/// Declarative description of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Template field holding the saved base reference
    #[serde(default = "default_super_field")]
    pub super_field: String,
    /// Directives in declaration order
    #[serde(default)]
    pub directives: Vec<Directive>,
}

fn default_super_field() -> String {
    DEFAULT_SUPER_FIELD.to_string()
}

impl Default for TemplateSpec {
    fn default() -> Self {
        Self {
            super_field: default_super_field(),
            directives: Vec::new(),
        }
    }
}

impl TemplateSpec {
    /// Empty spec using the default sentinel field
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another sentinel field
    pub fn super_field(mut self, name: impl Into<String>) -> Self {
        self.super_field = name.into();
        self
    }

    /// Append a directive
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// Append a construct directive
    pub fn construct(self, name: &str, descriptor: &str) -> Self {
        self.directive(Directive::new(DirectiveKind::Construct, name, descriptor))
    }

    /// Append an override directive
    pub fn override_method(self, name: &str, descriptor: &str) -> Self {
        self.directive(Directive::new(DirectiveKind::Override, name, descriptor))
    }

    /// Append an override that delegates to the bound template instance
    pub fn delegate_method(self, name: &str, descriptor: &str) -> Self {
        self.directive(Directive::new(DirectiveKind::Override, name, descriptor).delegated())
    }

    /// Append an implement directive
    pub fn implement(self, name: &str, descriptor: &str) -> Self {
        self.directive(Directive::new(DirectiveKind::Implement, name, descriptor))
    }

    /// Append an export directive
    pub fn export(self, name: &str, descriptor: &str) -> Self {
        self.directive(Directive::new(DirectiveKind::Export, name, descriptor))
    }

    /// Parse a spec from JSON
    pub fn from_json(json: &str) -> SynthesisResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SynthesisError::Configuration(format!("template spec: {}", e)))
    }

    /// Read directives from the markers on a compiled template
    ///
    /// Fields come first in declaration order, then methods.
    pub fn scan(template: &ClassNode) -> SynthesisResult<Self> {
        let super_field = template
            .markers
            .iter()
            .find(|m| m.descriptor == TEMPLATE_MARKER)
            .and_then(|m| m.str("super_field"))
            .map(str::to_string)
            .unwrap_or_else(default_super_field);

        let mut spec = Self {
            super_field,
            directives: Vec::new(),
        };

        for field in &template.fields {
            if field.markers.iter().any(|m| m.descriptor == EXPORT_MARKER) {
                spec.directives.push(Directive::new(
                    DirectiveKind::Export,
                    &field.name,
                    &field.descriptor,
                ));
            }
        }

        for method in &template.methods {
            let kinds: Vec<DirectiveKind> = DirectiveKind::method_kinds()
                .into_iter()
                .filter(|k| method.marker(k.marker()).is_some())
                .collect();
            let kind = match kinds.as_slice() {
                [] => continue,
                [kind] => *kind,
                _ => {
                    return Err(SynthesisError::Configuration(format!(
                        "{}.{}{} carries more than one directive marker",
                        template.name, method.name, method.descriptor
                    )))
                }
            };

            let casts = method
                .markers
                .iter()
                .filter(|m| m.descriptor == CAST_MARKER)
                .map(|m| cast_from_marker(m, &template.name, &method.name))
                .collect::<SynthesisResult<Vec<_>>>()?;

            let copy = method
                .marker(OVERRIDE_MARKER)
                .and_then(|m| m.bool("copy"))
                .unwrap_or(true);

            spec.directives.push(Directive {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                kind,
                casts,
                copy,
            });
        }

        Ok(spec)
    }
}

fn cast_from_marker(marker: &Marker, class: &str, method: &str) -> SynthesisResult<Cast> {
    match (marker.int("index"), marker.str("target")) {
        (Some(index), Some(target)) => Ok(Cast {
            index,
            target: target.to_string(),
        }),
        _ => Err(SynthesisError::Configuration(format!(
            "cast marker on {}.{} needs an int 'index' and a string 'target'",
            class, method
        ))),
    }
}

/// Marker for a cast directive, for building templates
pub fn cast_marker(index: i32, target: &str) -> Marker {
    Marker::new(CAST_MARKER)
        .with("index", MarkerValue::Int(index))
        .with("target", MarkerValue::Str(target.to_string()))
}

/// Override marker that delegates to the bound template instance
pub fn delegate_marker() -> Marker {
    Marker::new(OVERRIDE_MARKER).with("copy", MarkerValue::Bool(false))
}

/// Class marker naming the sentinel field, for building templates
pub fn template_marker(super_field: &str) -> Marker {
    Marker::new(TEMPLATE_MARKER).with("super_field", MarkerValue::Str(super_field.to_string()))
}
