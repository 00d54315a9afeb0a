//! Synthesis options

use crate::error::{SynthesisError, SynthesisResult};
use serde::{Deserialize, Serialize};

/// Options controlling the shape of synthesized classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthOptions {
    /// Prefix of the methods holding the base implementation of an override
    pub shadow_prefix: String,
    /// Text between the base name and the template checksum in default names
    pub name_infix: String,
    /// Source file recorded on synthesized classes
    pub source_file: String,
    /// Check that references to the synthesized class resolve before defining it
    pub verify_references: bool,
    /// Static field holding the template instance delegated overrides call
    pub template_field: String,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            shadow_prefix: "default_".to_string(),
            name_infix: "_GENERATED_".to_string(),
            source_file: ".dynamic".to_string(),
            verify_references: true,
            template_field: "_template".to_string(),
        }
    }
}

impl SynthOptions {
    /// Parse options from JSON; missing keys keep their defaults
    pub fn from_json(json: &str) -> SynthesisResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SynthesisError::Configuration(format!("synthesis options: {}", e)))
    }

    /// Default name of the class synthesized from `base` and `template`
    pub fn default_name(&self, base: &str, template: &str) -> String {
        format!(
            "{}{}{:08x}",
            base,
            self.name_infix,
            crc32fast::hash(template.as_bytes())
        )
    }
}
