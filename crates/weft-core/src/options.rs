//! Runtime configuration

use serde::{Deserialize, Serialize};

/// VM configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Maximum nested invocation depth
    pub max_call_depth: usize,
    /// Verify class bodies before defining them
    pub verify: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            verify: true,
        }
    }
}

impl VmOptions {
    /// Parse options from JSON; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
