//! cloud-init user-data rendered for newly created nodes.

use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use base64::Engine as _;
use serde::Serialize;

/// The `#cloud-config` document sent to providers as user-data. `packages`
/// is the union of `platform_packages` across all engines compatible with at
/// least one of the provider's supported platforms.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct CloudUserData {
    pub bootcmd: Vec<String>,
    pub package_upgrade: bool,
    pub packages: Vec<String>,
}

impl CloudUserData {
    pub fn new(packages: Vec<String>) -> Self {
        Self {
            bootcmd: Vec::new(),
            package_upgrade: true,
            packages,
        }
    }

    /// Render to the user-data wire format.
    pub fn render(&self) -> String {
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("#cloud-config\n{}", body)
    }

    /// Render as base64, as required by the Azure `customData` field.
    pub fn render_base64(&self) -> String {
        B64_STANDARD.encode(self.render())
    }
}
