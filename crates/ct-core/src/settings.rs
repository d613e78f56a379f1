//! User settings record
//!
//! A single JSON file holding the selected tenant. Mutated only by an
//! explicit tenant selection or by `--reset`.

use serde::{Deserialize, Serialize};

/// Persisted user settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Tenant id the client operates against; empty until first resolution
    #[serde(rename = "activeTenant", default)]
    pub active_tenant: String,
}

impl Settings {
    /// Whether a tenant has been selected yet
    pub fn has_active_tenant(&self) -> bool {
        !self.active_tenant.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_name() {
        let settings = Settings {
            active_tenant: "contoso".to_string(),
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"activeTenant":"contoso"}"#);
    }

    #[test]
    fn test_default_has_no_tenant() {
        assert!(!Settings::default().has_active_tenant());
    }
}
