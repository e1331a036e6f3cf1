// src/config.rs

//! Server-supplied page configuration
//!
//! Everything here is rendered into the page by the PHP side at request
//! time and handed to the composition root once. The runtime never mutates
//! it, with one exception: the debug section map supports an explicit
//! shallow-merge update (see `debug::DebugSink::update_config`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default admin AJAX endpoint when the settings object does not carry one
pub const DEFAULT_AJAX_ENDPOINT: &str = "/wp-admin/admin-ajax.php";

/// Hardcoded plugin path, the last resort of base-path resolution
pub const DEFAULT_PLUGIN_PATH: &str = "/wp-content/plugins/explainer";

/// Action identifier for the localized-strings AJAX call
pub const LOCALIZED_STRINGS_ACTION: &str = "explainer_get_localized_strings";

/// Primary server-localized object for the admin screen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminBootstrap {
    #[serde(default)]
    pub plugin_url: Option<String>,
    #[serde(default)]
    pub ajax_url: Option<String>,
}

/// Alternate server-localized object shared with the front-end scripts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendBootstrap {
    #[serde(default)]
    pub plugin_url: Option<String>,
}

/// The settings object exposed to the shared utilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainerSettings {
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub ajax_url: Option<String>,
}

/// Debug sink configuration: a global switch plus per-section flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sections: HashMap<String, bool>,
}

/// Snapshot of the hosting page as rendered by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageEnvironment {
    /// Primary admin bootstrap object
    #[serde(default)]
    pub admin: Option<AdminBootstrap>,
    /// Alternate bootstrap object
    #[serde(default)]
    pub frontend: Option<FrontendBootstrap>,
    /// Settings object (`debug_mode`, `nonce`, `ajax_url`)
    #[serde(default)]
    pub settings: Option<ExplainerSettings>,
    /// Debug sink configuration
    #[serde(default)]
    pub debug: DebugSettings,
    /// `src` attributes of the page's script tags, in document order
    #[serde(default)]
    pub script_sources: Vec<String>,
    /// URL query parameters of the admin page
    #[serde(default)]
    pub query: HashMap<String, String>,
}

impl PageEnvironment {
    /// Parses the environment from the JSON blob rendered into the page
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::config("Malformed page environment").caused_by(e))
    }

    /// Resolved AJAX endpoint: settings object first, then admin
    /// bootstrap, then the WordPress default.
    pub fn ajax_url(&self) -> &str {
        self.settings
            .as_ref()
            .and_then(|s| s.ajax_url.as_deref())
            .or_else(|| self.admin.as_ref().and_then(|a| a.ajax_url.as_deref()))
            .unwrap_or(DEFAULT_AJAX_ENDPOINT)
    }

    /// Nonce token for authenticated AJAX calls, when present
    pub fn nonce(&self) -> Option<&str> {
        self.settings.as_ref().and_then(|s| s.nonce.as_deref())
    }

    /// Debug-mode flag from the settings object, defaulting to off
    pub fn debug_mode(&self) -> bool {
        self.settings.as_ref().map(|s| s.debug_mode).unwrap_or(false)
    }

    /// Value of a URL query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_camel_case_bootstrap() {
        let env = PageEnvironment::from_json(serde_json::json!({
            "admin": { "pluginUrl": "https://example.test/wp-content/plugins/explainer" },
            "settings": { "debug_mode": true, "nonce": "abc123" },
            "query": { "tab": "api" }
        }))
        .unwrap();

        assert_eq!(
            env.admin.as_ref().unwrap().plugin_url.as_deref(),
            Some("https://example.test/wp-content/plugins/explainer")
        );
        assert!(env.debug_mode());
        assert_eq!(env.nonce(), Some("abc123"));
        assert_eq!(env.query_param("tab"), Some("api"));
    }

    #[test]
    fn test_defaults_when_objects_absent() {
        let env = PageEnvironment::from_json(serde_json::json!({})).unwrap();

        assert!(env.admin.is_none());
        assert!(!env.debug_mode());
        assert_eq!(env.nonce(), None);
        assert_eq!(env.ajax_url(), DEFAULT_AJAX_ENDPOINT);
        assert!(!env.debug.enabled);
    }

    #[test]
    fn test_ajax_url_prefers_settings_object() {
        let env = PageEnvironment::from_json(serde_json::json!({
            "admin": { "ajaxUrl": "/bootstrap-ajax.php" },
            "settings": { "ajax_url": "/settings-ajax.php" }
        }))
        .unwrap();

        assert_eq!(env.ajax_url(), "/settings-ajax.php");
    }
}
