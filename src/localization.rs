// src/localization.rs

//! Localized display strings
//!
//! One POST to the admin AJAX endpoint per page load, cached for the rest
//! of the runtime's lifetime. Every failure mode resolves to the static
//! fallback mapping; callers never see an error. Concurrent callers share
//! the in-flight request through a single-flight guard.

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::LOCALIZED_STRINGS_ACTION;
use crate::debug::DebugSink;
use crate::error::{Error, Result};
use crate::manager::{ManagedState, Manager, ManagerStatus};
use crate::platform::network::{form_post, NetworkArc};
use crate::types::StringMap;

/// Display strings used when the server-backed call cannot complete
pub static FALLBACK_STRINGS: Lazy<StringMap> = Lazy::new(|| {
    [
        ("explanation", "Explanation"),
        ("loading", "Loading..."),
        ("error", "Unable to generate an explanation. Please try again."),
        ("disclaimer", "AI-generated explanations may contain inaccuracies."),
        ("close", "Close"),
        ("explain", "Explain"),
        ("try_again", "Try again"),
        ("network_error", "Network error. Please check your connection."),
        ("rate_limited", "Too many requests. Please wait a moment."),
        ("powered_by", "Powered by AI"),
        ("copy", "Copy"),
        ("copied", "Copied"),
        ("terms_title", "Terms of Use"),
        ("select_text", "Select text to see an explanation."),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
});

#[derive(Debug, Deserialize)]
struct AjaxEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<AjaxData>,
}

#[derive(Debug, Deserialize)]
struct AjaxData {
    #[serde(default)]
    strings: StringMap,
}

/// Client for the localized-strings endpoint
pub struct LocalizationClient {
    state: ManagedState,
    endpoint: String,
    nonce: Option<String>,
    network: NetworkArc,
    debug: DebugSink,
    cache: parking_lot::RwLock<Option<Arc<StringMap>>>,
    // Held across the whole check-fetch-populate sequence so overlapping
    // callers cannot issue a second request
    load_guard: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for LocalizationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalizationClient")
            .field("endpoint", &self.endpoint)
            .field("cached", &self.cache.read().is_some())
            .finish()
    }
}

impl LocalizationClient {
    pub fn new(
        endpoint: impl Into<String>,
        nonce: Option<String>,
        network: NetworkArc,
        debug: DebugSink,
    ) -> Self {
        Self {
            state: ManagedState::new(Uuid::new_v4(), "localization_client"),
            endpoint: endpoint.into(),
            nonce,
            network,
            debug,
            cache: parking_lot::RwLock::new(None),
            load_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Loads the localized strings, fetching at most once per cache
    /// lifetime. Always resolves: failures yield the fallback mapping.
    pub async fn load(&self) -> Arc<StringMap> {
        if let Some(cached) = self.cache.read().clone() {
            return cached;
        }

        let _guard = self.load_guard.lock().await;
        // The winner of the guard may already have populated the cache
        if let Some(cached) = self.cache.read().clone() {
            return cached;
        }

        let strings = match self.fetch().await {
            Ok(strings) => {
                self.debug.log(
                    "localization",
                    &format!("Loaded {} localized strings", strings.len()),
                    None,
                );
                strings
            }
            Err(e) => {
                self.debug.warn(
                    "localization",
                    "String load failed, using fallback strings",
                    Some(&serde_json::json!({ "error": e.message })),
                );
                FALLBACK_STRINGS.clone()
            }
        };

        let strings = Arc::new(strings);
        *self.cache.write() = Some(Arc::clone(&strings));
        strings
    }

    async fn fetch(&self) -> Result<StringMap> {
        let mut pairs: Vec<(&str, &str)> = vec![("action", LOCALIZED_STRINGS_ACTION)];
        if let Some(nonce) = self.nonce.as_deref() {
            pairs.push(("nonce", nonce));
        }

        let request = form_post(&self.endpoint, pairs);
        let response = self.network.request(request).await?;

        if !response.is_success() {
            return Err(Error::network(
                Some(response.status_code),
                &self.endpoint,
                "Localized strings request returned a non-success status",
            ));
        }

        let envelope: AjaxEnvelope = serde_json::from_slice(&response.body)
            .map_err(|e| Error::localization(&self.endpoint, "Malformed response body").caused_by(e))?;

        if !envelope.success {
            return Err(Error::localization(
                &self.endpoint,
                "Response did not carry a success flag",
            ));
        }

        match envelope.data {
            Some(data) if !data.strings.is_empty() => Ok(data.strings),
            _ => Err(Error::localization(&self.endpoint, "Response carried no strings payload")),
        }
    }

    /// Looks up a display string: the cached server value when present and
    /// non-empty, then the static fallback mapping, then the supplied
    /// fallback, then the key itself.
    pub fn get(&self, key: &str, fallback: &str) -> String {
        let cached = self
            .cache
            .read()
            .as_ref()
            .and_then(|strings| strings.get(key).cloned())
            .filter(|value| !value.is_empty());

        if let Some(value) = cached {
            return value;
        }

        if let Some(value) = FALLBACK_STRINGS.get(key).filter(|v| !v.is_empty()) {
            return value.clone();
        }

        if !fallback.is_empty() {
            return fallback.to_string();
        }

        key.to_string()
    }

    /// Whether the cache has been populated (by either path)
    pub fn is_loaded(&self) -> bool {
        self.cache.read().is_some()
    }

    /// Drops the cached mapping, forcing the next `load` to fetch again.
    /// An in-flight load past the guard will still repopulate the cache.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }
}

#[async_trait::async_trait]
impl Manager for LocalizationClient {
    fn name(&self) -> &str {
        "localization_client"
    }

    fn id(&self) -> Uuid {
        self.state.id()
    }

    async fn initialize(&mut self) -> Result<()> {
        self.state
            .set_state(crate::manager::ManagerState::Initializing)
            .await;
        self.state
            .set_state(crate::manager::ManagerState::Running)
            .await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.state
            .set_state(crate::manager::ManagerState::ShuttingDown)
            .await;
        self.invalidate();
        self.state
            .set_state(crate::manager::ManagerState::Shutdown)
            .await;
        Ok(())
    }

    async fn status(&self) -> ManagerStatus {
        let mut status = self.state.status().await;
        let cache_size = self
            .cache
            .read()
            .as_ref()
            .map(|strings| strings.len())
            .unwrap_or(0);
        status.add_metadata("cached_strings", serde_json::Value::from(cache_size));
        status.add_metadata("endpoint", serde_json::Value::from(self.endpoint.clone()));
        status
    }
}
