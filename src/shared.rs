// src/shared.rs

//! Shared per-runtime context
//!
//! One instance per page load, handed to whichever front-end modules need
//! it. Owns the debug-mode flag, the localized-string handle, and the
//! registry of memoization caches so `cleanup` can empty everything in
//! one place.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ExplainerSettings;
use crate::debug::DebugSink;
use crate::localization::LocalizationClient;
use crate::types::StringMap;
use crate::utils::memo::{ClearableCache, Memoized};

pub struct SharedContext {
    debug_mode: AtomicBool,
    debug: DebugSink,
    strings: Arc<LocalizationClient>,
    caches: Mutex<Vec<Arc<dyn ClearableCache>>>,
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("debug_mode", &self.debug_mode.load(Ordering::Relaxed))
            .field("caches", &self.caches.lock().len())
            .finish()
    }
}

impl SharedContext {
    pub fn new(strings: Arc<LocalizationClient>, debug: DebugSink) -> Self {
        Self {
            debug_mode: AtomicBool::new(false),
            debug,
            strings,
            caches: Mutex::new(Vec::new()),
        }
    }

    /// Applies the settings object and kicks off the one-time
    /// localized-string load in the background.
    pub fn init(&self, settings: &ExplainerSettings) {
        self.debug_mode.store(settings.debug_mode, Ordering::Relaxed);

        let strings = Arc::clone(&self.strings);
        tokio::spawn(async move {
            strings.load().await;
        });

        self.debug.info(
            "core",
            "Shared context initialized",
            Some(&serde_json::json!({ "debug_mode": settings.debug_mode })),
        );
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    /// The localization handle, for callers that need the async load
    pub fn strings(&self) -> &Arc<LocalizationClient> {
        &self.strings
    }

    /// Loads (or returns the cached) localized strings
    pub async fn load_localized_strings(&self) -> Arc<StringMap> {
        self.strings.load().await
    }

    /// Synchronous string lookup with fallback chaining
    pub fn localized(&self, key: &str, fallback: &str) -> String {
        self.strings.get(key, fallback)
    }

    /// Creates a memoized wrapper whose cache participates in `cleanup`
    pub fn memoize<A, R>(&self, func: impl Fn(&A) -> R + Send + Sync + 'static) -> Memoized<A, A, R>
    where
        A: Clone + Eq + Hash + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let memoized = Memoized::new(func);
        self.register_cache(memoized.cache_handle());
        memoized
    }

    /// Memoized wrapper with a derived cache key, registered for `cleanup`
    pub fn memoize_with_key<A, K, R>(
        &self,
        func: impl Fn(&A) -> R + Send + Sync + 'static,
        key_fn: impl Fn(&A) -> K + Send + Sync + 'static,
    ) -> Memoized<A, K, R>
    where
        K: Eq + Hash + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        A: 'static,
    {
        let memoized = Memoized::with_key(func, key_fn);
        self.register_cache(memoized.cache_handle());
        memoized
    }

    /// Registers an externally-built cache with the cleanup path
    pub fn register_cache(&self, cache: Arc<dyn ClearableCache>) {
        self.caches.lock().push(cache);
    }

    /// Empties every registered memoization cache and drops the cached
    /// localized strings, forcing a future reload.
    pub fn cleanup(&self) {
        let caches = self.caches.lock();
        let mut cleared_entries = 0;
        for cache in caches.iter() {
            cleared_entries += cache.len();
            cache.clear();
        }
        drop(caches);

        self.strings.invalidate();

        self.debug.log(
            "core",
            "Cleanup complete",
            Some(&serde_json::json!({ "cleared_entries": cleared_entries })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_AJAX_ENDPOINT;
    use crate::error::{Error, Result};
    use crate::platform::network::{NetworkProvider, NetworkRequest, NetworkResponse};

    #[derive(Debug)]
    struct OfflineNetwork;

    #[async_trait::async_trait]
    impl NetworkProvider for OfflineNetwork {
        async fn request(&self, request: NetworkRequest) -> Result<NetworkResponse> {
            Err(Error::network(None, &request.url, "offline"))
        }
    }

    fn context() -> SharedContext {
        let debug = DebugSink::with_tracing(Default::default());
        let strings = Arc::new(LocalizationClient::new(
            DEFAULT_AJAX_ENDPOINT,
            None,
            Arc::new(OfflineNetwork),
            debug.clone(),
        ));
        SharedContext::new(strings, debug)
    }

    #[tokio::test]
    async fn test_init_applies_debug_mode() {
        let ctx = context();
        assert!(!ctx.debug_mode());

        ctx.init(&ExplainerSettings {
            debug_mode: true,
            ..Default::default()
        });
        assert!(ctx.debug_mode());
    }

    #[tokio::test]
    async fn test_cleanup_clears_caches_and_strings() {
        let ctx = context();
        let memoized = ctx.memoize(|arg: &u32| arg * 2);

        memoized.call(3);
        memoized.call(4);
        assert_eq!(memoized.len(), 2);

        ctx.load_localized_strings().await;
        assert!(ctx.strings().is_loaded());

        ctx.cleanup();
        assert_eq!(memoized.len(), 0);
        assert!(!ctx.strings().is_loaded());
    }

    #[tokio::test]
    async fn test_localized_falls_back_without_network() {
        let ctx = context();
        assert_eq!(ctx.localized("loading", "x"), "Loading...");
    }
}
