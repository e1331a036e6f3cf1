// src/loader.rs

//! Sequential admin module loading
//!
//! The admin screen's behavior is split across named script modules that
//! must execute in dependency order. The loader resolves the plugin base
//! path, filters the module list once from the page's query context, and
//! fetches-and-executes each module strictly in sequence through the
//! `ModuleHost` seam. The last module in the list performs cross-module
//! initialization on its own once it runs.
//!
//! Any single failure short-circuits the chain into degraded mode:
//! remaining modules are not attempted and two minimal handlers are
//! installed instead (an allow-all submit guard and a warning on the
//! API-key test controls).

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{PageEnvironment, DEFAULT_PLUGIN_PATH};
use crate::debug::DebugSink;
use crate::error::{Error, Result};
use crate::event::{Event, EventBusManager, EventFilter};
use crate::manager::{ManagedState, Manager, ManagerState, ManagerStatus};
use crate::platform::ui::{ClickAction, SubmitDecision, SubmitGuard, UiBridge};
use crate::types::Metadata;
use crate::utils::timing::Stopwatch;

/// Admin modules in dependency order. The last entry wires the others
/// together once it executes.
pub const BASE_MODULES: [&str; 7] = [
    "logger",
    "utils",
    "notices",
    "validation",
    "api-key-test",
    "job-monitoring",
    "settings-core",
];

/// The one module that is dropped on tabs without background jobs
pub const JOB_MONITORING_MODULE: &str = "job-monitoring";

const FALLBACK_WARNING: &str =
    "The Explainer admin modules failed to load. Settings can still be saved, \
     but API key testing is unavailable until the page is reloaded.";

/// Computes the ordered module list for the given `tab` query parameter.
/// Job monitoring is only present on tabs that show background jobs;
/// the default tab, "popular", and "post-scan" skip it. Filtering happens
/// once; the list is never re-evaluated.
pub fn compute_module_list(tab: Option<&str>) -> Vec<&'static str> {
    let skip_job_monitoring = matches!(tab, None | Some("") | Some("popular") | Some("post-scan"));

    BASE_MODULES
        .iter()
        .copied()
        .filter(|module| !(skip_job_monitoring && *module == JOB_MONITORING_MODULE))
        .collect()
}

/// Resolves the plugin base path from the page environment, in order:
/// admin bootstrap, alternate bootstrap, the directory of the last page
/// script whose source contains "admin", then the hardcoded default.
/// Each step is tried only if the previous yields nothing.
pub fn resolve_base_path(env: &PageEnvironment) -> String {
    if let Some(url) = env
        .admin
        .as_ref()
        .and_then(|a| a.plugin_url.as_deref())
        .filter(|url| !url.is_empty())
    {
        return url.trim_end_matches('/').to_string();
    }

    if let Some(url) = env
        .frontend
        .as_ref()
        .and_then(|f| f.plugin_url.as_deref())
        .filter(|url| !url.is_empty())
    {
        return url.trim_end_matches('/').to_string();
    }

    if let Some(dir) = env
        .script_sources
        .iter()
        .rev()
        .find(|src| src.contains("admin"))
        .and_then(|src| src.rfind('/').map(|i| &src[..i]))
        .filter(|dir| !dir.is_empty())
    {
        return dir.trim_end_matches('/').to_string();
    }

    DEFAULT_PLUGIN_PATH.to_string()
}

/// Script URL for a named admin module
pub fn module_url(base_path: &str, name: &str) -> String {
    format!("{}/admin/{}.js", base_path.trim_end_matches('/'), name)
}

/// Fetch-and-execute seam for a single module script
#[async_trait::async_trait]
pub trait ModuleHost: Send + Sync + std::fmt::Debug {
    /// Resolves once the script at `url` has been fetched and executed;
    /// fails on network errors or execution errors.
    async fn execute(&self, name: &str, url: &str) -> Result<()>;
}

/// One successfully loaded module. Diagnostics only; the loader never
/// consults this log for control decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRecord {
    pub name: String,
    pub url: String,
    pub loaded_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Published after the full module chain has executed
#[derive(Debug, Clone)]
pub struct ModulesLoadedEvent {
    pub modules: Vec<String>,
    pub metadata: Metadata,
}

impl Event for ModulesLoadedEvent {
    fn event_type(&self) -> &'static str {
        "modules.loaded"
    }

    fn source(&self) -> &str {
        "module_loader"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Published when the chain short-circuited into degraded mode
#[derive(Debug, Clone)]
pub struct ModulesDegradedEvent {
    pub failed_module: String,
    pub metadata: Metadata,
}

impl Event for ModulesDegradedEvent {
    fn event_type(&self) -> &'static str {
        "modules.degraded"
    }

    fn source(&self) -> &str {
        "module_loader"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Uncaught page error reported by the hosting integration
#[derive(Debug, Clone)]
pub struct PageErrorEvent {
    pub file: String,
    pub message: String,
    pub line: Option<u32>,
    pub metadata: Metadata,
}

impl Event for PageErrorEvent {
    fn event_type(&self) -> &'static str {
        "page.error"
    }

    fn source(&self) -> &str {
        "page"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Loads the admin modules and owns the degraded-mode fallback
#[derive(Debug)]
pub struct ModuleLoaderManager {
    state: ManagedState,
    env: PageEnvironment,
    host: Arc<dyn ModuleHost>,
    ui: Arc<dyn UiBridge>,
    events: Arc<EventBusManager>,
    debug: DebugSink,
    base_path: OnceCell<String>,
    load_log: RwLock<Vec<LoadRecord>>,
    fallback_installed: AtomicBool,
    error_observer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ModuleLoaderManager {
    pub fn new(
        env: PageEnvironment,
        host: Arc<dyn ModuleHost>,
        ui: Arc<dyn UiBridge>,
        events: Arc<EventBusManager>,
        debug: DebugSink,
    ) -> Self {
        Self {
            state: ManagedState::new(Uuid::new_v4(), "module_loader"),
            env,
            host,
            ui,
            events,
            debug,
            base_path: OnceCell::new(),
            load_log: RwLock::new(Vec::new()),
            fallback_installed: AtomicBool::new(false),
            error_observer: Mutex::new(None),
        }
    }

    /// The resolved plugin base path, computed once
    pub fn base_path(&self) -> &str {
        self.base_path.get_or_init(|| resolve_base_path(&self.env))
    }

    /// Names of the modules loaded so far, in load order
    pub fn loaded_modules(&self) -> Vec<String> {
        self.load_log.read().iter().map(|r| r.name.clone()).collect()
    }

    /// Loads every module for the current page context strictly in
    /// sequence. A failure short-circuits into degraded mode and returns
    /// the module error; remaining modules are not attempted.
    pub async fn load_all(&self) -> Result<()> {
        self.state.set_state(ManagerState::Initializing).await;

        let base = self.base_path().to_string();
        let modules = compute_module_list(self.env.query_param("tab"));
        self.debug.log(
            "loader",
            &format!("Loading {} admin modules", modules.len()),
            Some(&serde_json::json!({ "modules": &modules, "base_path": &base })),
        );

        for name in &modules {
            if let Err(e) = self.load_module(&base, name).await {
                self.enter_degraded_mode(name).await;
                return Err(e);
            }
        }

        // The core module (last in the list) performs cross-module
        // initialization on its own; the loader is done.
        self.state.set_state(ManagerState::Running).await;
        let _ = self.events.publish(ModulesLoadedEvent {
            modules: modules.iter().map(|m| m.to_string()).collect(),
            metadata: Metadata::new(),
        });
        Ok(())
    }

    /// Fetches and executes one module, recording it on success
    pub async fn load_module(&self, base_path: &str, name: &str) -> Result<()> {
        let url = module_url(base_path, name);
        let stopwatch = Stopwatch::start();

        match self.host.execute(name, &url).await {
            Ok(()) => {
                let duration = stopwatch.stop();
                self.load_log.write().push(LoadRecord {
                    name: name.to_string(),
                    url: url.clone(),
                    loaded_at: Utc::now(),
                    duration,
                });
                self.debug.log(
                    "loader",
                    &format!("Loaded module '{}'", name),
                    Some(&serde_json::json!({
                        "url": url,
                        "duration_ms": duration.as_millis() as u64,
                    })),
                );
                Ok(())
            }
            Err(e) => {
                let error = Error::module(name, "Module failed to fetch or execute")
                    .with_url(&url)
                    .caused_by(&e);
                self.debug.error(
                    "loader",
                    &format!("Module '{}' failed to load", name),
                    Some(&serde_json::json!({ "url": url, "cause": e.message })),
                );
                Err(error)
            }
        }
    }

    async fn enter_degraded_mode(&self, failed_module: &str) {
        self.install_fallback();
        self.state.set_state(ManagerState::Degraded).await;
        self.state
            .set_message(format!("Degraded after module '{}' failed", failed_module))
            .await;
        let _ = self.events.publish(ModulesDegradedEvent {
            failed_module: failed_module.to_string(),
            metadata: Metadata::new(),
        });
    }

    /// Installs the degraded handlers exactly once: an allow-all submit
    /// guard and a warning on the API-key test controls (plain alert when
    /// the rich notice mechanism is unavailable).
    fn install_fallback(&self) {
        if self.fallback_installed.swap(true, Ordering::SeqCst) {
            return;
        }

        let guard: SubmitGuard = Arc::new(|_submission| SubmitDecision::Allow);
        if let Err(e) = self.ui.install_submit_guard(guard) {
            self.debug.warn(
                "loader",
                "Could not install fallback submit guard",
                Some(&serde_json::json!({ "error": e.message })),
            );
        }

        let ui = Arc::clone(&self.ui);
        let action: ClickAction = Arc::new(move || {
            if ui.show_warning(FALLBACK_WARNING).is_err() {
                ui.alert(FALLBACK_WARNING);
            }
        });
        if let Err(e) = self.ui.install_api_test_handler(action) {
            self.debug.warn(
                "loader",
                "Could not install fallback API-key test handler",
                Some(&serde_json::json!({ "error": e.message })),
            );
        }

        self.debug.warn("loader", "Degraded fallback handlers installed", None);
    }

    /// Observes uncaught page errors originating from this plugin's admin
    /// module paths and logs them. Read-only: no intervention.
    pub fn start_error_observer(&self) {
        let admin_prefix = format!("{}/admin/", self.base_path());
        let debug = self.debug.clone();
        let mut receiver = self
            .events
            .subscribe(EventFilter::new().with_event_type("page.error"));

        let handle = tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(event) = receiver.next().await {
                if let Some(page_error) = event.as_any().downcast_ref::<PageErrorEvent>() {
                    if page_error.file.contains(&admin_prefix) {
                        debug.error(
                            "loader",
                            "Uncaught error in admin module",
                            Some(&serde_json::json!({
                                "file": &page_error.file,
                                "message": &page_error.message,
                                "line": page_error.line,
                            })),
                        );
                    }
                }
            }
        });

        *self.error_observer.lock() = Some(handle);
    }
}

#[async_trait::async_trait]
impl Manager for ModuleLoaderManager {
    fn name(&self) -> &str {
        "module_loader"
    }

    fn id(&self) -> Uuid {
        self.state.id()
    }

    async fn initialize(&mut self) -> Result<()> {
        self.start_error_observer();

        // A failed chain leaves the runtime degraded, not broken
        if let Err(e) = self.load_all().await {
            tracing::error!("Admin module loading degraded: {}", e);
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.state.set_state(ManagerState::ShuttingDown).await;
        if let Some(handle) = self.error_observer.lock().take() {
            handle.abort();
        }
        self.state.set_state(ManagerState::Shutdown).await;
        Ok(())
    }

    async fn status(&self) -> ManagerStatus {
        let mut status = self.state.status().await;
        let log = self.load_log.read();
        status.add_metadata("loaded_modules", serde_json::Value::from(log.len()));
        status.add_metadata(
            "module_names",
            serde_json::Value::from(log.iter().map(|r| r.name.clone()).collect::<Vec<_>>()),
        );
        status.add_metadata(
            "degraded",
            serde_json::Value::from(self.fallback_installed.load(Ordering::SeqCst)),
        );
        status.add_metadata("base_path", serde_json::Value::from(self.base_path().to_string()));
        status
    }

    fn is_essential(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminBootstrap, FrontendBootstrap};
    use crate::platform::ui::FormSubmission;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    fn env_with_tab(tab: Option<&str>) -> PageEnvironment {
        let mut query = HashMap::new();
        if let Some(tab) = tab {
            query.insert("tab".to_string(), tab.to_string());
        }
        PageEnvironment {
            admin: Some(AdminBootstrap {
                plugin_url: Some("https://example.test/wp-content/plugins/explainer".to_string()),
                ajax_url: None,
            }),
            query,
            ..Default::default()
        }
    }

    #[test]
    fn test_module_list_skips_job_monitoring_by_default() {
        for tab in [None, Some(""), Some("popular"), Some("post-scan")] {
            let list = compute_module_list(tab);
            assert!(!list.contains(&JOB_MONITORING_MODULE), "tab {:?}", tab);
            assert_eq!(list.len(), BASE_MODULES.len() - 1);
        }
    }

    #[test]
    fn test_module_list_keeps_job_monitoring_on_other_tabs() {
        for tab in ["custom", "api", "jobs", "advanced"] {
            let list = compute_module_list(Some(tab));
            assert!(list.contains(&JOB_MONITORING_MODULE), "tab {}", tab);
            assert_eq!(list.len(), BASE_MODULES.len());
        }
    }

    #[test]
    fn test_module_list_preserves_order() {
        let list = compute_module_list(Some("jobs"));
        assert_eq!(list, BASE_MODULES.to_vec());
        assert_eq!(*list.last().unwrap(), "settings-core");
    }

    #[test]
    fn test_base_path_resolution_order() {
        let admin = PageEnvironment {
            admin: Some(AdminBootstrap {
                plugin_url: Some("https://a.test/plugins/explainer/".to_string()),
                ajax_url: None,
            }),
            frontend: Some(FrontendBootstrap {
                plugin_url: Some("https://b.test/plugins/explainer".to_string()),
            }),
            ..Default::default()
        };
        assert_eq!(resolve_base_path(&admin), "https://a.test/plugins/explainer");

        let frontend = PageEnvironment {
            frontend: Some(FrontendBootstrap {
                plugin_url: Some("https://b.test/plugins/explainer".to_string()),
            }),
            ..Default::default()
        };
        assert_eq!(resolve_base_path(&frontend), "https://b.test/plugins/explainer");

        let scripts = PageEnvironment {
            script_sources: vec![
                "https://c.test/wp-includes/js/jquery.js".to_string(),
                "https://c.test/plugins/explainer/admin/admin.js".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(
            resolve_base_path(&scripts),
            "https://c.test/plugins/explainer/admin"
        );

        assert_eq!(resolve_base_path(&PageEnvironment::default()), DEFAULT_PLUGIN_PATH);
    }

    #[test]
    fn test_script_inference_uses_last_admin_script() {
        let env = PageEnvironment {
            script_sources: vec![
                "https://c.test/old/admin/bootstrap.js".to_string(),
                "https://c.test/new/admin/bootstrap.js".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(resolve_base_path(&env), "https://c.test/new/admin");
    }

    #[test]
    fn test_module_url_joining() {
        assert_eq!(
            module_url("https://a.test/plugins/explainer/", "settings-core"),
            "https://a.test/plugins/explainer/admin/settings-core.js"
        );
    }

    #[derive(Debug, Default)]
    struct RecordingHost {
        fail_on: Option<&'static str>,
        trace: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ModuleHost for RecordingHost {
        async fn execute(&self, name: &str, _url: &str) -> Result<()> {
            self.trace.lock().push(format!("start:{}", name));
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail_on == Some(name) {
                self.trace.lock().push(format!("fail:{}", name));
                return Err(Error::network(None, _url, "fetch failed"));
            }
            self.trace.lock().push(format!("end:{}", name));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingUi {
        submit_guards: AtomicUsize,
        test_handlers: AtomicUsize,
        rich_notices: bool,
        warnings: Mutex<Vec<String>>,
        alerts: Mutex<Vec<String>>,
        guard: Mutex<Option<SubmitGuard>>,
        action: Mutex<Option<ClickAction>>,
    }

    impl std::fmt::Debug for RecordingUi {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RecordingUi")
                .field("rich_notices", &self.rich_notices)
                .finish()
        }
    }

    impl UiBridge for RecordingUi {
        fn install_submit_guard(&self, guard: SubmitGuard) -> Result<()> {
            self.submit_guards.fetch_add(1, Ordering::SeqCst);
            *self.guard.lock() = Some(guard);
            Ok(())
        }

        fn install_api_test_handler(&self, action: ClickAction) -> Result<()> {
            self.test_handlers.fetch_add(1, Ordering::SeqCst);
            *self.action.lock() = Some(action);
            Ok(())
        }

        fn show_warning(&self, message: &str) -> Result<()> {
            if self.rich_notices {
                self.warnings.lock().push(message.to_string());
                Ok(())
            } else {
                Err(Error::ui("notices", "Notice area unavailable"))
            }
        }

        fn alert(&self, message: &str) {
            self.alerts.lock().push(message.to_string());
        }
    }

    fn loader_with(host: Arc<RecordingHost>, ui: Arc<RecordingUi>, tab: Option<&str>) -> ModuleLoaderManager {
        ModuleLoaderManager::new(
            env_with_tab(tab),
            host,
            ui,
            Arc::new(EventBusManager::new()),
            DebugSink::with_tracing(Default::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_modules_load_strictly_in_sequence() {
        let host = Arc::new(RecordingHost::default());
        let ui = Arc::new(RecordingUi::default());
        let loader = loader_with(Arc::clone(&host), ui, None);

        loader.load_all().await.unwrap();

        let trace = host.trace.lock();
        let expected = compute_module_list(None);
        assert_eq!(trace.len(), expected.len() * 2);
        for (i, name) in expected.iter().enumerate() {
            assert_eq!(trace[i * 2], format!("start:{}", name));
            assert_eq!(trace[i * 2 + 1], format!("end:{}", name));
        }

        assert_eq!(loader.state.state().await, ManagerState::Running);
        assert_eq!(loader.loaded_modules(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_short_circuits_and_installs_fallback_once() {
        let host = Arc::new(RecordingHost {
            fail_on: Some("validation"),
            ..Default::default()
        });
        let ui = Arc::new(RecordingUi::default());
        let loader = loader_with(Arc::clone(&host), Arc::clone(&ui), None);

        let error = loader.load_all().await.unwrap_err();
        assert_eq!(error.module_name(), Some("validation"));

        let trace = host.trace.lock();
        assert!(trace.contains(&"fail:validation".to_string()));
        assert!(!trace.iter().any(|t| t.contains("api-key-test")));
        assert!(!trace.iter().any(|t| t.contains("settings-core")));
        drop(trace);

        assert_eq!(ui.submit_guards.load(Ordering::SeqCst), 1);
        assert_eq!(ui.test_handlers.load(Ordering::SeqCst), 1);
        assert_eq!(loader.state.state().await, ManagerState::Degraded);

        // The degraded submit guard always allows submission
        let guard = ui.guard.lock().clone().unwrap();
        let decision = guard(&FormSubmission {
            form_id: "explainer-settings".to_string(),
        });
        assert_eq!(decision, SubmitDecision::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_warning_uses_alert_when_notices_unavailable() {
        let host = Arc::new(RecordingHost {
            fail_on: Some("logger"),
            ..Default::default()
        });
        let ui = Arc::new(RecordingUi::default());
        let loader = loader_with(host, Arc::clone(&ui), None);

        loader.load_all().await.unwrap_err();

        let action = ui.action.lock().clone().unwrap();
        action();
        assert!(ui.warnings.lock().is_empty());
        assert_eq!(ui.alerts.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_list_lengths() {
        let host = Arc::new(RecordingHost::default());
        let ui = Arc::new(RecordingUi::default());

        let default_tab = loader_with(Arc::clone(&host), Arc::clone(&ui), None);
        default_tab.load_all().await.unwrap();
        assert_eq!(default_tab.loaded_modules().len(), BASE_MODULES.len() - 1);

        let host2 = Arc::new(RecordingHost::default());
        let custom_tab = loader_with(Arc::clone(&host2), ui, Some("custom"));
        custom_tab.load_all().await.unwrap();
        assert_eq!(custom_tab.loaded_modules().len(), BASE_MODULES.len());
    }

    #[tokio::test]
    async fn test_page_error_observer_filters_by_admin_path() {
        use crate::debug::{DebugConsole, DebugLevel};

        #[derive(Debug, Default)]
        struct CountingConsole {
            errors: AtomicUsize,
        }

        impl DebugConsole for CountingConsole {
            fn supports(&self, _level: DebugLevel) -> bool {
                true
            }

            fn write(&self, level: DebugLevel, _line: &str, _data: Option<&serde_json::Value>) {
                if level == DebugLevel::Error {
                    self.errors.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let console = Arc::new(CountingConsole::default());
        let debug = DebugSink::new(
            crate::config::DebugSettings {
                enabled: true,
                sections: [("loader".to_string(), true)].into_iter().collect(),
            },
            Arc::clone(&console) as Arc<dyn DebugConsole>,
        );

        let events = Arc::new(EventBusManager::new());
        let loader = ModuleLoaderManager::new(
            env_with_tab(None),
            Arc::new(RecordingHost::default()),
            Arc::new(RecordingUi::default()),
            Arc::clone(&events),
            debug,
        );
        loader.start_error_observer();

        events
            .publish(PageErrorEvent {
                file: "https://example.test/wp-content/plugins/explainer/admin/utils.js".to_string(),
                message: "boom".to_string(),
                line: Some(10),
                metadata: Metadata::new(),
            })
            .unwrap();
        events
            .publish(PageErrorEvent {
                file: "https://example.test/wp-includes/js/jquery.js".to_string(),
                message: "unrelated".to_string(),
                line: None,
                metadata: Metadata::new(),
            })
            .unwrap();

        // Let the observer task drain its channel
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(console.errors.load(Ordering::SeqCst), 1);
    }
}
