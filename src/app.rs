// src/app.rs

//! Composition root
//!
//! Wires the runtime together from the server-rendered page environment:
//! debug sink, event bus, localization, shared context, modal bridge, and
//! module loader, in that order. Components receive their collaborators
//! explicitly; nothing reaches into a shared global namespace.
//!
//! Initialization runs as named sequential steps with per-step timeouts.
//! Optional steps may fail without aborting startup; a failed module
//! chain leaves the runtime degraded rather than broken.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::PageEnvironment;
use crate::debug::DebugSink;
use crate::event::EventBusManager;
use crate::loader::{ModuleHost, ModuleLoaderManager};
use crate::localization::LocalizationClient;
use crate::manager::{Manager, ManagerState};
use crate::modal::{ModalBridge, ModalRegistry};
use crate::platform::network::NetworkArc;
use crate::platform::ui::UiBridge;
use crate::shared::SharedContext;

/// Collaborators the hosting integration must supply
pub struct RuntimeOptions {
    pub host: Arc<dyn ModuleHost>,
    pub network: NetworkArc,
    pub ui: Arc<dyn UiBridge>,
    /// Bound on modal readiness waits; `None` waits indefinitely
    pub modal_wait_timeout: Option<Duration>,
}

impl RuntimeOptions {
    pub fn new(host: Arc<dyn ModuleHost>, network: NetworkArc) -> Self {
        Self {
            host,
            network,
            ui: Arc::new(crate::platform::ui::TracingUiBridge),
            modal_wait_timeout: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiBridge>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_modal_wait_timeout(mut self, timeout: Duration) -> Self {
        self.modal_wait_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
struct InitStep {
    name: &'static str,
    timeout: Duration,
    optional: bool,
}

const INIT_STEPS: [InitStep; 5] = [
    InitStep { name: "logging", timeout: Duration::from_secs(5), optional: true },
    InitStep { name: "event_bus", timeout: Duration::from_secs(5), optional: false },
    InitStep { name: "shared_context", timeout: Duration::from_secs(5), optional: false },
    InitStep { name: "modal_bridge", timeout: Duration::from_secs(5), optional: false },
    InitStep { name: "module_loader", timeout: Duration::from_secs(30), optional: true },
];

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Initialization step '{step}' failed: {error} (took {duration:?})")]
    StepFailed {
        step: String,
        error: String,
        duration: Duration,
    },
    #[error("Initialization step '{step}' timed out after {timeout:?}")]
    Timeout { step: String, timeout: Duration },
}

/// The assembled client runtime for one page load
pub struct ClientRuntime {
    env: PageEnvironment,
    debug: DebugSink,
    events: Arc<EventBusManager>,
    localization: Arc<LocalizationClient>,
    shared: Arc<SharedContext>,
    modal_registry: Arc<ModalRegistry>,
    modal: Arc<ModalBridge>,
    loader: ModuleLoaderManager,
    logging_ready: bool,
    events_ready: bool,
    shared_ready: bool,
    modal_ready: bool,
    modules_ready: bool,
}

impl std::fmt::Debug for ClientRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("modules_ready", &self.modules_ready)
            .field("modal_ready", &self.modal_ready)
            .finish()
    }
}

impl ClientRuntime {
    /// Wires the runtime from the page environment. Pure construction;
    /// call `initialize` to start it.
    pub fn new(env: PageEnvironment, options: RuntimeOptions) -> Self {
        let debug = DebugSink::with_tracing(env.debug.clone());

        let events = Arc::new(EventBusManager::new());

        let localization = Arc::new(LocalizationClient::new(
            env.ajax_url(),
            env.nonce().map(str::to_string),
            Arc::clone(&options.network),
            debug.clone(),
        ));

        let shared = Arc::new(SharedContext::new(Arc::clone(&localization), debug.clone()));

        let modal_registry = Arc::new(ModalRegistry::new());
        let modal = ModalBridge::new(
            &events,
            Arc::clone(&modal_registry),
            debug.clone(),
            options.modal_wait_timeout,
        );

        let loader = ModuleLoaderManager::new(
            env.clone(),
            Arc::clone(&options.host),
            Arc::clone(&options.ui),
            Arc::clone(&events),
            debug.clone(),
        );

        Self {
            env,
            debug,
            events,
            localization,
            shared,
            modal_registry,
            modal,
            loader,
            logging_ready: false,
            events_ready: false,
            shared_ready: false,
            modal_ready: false,
            modules_ready: false,
        }
    }

    /// Runs the initialization steps in order
    pub async fn initialize(&mut self) -> Result<(), InitError> {
        info!("Starting explainer client initialization");

        for (index, step) in INIT_STEPS.iter().enumerate() {
            let step_start = std::time::Instant::now();
            info!("Step {}/{}: {}", index + 1, INIT_STEPS.len(), step.name);

            let result = tokio::time::timeout(step.timeout, self.run_init_step(step.name)).await;

            match result {
                Ok(Ok(())) => {
                    info!("Step {} completed in {:?}", step.name, step_start.elapsed());
                }
                Ok(Err(e)) => {
                    let duration = step_start.elapsed();
                    if step.optional {
                        warn!("Step {} failed (optional) in {:?}: {}", step.name, duration, e);
                    } else {
                        error!("Step {} failed (required) in {:?}: {}", step.name, duration, e);
                        return Err(InitError::StepFailed {
                            step: step.name.to_string(),
                            error: e.to_string(),
                            duration,
                        });
                    }
                }
                Err(_) => {
                    error!("Step {} timed out after {:?}", step.name, step.timeout);
                    if !step.optional {
                        return Err(InitError::Timeout {
                            step: step.name.to_string(),
                            timeout: step.timeout,
                        });
                    }
                }
            }
        }

        info!("Explainer client initialization complete: {}", self.status_line());
        Ok(())
    }

    async fn run_init_step(
        &mut self,
        step_name: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match step_name {
            "logging" => {
                // The hosting process may already own a subscriber
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                    )
                    .with_target(false)
                    .try_init();
                self.logging_ready = true;
                Ok(())
            }
            "event_bus" => {
                // Construction already armed the bus; record readiness
                self.events_ready = true;
                Ok(())
            }
            "shared_context" => {
                let settings = self.env.settings.clone().unwrap_or_default();
                self.shared.init(&settings);
                self.shared_ready = true;
                Ok(())
            }
            "modal_bridge" => {
                // Listeners were registered at construction time
                self.modal_ready = true;
                Ok(())
            }
            "module_loader" => {
                self.loader.start_error_observer();
                self.loader.load_all().await?;
                self.modules_ready = true;
                Ok(())
            }
            _ => Err(format!("Unknown initialization step: {}", step_name).into()),
        }
    }

    /// Human-readable readiness summary
    pub fn status_line(&self) -> String {
        format!(
            "Logging: {} | Events: {} | Shared: {} | Modal: {} | Modules: {}",
            if self.logging_ready { "ok" } else { "-" },
            if self.events_ready { "ok" } else { "-" },
            if self.shared_ready { "ok" } else { "-" },
            if self.modal_ready { "ok" } else { "-" },
            if self.modules_ready { "ok" } else { "degraded" },
        )
    }

    /// Whether the module chain reached the ready state
    pub async fn is_degraded(&self) -> bool {
        self.loader_state().await == ManagerState::Degraded
    }

    async fn loader_state(&self) -> ManagerState {
        self.loader.status().await.state
    }

    pub fn debug(&self) -> &DebugSink {
        &self.debug
    }

    pub fn events(&self) -> &Arc<EventBusManager> {
        &self.events
    }

    pub fn shared(&self) -> &Arc<SharedContext> {
        &self.shared
    }

    pub fn localization(&self) -> &Arc<LocalizationClient> {
        &self.localization
    }

    pub fn modal_registry(&self) -> &Arc<ModalRegistry> {
        &self.modal_registry
    }

    pub fn modal(&self) -> &Arc<ModalBridge> {
        &self.modal
    }

    pub fn loader(&self) -> &ModuleLoaderManager {
        &self.loader
    }

    /// Stops listeners and shuts the loader down
    pub async fn shutdown(&mut self) {
        self.modal.shutdown();
        if let Err(e) = self.loader.shutdown().await {
            warn!("Module loader shutdown failed: {}", e);
        }
        self.modules_ready = false;
        self.modal_ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::loader::BASE_MODULES;
    use crate::platform::network::{NetworkProvider, NetworkRequest, NetworkResponse};

    #[derive(Debug, Default)]
    struct ImmediateHost {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ModuleHost for ImmediateHost {
        async fn execute(&self, name: &str, url: &str) -> Result<()> {
            if self.fail {
                Err(Error::module(name, "unreachable").with_url(url))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug)]
    struct OfflineNetwork;

    #[async_trait::async_trait]
    impl NetworkProvider for OfflineNetwork {
        async fn request(&self, request: NetworkRequest) -> Result<NetworkResponse> {
            Err(Error::network(None, &request.url, "offline"))
        }
    }

    fn runtime(fail_modules: bool) -> ClientRuntime {
        let env = PageEnvironment::from_json(serde_json::json!({
            "admin": { "pluginUrl": "https://example.test/wp-content/plugins/explainer" },
            "settings": { "debug_mode": true }
        }))
        .unwrap();

        ClientRuntime::new(
            env,
            RuntimeOptions::new(
                Arc::new(ImmediateHost { fail: fail_modules }),
                Arc::new(OfflineNetwork),
            ),
        )
    }

    #[tokio::test]
    async fn test_full_initialization_reaches_ready() {
        let mut runtime = runtime(false);
        runtime.initialize().await.unwrap();

        assert!(!runtime.is_degraded().await);
        assert_eq!(
            runtime.loader().loaded_modules().len(),
            BASE_MODULES.len() - 1
        );
        assert!(runtime.shared().debug_mode());
        assert!(runtime.status_line().contains("Modules: ok"));
    }

    #[tokio::test]
    async fn test_module_failure_degrades_but_initializes() {
        let mut runtime = runtime(true);
        runtime.initialize().await.unwrap();

        assert!(runtime.is_degraded().await);
        assert!(runtime.loader().loaded_modules().is_empty());
        assert!(runtime.status_line().contains("Modules: degraded"));
    }

    #[tokio::test]
    async fn test_shutdown_is_clean() {
        let mut runtime = runtime(false);
        runtime.initialize().await.unwrap();
        runtime.shutdown().await;
        assert!(runtime.status_line().contains("Modules: degraded"));
    }
}
