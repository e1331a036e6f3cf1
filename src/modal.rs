// src/modal.rs

//! Terms-modal integration
//!
//! The terms modal itself belongs to another component; this bridge only
//! routes open requests to it. Requests arrive two ways: page clicks on
//! elements carrying the marker attribute, and the custom open event.
//! Readiness is an explicit watch signal resolved when the modal
//! registers; waiting is unbounded unless a timeout is configured.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::debug::DebugSink;
use crate::event::{Event, EventBusManager, EventFilter};
use crate::platform::ui::ModalHandle;
use crate::types::{Metadata, PostId};

/// Marker attribute that makes an element open the terms modal on click
pub const MODAL_MARKER_ATTR: &str = "data-explainer-open-terms-modal";

/// Optional attribute carrying the post the terms apply to
pub const POST_ID_ATTR: &str = "data-post-id";

/// Event type of the custom open request
pub const OPEN_TERMS_EVENT: &str = "explainer.open-terms-modal";

/// Attributes of one element in a click path
pub type Dataset = HashMap<String, String>;

/// A click on the hosting page, as the element path from the click target
/// up to the document root
#[derive(Debug, Clone)]
pub struct PageClickEvent {
    pub path: Vec<Dataset>,
    pub metadata: Metadata,
}

impl Event for PageClickEvent {
    fn event_type(&self) -> &'static str {
        "page.click"
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

/// The custom open request dispatched by other plugin components
#[derive(Debug, Clone)]
pub struct TermsModalEvent {
    pub post_id: Option<PostId>,
    pub metadata: Metadata,
}

impl Event for TermsModalEvent {
    fn event_type(&self) -> &'static str {
        OPEN_TERMS_EVENT
    }

    fn source(&self) -> &str {
        "explainer"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Finds the first element in a click path carrying `attr`. A miss logs a
/// warning and yields `None` rather than erroring.
pub fn find_marked_element<'a>(
    path: &'a [Dataset],
    attr: &str,
    debug: &DebugSink,
) -> Option<&'a Dataset> {
    let found = path.iter().find(|dataset| dataset.contains_key(attr));
    if found.is_none() {
        debug.warn(
            "modal",
            &format!("No element carrying '{}' in click path", attr),
            None,
        );
    }
    found
}

/// Readiness signal for the externally-owned terms modal
pub struct ModalRegistry {
    sender: watch::Sender<Option<Arc<dyn ModalHandle>>>,
}

impl std::fmt::Debug for ModalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModalRegistry")
            .field("ready", &self.current().is_some())
            .finish()
    }
}

impl ModalRegistry {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(None);
        Self { sender }
    }

    /// Registers the modal, resolving every pending wait
    pub fn register(&self, handle: Arc<dyn ModalHandle>) {
        self.sender.send_replace(Some(handle));
    }

    /// The modal handle, when already registered
    pub fn current(&self) -> Option<Arc<dyn ModalHandle>> {
        self.sender.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Arc<dyn ModalHandle>>> {
        self.sender.subscribe()
    }
}

impl Default for ModalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes click and custom-event open requests to the terms modal
pub struct ModalBridge {
    registry: Arc<ModalRegistry>,
    debug: DebugSink,
    wait_timeout: Option<Duration>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for ModalBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModalBridge")
            .field("wait_timeout", &self.wait_timeout)
            .field("listeners", &self.tasks.lock().len())
            .finish()
    }
}

impl ModalBridge {
    /// Creates the bridge and registers both listeners for the remainder
    /// of the runtime's lifetime.
    pub fn new(
        events: &EventBusManager,
        registry: Arc<ModalRegistry>,
        debug: DebugSink,
        wait_timeout: Option<Duration>,
    ) -> Arc<Self> {
        let bridge = Arc::new(Self {
            registry,
            debug,
            wait_timeout,
            tasks: Mutex::new(Vec::new()),
        });

        let clicks = {
            let bridge = Arc::clone(&bridge);
            let mut receiver = events.subscribe(EventFilter::new().with_event_type("page.click"));
            tokio::spawn(async move {
                use futures::StreamExt;
                while let Some(event) = receiver.next().await {
                    if let Some(click) = event.as_any().downcast_ref::<PageClickEvent>() {
                        bridge.route_click(click).await;
                    }
                }
            })
        };

        let custom = {
            let bridge = Arc::clone(&bridge);
            let mut receiver = events.subscribe(EventFilter::new().with_event_type(OPEN_TERMS_EVENT));
            tokio::spawn(async move {
                use futures::StreamExt;
                while let Some(event) = receiver.next().await {
                    if let Some(request) = event.as_any().downcast_ref::<TermsModalEvent>() {
                        bridge.open_terms_modal(request.post_id).await;
                    }
                }
            })
        };

        bridge.tasks.lock().extend([clicks, custom]);
        bridge
    }

    async fn route_click(&self, click: &PageClickEvent) {
        // Most clicks have nothing to do with the modal; stay silent
        let Some(dataset) = click.path.iter().find(|d| d.contains_key(MODAL_MARKER_ATTR)) else {
            return;
        };
        let post_id = dataset.get(POST_ID_ATTR).and_then(|v| v.parse().ok());
        self.open_terms_modal(post_id).await;
    }

    /// Opens the terms modal, waiting for it to register first if needed.
    /// With no timeout configured the wait is unbounded; with one, expiry
    /// logs a warning and drops the request.
    pub async fn open_terms_modal(&self, post_id: Option<PostId>) {
        if let Some(handle) = self.registry.current() {
            handle.open(post_id);
            return;
        }

        self.debug.log(
            "modal",
            "Terms modal not ready yet, waiting for registration",
            Some(&serde_json::json!({ "post_id": post_id })),
        );

        let wait = self.wait_for_handle();
        let handle = match self.wait_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(handle) => handle,
                Err(_) => {
                    self.debug.warn(
                        "modal",
                        "Terms modal never registered; dropping open request",
                        Some(&serde_json::json!({ "timeout_ms": timeout.as_millis() as u64 })),
                    );
                    return;
                }
            },
            None => wait.await,
        };

        if let Some(handle) = handle {
            handle.open(post_id);
        }
    }

    async fn wait_for_handle(&self) -> Option<Arc<dyn ModalHandle>> {
        let mut receiver = self.registry.subscribe();
        loop {
            if let Some(handle) = receiver.borrow().clone() {
                return Some(handle);
            }
            // The registry outlives the bridge; a closed channel means
            // shutdown is underway
            if receiver.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Stops both listeners
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Recognized options for `build_modal_button`
#[derive(Debug, Clone, Default)]
pub struct ModalButtonOptions {
    pub text: Option<String>,
    pub class_name: Option<String>,
    pub icon: Option<String>,
    pub style: HashMap<String, String>,
}

/// Element model of a terms-modal trigger button
#[derive(Debug, Clone, PartialEq)]
pub struct ModalButton {
    pub tag: &'static str,
    pub attributes: HashMap<String, String>,
    pub icon_markup: Option<String>,
    pub label: String,
    pub style: HashMap<String, String>,
}

/// Builds a clickable element carrying the marker attribute, with the
/// default inline styles overlaid by any caller-supplied ones.
pub fn build_modal_button(options: ModalButtonOptions) -> ModalButton {
    let mut attributes = HashMap::new();
    attributes.insert(MODAL_MARKER_ATTR.to_string(), "true".to_string());
    attributes.insert(
        "class".to_string(),
        options
            .class_name
            .unwrap_or_else(|| "explainer-terms-button".to_string()),
    );

    let mut style: HashMap<String, String> = [
        ("cursor", "pointer"),
        ("background", "none"),
        ("border", "none"),
        ("text-decoration", "underline"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    style.extend(options.style);

    ModalButton {
        tag: "button",
        attributes,
        icon_markup: options.icon,
        label: options.text.unwrap_or_else(|| "Terms of Use".to_string()),
        style,
    }
}
