// src/platform/ui.rs

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::types::PostId;

/// A form submission about to happen on the admin screen
#[derive(Debug, Clone)]
pub struct FormSubmission {
    pub form_id: String,
}

/// Verdict of a submit guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitDecision {
    Allow,
    Block,
}

pub type SubmitGuard = Arc<dyn Fn(&FormSubmission) -> SubmitDecision + Send + Sync>;

pub type ClickAction = Arc<dyn Fn() + Send + Sync>;

/// The external terms modal's contract
pub trait ModalHandle: Send + Sync + Debug {
    fn open(&self, post_id: Option<PostId>);
}

/// Surface the hosting page exposes to the runtime
pub trait UiBridge: Send + Sync + Debug {
    /// Installs a guard consulted before settings forms submit
    fn install_submit_guard(&self, guard: SubmitGuard) -> Result<()>;

    /// Installs a click handler on the provider API-key test controls
    fn install_api_test_handler(&self, action: ClickAction) -> Result<()>;

    /// Shows a styled warning notice. Errors when the rich notice
    /// mechanism is unavailable; callers fall back to `alert`.
    fn show_warning(&self, message: &str) -> Result<()>;

    /// Plain alert. Always available.
    fn alert(&self, message: &str);
}

/// Default bridge that records intent through tracing. Real page bindings
/// live in the hosting integration; this keeps headless runs functional.
#[derive(Debug, Default)]
pub struct TracingUiBridge;

impl UiBridge for TracingUiBridge {
    fn install_submit_guard(&self, _guard: SubmitGuard) -> Result<()> {
        tracing::debug!("Submit guard installed");
        Ok(())
    }

    fn install_api_test_handler(&self, _action: ClickAction) -> Result<()> {
        tracing::debug!("API-key test handler installed");
        Ok(())
    }

    fn show_warning(&self, message: &str) -> Result<()> {
        tracing::warn!("{}", message);
        Ok(())
    }

    fn alert(&self, message: &str) {
        tracing::warn!("[alert] {}", message);
    }
}
