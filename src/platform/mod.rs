// src/platform/mod.rs

//! Seams to the hosting page
//!
//! The runtime never touches the network or the page's UI surface
//! directly; it goes through the provider traits here. The hosting
//! integration supplies real implementations, tests supply controllable
//! ones.

pub mod network;
pub mod ui;

pub use network::{form_encode, form_post, HttpNetworkProvider, NetworkArc, NetworkProvider, NetworkRequest, NetworkResponse};
pub use ui::{ClickAction, FormSubmission, ModalHandle, SubmitDecision, SubmitGuard, TracingUiBridge, UiBridge};
