use std::collections::HashMap;
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for managers, events, subscriptions, etc.
pub type Id = Uuid;

/// Generic metadata container
pub type Metadata = HashMap<String, Value>;

/// Correlation ID for tracking related operations
pub type CorrelationId = Uuid;

/// Localized display strings keyed by string identifier
pub type StringMap = HashMap<String, String>;

/// Post identifier carried by the terms-modal contracts
pub type PostId = u64;
