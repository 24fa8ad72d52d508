use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of work moved over a Redis stream.
///
/// `action_id`, `origin_service`, and `created_at` are stamped by the
/// client at emit time and are immutable afterward. `trace_id` is copied
/// verbatim onto every action derived from a root request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAction {
    pub action_id: String,
    pub action_type: String,
    pub origin_service: String,
    pub target_service: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub task_id: Option<String>,

    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,

    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<HashMap<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub callback_queue_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub callback_action_type: Option<String>,

    pub created_at: u64,
}

/// Which of the three interaction modes an action is carrying.
///
/// Derived structurally from `callback_queue_name`/`callback_action_type`
/// rather than tracked as a separate field, so the "exactly one of three
/// modes" invariant can never drift out of sync with the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionMode {
    FireAndForget,
    PseudoSync { response_list: String },
    AsyncWithCallback { callback_stream: String, callback_action_type: String },
}

impl DomainAction {
    pub fn mode(&self) -> ActionMode {
        match (&self.callback_queue_name, &self.callback_action_type) {
            (Some(list), None) => ActionMode::PseudoSync { response_list: list.clone() },
            (Some(stream), Some(action_type)) => ActionMode::AsyncWithCallback {
                callback_stream: stream.clone(),
                callback_action_type: action_type.clone(),
            },
            (None, _) => ActionMode::FireAndForget,
        }
    }
}

/// Structured error body surfaced to callers on any non-success path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Value>,
}

impl ActionError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A direct reply to a pseudo-sync action. Transient: written once to a
/// dedicated response list and consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainActionResponse {
    pub correlation_id: String,
    pub trace_id: String,
    pub action_type_response_to: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ActionError>,
}

impl DomainActionResponse {
    pub fn ok(correlation_id: String, trace_id: String, action_type_response_to: String, data: Option<Value>) -> Self {
        Self {
            correlation_id,
            trace_id,
            action_type_response_to,
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(
        correlation_id: String,
        trace_id: String,
        action_type_response_to: String,
        error: ActionError,
    ) -> Self {
        Self {
            correlation_id,
            trace_id,
            action_type_response_to,
            success: false,
            data: None,
            error: Some(error),
        }
    }
}
