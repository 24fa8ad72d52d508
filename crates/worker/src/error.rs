use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Broker(#[from] dax_broker::BrokerError),
}

/// The error shape a [`crate::Handler`] returns. Carried straight into the
/// reply/callback's `ActionError` on the terminal path, so a handler need
/// not know anything about envelopes or retries.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub error_type: String,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<Value>,
    /// When `true`, the worker skips the retry budget and treats this
    /// delivery as terminal immediately (e.g. a policy rejection, which
    /// will never succeed on redelivery).
    pub terminal: bool,
}

impl HandlerError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            code: None,
            details: None,
            terminal: false,
        }
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
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

impl From<HandlerError> for dax_envelope::ActionError {
    fn from(err: HandlerError) -> Self {
        let mut action_error = dax_envelope::ActionError::new(err.error_type, err.message);
        if let Some(code) = err.code {
            action_error = action_error.with_code(code);
        }
        if let Some(details) = err.details {
            action_error = action_error.with_details(details);
        }
        action_error
    }
}
