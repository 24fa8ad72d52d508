mod action;
mod codec;
mod error;
mod ids;

pub use action::{ActionError, ActionMode, DomainAction, DomainActionResponse};
pub use codec::{decode, decode_response, encode, encode_response};
pub use error::{EnvelopeError, PoisonError};
pub use ids::{new_action_id, new_correlation_id, new_trace_id, now_millis};
