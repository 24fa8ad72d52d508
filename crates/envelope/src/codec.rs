use bytes::Bytes;

use crate::action::{DomainAction, DomainActionResponse};
use crate::error::{EnvelopeError, PoisonError};

/// Encode an action to its wire form. Field order is stable (struct
/// declaration order, as `serde_json` preserves it), so identical logical
/// messages always produce identical bytes.
pub fn encode(action: &DomainAction) -> Result<Bytes, EnvelopeError> {
    Ok(Bytes::from(serde_json::to_vec(action)?))
}

/// Decode an action from its wire form.
///
/// A parse failure is a poison-message condition: the caller must route
/// the raw bytes to a dead-letter stream rather than retry.
pub fn decode(raw: Bytes) -> Result<DomainAction, PoisonError> {
    serde_json::from_slice(&raw).map_err(|source| PoisonError { raw, source })
}

pub fn encode_response(response: &DomainActionResponse) -> Result<Bytes, EnvelopeError> {
    Ok(Bytes::from(serde_json::to_vec(response)?))
}

pub fn decode_response(raw: Bytes) -> Result<DomainActionResponse, PoisonError> {
    serde_json::from_slice(&raw).map_err(|source| PoisonError { raw, source })
}
