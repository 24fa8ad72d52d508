use dax_broker::BrokerError;

pub(crate) fn map_redis_err(e: redis::RedisError) -> BrokerError {
    use redis::ErrorKind;
    match e.kind() {
        ErrorKind::IoError | ErrorKind::AuthenticationFailed => BrokerError::Unavailable(e.to_string()),
        _ => BrokerError::Other(e.to_string()),
    }
}

/// Distinguish the benign nil reply from a blocking read's timeout from a
/// genuine Redis error.
pub(crate) fn is_timeout_nil(e: &redis::RedisError) -> bool {
    matches!(e.kind(), redis::ErrorKind::TypeError)
}
