use dax_state::StateError;

pub(crate) fn map_redis_err(e: redis::RedisError) -> StateError {
    use redis::ErrorKind;
    match e.kind() {
        ErrorKind::IoError | ErrorKind::AuthenticationFailed => StateError::Unavailable(e.to_string()),
        _ => StateError::Other(e.to_string()),
    }
}
