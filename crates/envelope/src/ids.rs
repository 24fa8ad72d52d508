//! ID generators backing `action_id` / `correlation_id` / `trace_id`.
//!
//! ULIDs are used rather than bare UUIDs: lexicographically sortable by
//! generation time, and still a 128-bit value, so collision across the
//! fleet is astronomically unlikely.

pub fn new_action_id() -> String {
    ulid::Ulid::new().to_string()
}

pub fn new_correlation_id() -> String {
    ulid::Ulid::new().to_string()
}

pub fn new_trace_id() -> String {
    ulid::Ulid::new().to_string()
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}
