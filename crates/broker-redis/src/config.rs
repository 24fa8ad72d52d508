#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    pub url: String,
}

impl Default for RedisBrokerConfig {
    fn default() -> Self {
        Self { url: "redis://127.0.0.1:6379".to_string() }
    }
}
