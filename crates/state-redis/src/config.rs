#[derive(Debug, Clone)]
pub struct RedisStateConfig {
    pub url: String,
}

impl Default for RedisStateConfig {
    fn default() -> Self {
        Self { url: "redis://127.0.0.1:6379".to_string() }
    }
}
