use crate::error::KeyspaceError;
use crate::kind::KeyKind;

/// Generates and parses every Redis key the platform uses.
///
/// `<root>:<env>:<service>:<kind>[:<segment>...]`. No component outside
/// this module may build a key by string concatenation.
#[derive(Debug, Clone)]
pub struct Keyspace {
    root: String,
    env: String,
}

/// The components recovered by [`Keyspace::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub root: String,
    pub env: String,
    pub service: String,
    pub kind: KeyKind,
    pub segments: Vec<String>,
}

impl Keyspace {
    pub fn new(root: impl Into<String>, env: impl Into<String>) -> Self {
        Self { root: root.into(), env: env.into() }
    }

    fn build(&self, service: &str, kind: KeyKind, segments: &[&str]) -> String {
        let mut key = format!("{}:{}:{}:{}", self.root, self.env, service, kind);
        for segment in segments {
            key.push(':');
            key.push_str(segment);
        }
        key
    }

    /// `service`'s inbound action stream.
    pub fn actions(&self, service: &str) -> String {
        self.build(service, KeyKind::Actions, &[])
    }

    /// A single-use pseudo-sync response list for `correlation_id`.
    pub fn responses(&self, service: &str, correlation_id: &str) -> String {
        self.build(service, KeyKind::Responses, &[correlation_id])
    }

    /// `service`'s inbound callback stream.
    pub fn callbacks(&self, service: &str) -> String {
        self.build(service, KeyKind::Callbacks, &[])
    }

    /// `service`'s dead-letter stream.
    pub fn dlq(&self, service: &str) -> String {
        self.build(service, KeyKind::Dlq, &[])
    }

    /// Cached entity key under `service`'s keyspace prefix. `segments`
    /// encodes entity identity, e.g. `&[entity_type, entity_id]`.
    pub fn state(&self, service: &str, segments: &[&str]) -> String {
        self.build(service, KeyKind::State, segments)
    }

    /// Per-window usage counter for `(tenant_id, resource, window)`.
    pub fn usage(&self, service: &str, tenant_id: &str, resource: &str, window: &str) -> String {
        self.build(service, KeyKind::Usage, &[tenant_id, resource, window])
    }

    /// Generic rate-limit counter.
    pub fn ratelimit(&self, service: &str, segments: &[&str]) -> String {
        self.build(service, KeyKind::Ratelimit, segments)
    }

    /// Recovers the components of any key this module generated; rejects
    /// malformed input.
    pub fn parse(&self, key: &str) -> Result<ParsedKey, KeyspaceError> {
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() < 4 {
            return Err(KeyspaceError::TooShort(key.to_string()));
        }
        let kind = parts[3]
            .parse::<KeyKind>()
            .map_err(|()| KeyspaceError::UnknownKind(key.to_string(), parts[3].to_string()))?;

        Ok(ParsedKey {
            root: parts[0].to_string(),
            env: parts[1].to_string(),
            service: parts[2].to_string(),
            kind,
            segments: parts[4..].iter().map(|s| (*s).to_string()).collect(),
        })
    }
}
