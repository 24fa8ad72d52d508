use std::fmt;

/// Fixed segment distinguishing what a key is for. Closed enumeration, so
/// collisions between kinds are impossible by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Stream: a service's inbound action stream.
    Actions,
    /// List: a single-use pseudo-sync response list.
    Responses,
    /// Stream: a service's inbound callback stream.
    Callbacks,
    /// Stream: a service's dead-letter stream.
    Dlq,
    /// Entity: a cached/stateful value.
    State,
    /// Counter: per-window usage accounting.
    Usage,
    /// Counter: generic rate-limit accounting.
    Ratelimit,
}

impl KeyKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Actions => "actions",
            Self::Responses => "responses",
            Self::Callbacks => "callbacks",
            Self::Dlq => "dlq",
            Self::State => "state",
            Self::Usage => "usage",
            Self::Ratelimit => "ratelimit",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "actions" => Ok(Self::Actions),
            "responses" => Ok(Self::Responses),
            "callbacks" => Ok(Self::Callbacks),
            "dlq" => Ok(Self::Dlq),
            "state" => Ok(Self::State),
            "usage" => Ok(Self::Usage),
            "ratelimit" => Ok(Self::Ratelimit),
            _ => Err(()),
        }
    }
}
