use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyspaceError {
    #[error("key '{0}' has too few segments")]
    TooShort(String),

    #[error("key '{0}' has unknown kind segment '{1}'")]
    UnknownKind(String, String),
}
