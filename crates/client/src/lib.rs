mod client;
mod error;

pub use client::DomainActionClient;
pub use error::ClientError;
