mod error;
mod store;

pub use error::StateError;
pub use store::{StateStore, Version, typed};
