mod engine;
mod error;
mod table;
mod window;

pub use engine::TierPolicyEngine;
pub use error::TierError;
pub use table::{LimitSpec, TierTable};
pub use window::Window;
