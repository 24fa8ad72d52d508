mod error;
mod handler;
mod worker;

pub use error::{HandlerError, WorkerError};
pub use handler::{Handler, PolicyGate};
pub use worker::{Worker, WorkerConfig};
