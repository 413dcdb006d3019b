pub mod config;
pub mod error;
pub mod registry;
pub mod tools;
pub mod transport;
pub mod upload;
pub mod worker;

pub use config::Config;
pub use error::ServiceError;
pub use registry::Registry;
pub use tools::{ToolCall, ToolResponse, Tools};
pub use worker::WorkerPool;
