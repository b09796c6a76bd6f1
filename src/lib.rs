// Library surface for headless/integration tests and reuse.
// Keep this lean to avoid coupling to bin-only types in main.rs.
pub mod app_dirs;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod runtime;
pub mod scoring;
pub mod service;
pub mod session;
pub mod stimulus;
pub mod store;
pub mod timer;
pub mod util;

pub use catalog::{Catalog, TestDefinition, TestKind};
pub use controller::SessionController;
pub use error::EngineError;
pub use scoring::{Level, Outcome};
pub use service::{ResultService, ServiceError};
