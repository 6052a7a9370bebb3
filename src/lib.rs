// src/lib.rs

// Re-export core APIs for users of the crate.
pub use base_request::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
pub use context::{Context, RunConfig};
pub use loader::{load, LoadError};
pub use runner::{PathReport, RunStats, Runner};
pub use test_case::{TestCase, TestResult};

pub mod base_cli;
pub mod base_request;
pub mod context;
pub mod evaluator;
pub mod loader;
pub mod path;
pub mod report;
pub mod runner;
pub mod script;
pub mod spec;
pub mod suggest;
pub mod test_case;
pub mod validator;
