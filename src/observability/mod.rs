//! Observability for the session and its transport
//!
//! Structured logging via `tracing`, plus span macros for the connect loop and
//! the transport event task.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

pub use logging::{mqtt_span, session_span};
