//! Testing utilities and mock implementations
//!
//! Mock transports for exercising the session without an MQTT broker.

pub mod mocks;

pub use mocks::*;
