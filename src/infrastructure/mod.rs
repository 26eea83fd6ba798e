//! Infrastructure layer module
//!
//! Process-wide concerns that sit outside the domain:
//! - Configuration management (figment, YAML plus environment)
//! - Logging infrastructure (tracing)

pub mod config;
pub mod logging;
