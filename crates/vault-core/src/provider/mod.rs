//! Supported AI providers, their static configuration, and per-provider
//! credential format validation

mod config;
mod validation;

pub use config::{ProviderConfig, Provider};
pub use validation::{validate_format, FormatRule};
