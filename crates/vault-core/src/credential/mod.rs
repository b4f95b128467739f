//! Credential management: records, listing results, and the manager that
//! enforces the vault's invariants

mod manager;
mod types;

pub use manager::CredentialManager;
pub use types::*;
