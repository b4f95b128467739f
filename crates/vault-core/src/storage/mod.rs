//! Storage backends for encrypted credential persistence
//!
//! This module provides two backends behind [`CredentialStore`]:
//! 1. JSON file in the user's data directory
//! 2. In-memory (tests, ephemeral sessions)

mod file;
mod memory;
mod snapshot;
mod traits;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use traits::CredentialStore;
