//! # vault-cli
//!
//! Command-line front end for the BYOK vault. Commands are plain async
//! functions over [`vault_core::Vault`] that return the text to print, so the
//! binary only handles argument parsing, prompting, and logging setup.

pub mod commands;

pub use commands::{run, Command};
