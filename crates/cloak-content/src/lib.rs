//! Managed content collection for Cloak: the flat storage directory, single-file transfer
//! into it, and encrypt/decrypt orchestration against a [`cloak_core::CryptoEngine`].

pub mod error;
pub mod orchestrator;
pub mod store;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use error::ContentError;
pub use orchestrator::{EncryptionOrchestrator, DEFAULT_TASK_TIMEOUT};
pub use store::ContentStore;
