//! Production crypto engine for Cloak.
//! Seals managed files with AES-256-GCM using a key held in the OS keyring (or test doubles).

pub mod aes_engine;
pub mod key_provider;

pub use aes_engine::AesGcmEngine;
pub use key_provider::{InMemoryKeyProvider, KeyProvider, KeyringProvider};
