//! Core abstractions for Cloak: content items, the crypto engine contract, and change
//! notification. Kept free of filesystem policy so engines and stores can share it.

pub mod content;
pub mod engine;
pub mod notify;

pub use content::{ContentItem, EncryptionState, ENCRYPTED_MARKER};
pub use engine::{CryptoEngine, CryptoError, CryptoMode, CryptoRequest, TaskHandle};
pub use notify::{ChangeNotifier, ContentObserver};
