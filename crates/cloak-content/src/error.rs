use std::path::PathBuf;

use cloak_core::CryptoError;
use thiserror::Error;

use crate::transfer::TransferError;

/// Failures of store and orchestration operations. Batch operations log these and fold
/// them into a single boolean; single-item operations return them.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("copy into managed storage failed: {0}")]
    Copy(#[from] TransferError),
    #[error("i/o failure at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{name}' already exists in managed storage")]
    DestinationExists { name: String },
    #[error("'{}' is not a file in managed storage", path.display())]
    NotManaged { path: PathBuf },
    #[error("'{name}' is not an encrypted item")]
    NotEncrypted { name: String },
    #[error("'{name}' does not yield a usable file name")]
    InvalidName { name: String },
    #[error("crypto task for '{name}' failed: {source}")]
    Task {
        name: String,
        #[source]
        source: CryptoError,
    },
    /// Decryption could not authenticate the ciphertext; the encrypted source was removed.
    #[error("integrity check failed for '{name}'; encrypted source removed")]
    Integrity { name: String },
    #[error("batch is empty")]
    EmptyBatch,
}

impl ContentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ContentError::Io {
            path: path.into(),
            source,
        }
    }
}
