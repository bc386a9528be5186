use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Reserved suffix marking an encrypted file on disk.
pub const ENCRYPTED_MARKER: &str = ".CRYPT";

/// Prefix for engine staging files inside managed storage; never listed as content.
pub const STAGING_PREFIX: &str = ".cloak-staging-";

/// Whether a managed item currently holds plaintext or ciphertext.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionState {
    Plaintext,
    Encrypted,
}

impl EncryptionState {
    /// Derive the state from an on-disk file name.
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(ENCRYPTED_MARKER) {
            EncryptionState::Encrypted
        } else {
            EncryptionState::Plaintext
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EncryptionState::Plaintext => "plain",
            EncryptionState::Encrypted => "crypt",
        }
    }
}

/// One file in managed storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentItem {
    /// Backing file inside the managed directory.
    pub location: PathBuf,
    /// Base name shown to the user (includes the marker when encrypted).
    pub display_name: String,
    pub state: EncryptionState,
}

impl ContentItem {
    /// Build an item for a backing file; `None` when the path has no usable base name.
    pub fn from_path(location: impl Into<PathBuf>) -> Option<Self> {
        let location = location.into();
        let display_name = location.file_name()?.to_str()?.to_string();
        let state = EncryptionState::from_name(&display_name);
        Some(Self {
            location,
            display_name,
            state,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.state == EncryptionState::Encrypted
    }

    /// Name the item will carry once encrypted.
    pub fn encrypted_name(&self) -> String {
        encrypted_name(&self.display_name)
    }

    /// Name the item will carry once decrypted, if it is encrypted and the result is non-empty.
    pub fn decrypted_name(&self) -> Option<String> {
        if !self.is_encrypted() {
            return None;
        }
        decrypted_name(&self.display_name)
    }
}

/// `X` -> `X.CRYPT`.
pub fn encrypted_name(name: &str) -> String {
    format!("{name}{ENCRYPTED_MARKER}")
}

/// `X.CRYPT` -> `X`. Returns `None` when the marker is absent or nothing precedes it.
pub fn decrypted_name(name: &str) -> Option<String> {
    name.strip_suffix(ENCRYPTED_MARKER)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// True for engine staging files that must not surface as content.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Base name of a path as UTF-8, if it has one.
pub fn base_name(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()
}
