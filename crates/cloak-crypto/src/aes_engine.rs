use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cloak_core::{
    content::ENCRYPTED_MARKER,
    engine::{publish_staged, read_source, run_blocking, CommitGate},
    CryptoEngine, CryptoError, CryptoMode, CryptoRequest, TaskHandle,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Instrument};

use crate::key_provider::{KeyMaterial, KeyProvider};

const CONTAINER_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// AES-256-GCM engine. Each request runs as its own Tokio task; the cipher work itself
/// runs on the blocking pool. The plaintext base name is bound as associated data, so a
/// sealed file only opens under the name it was sealed for.
pub struct AesGcmEngine<P: KeyProvider> {
    key_provider: Arc<P>,
}

impl<P: KeyProvider> AesGcmEngine<P> {
    pub fn new(key_provider: P) -> Self {
        Self {
            key_provider: Arc::new(key_provider),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedBlob {
    version: u8,
    nonce: String,
    ciphertext: String,
}

impl<P: KeyProvider + 'static> CryptoEngine for AesGcmEngine<P> {
    fn name(&self) -> &'static str {
        "aes-gcm"
    }

    fn submit(&self, request: CryptoRequest) -> TaskHandle {
        let (handle, completer) = TaskHandle::channel(&request);
        let provider = Arc::clone(&self.key_provider);
        let span = tracing::debug_span!(
            "crypto_task",
            task = %completer.id(),
            mode = request.mode.as_str(),
            name = %request.name,
        );

        tokio::spawn(
            async move {
                let gate = completer.gate().clone();
                let outcome = run_task(provider.as_ref(), request, gate).await;
                if let Err(err) = &outcome {
                    debug!("crypto task failed: {err}");
                }
                completer.complete(outcome);
            }
            .instrument(span),
        );
        handle
    }
}

async fn run_task<P: KeyProvider>(
    provider: &P,
    request: CryptoRequest,
    gate: CommitGate,
) -> Result<(), CryptoError> {
    let key = provider
        .get_or_create()
        .await
        .map_err(|e| CryptoError::Execution {
            reason: format!("key provider: {e}"),
        })?;

    run_blocking(move || transform(&key, &request, &gate)).await
}

fn transform(
    key: &KeyMaterial,
    request: &CryptoRequest,
    gate: &CommitGate,
) -> Result<(), CryptoError> {
    let input = read_source(&request.source)?;
    if gate.is_cancelled() {
        return Err(CryptoError::Cancelled);
    }

    let cipher = build_cipher(key)?;
    let entity = entity_name(request);
    let output = match request.mode {
        CryptoMode::Encrypt => seal(&cipher, &input, entity)?,
        CryptoMode::Decrypt => open(&cipher, &input, entity)?,
    };
    publish_staged(&request.destination, &output, gate)
}

/// Plaintext base name bound into the ciphertext.
fn entity_name(request: &CryptoRequest) -> &str {
    match request.mode {
        CryptoMode::Encrypt => request
            .name
            .strip_suffix(ENCRYPTED_MARKER)
            .unwrap_or(&request.name),
        CryptoMode::Decrypt => &request.name,
    }
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8], entity: &str) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: entity.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::Execution {
            reason: format!("encrypt failed: {e}"),
        })?;

    let blob = SealedBlob {
        version: CONTAINER_VERSION,
        nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
    };
    serde_json::to_vec(&blob).map_err(|e| CryptoError::Execution {
        reason: format!("serialize failed: {e}"),
    })
}

fn open(cipher: &Aes256Gcm, sealed: &[u8], entity: &str) -> Result<Vec<u8>, CryptoError> {
    let blob: SealedBlob = serde_json::from_slice(sealed).map_err(malformed)?;
    if blob.version != CONTAINER_VERSION {
        return Err(CryptoError::Malformed {
            reason: format!("unsupported container version {}", blob.version),
        });
    }

    let nonce_bytes = URL_SAFE_NO_PAD.decode(blob.nonce).map_err(malformed)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::Malformed {
            reason: format!("nonce must be {NONCE_LEN} bytes, got {}", nonce_bytes.len()),
        });
    }
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = URL_SAFE_NO_PAD.decode(blob.ciphertext).map_err(malformed)?;

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: entity.as_bytes(),
            },
        )
        .map_err(|_| {
            warn!(%entity, "ciphertext failed authentication");
            CryptoError::Integrity {
                name: entity.to_string(),
            }
        })
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(&material.bytes).map_err(|e| CryptoError::Execution {
        reason: format!("cipher init failed: {e}"),
    })
}

fn malformed<E: ToString>(err: E) -> CryptoError {
    CryptoError::Malformed {
        reason: err.to_string(),
    }
}
