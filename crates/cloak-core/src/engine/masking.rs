use tracing::{debug, Instrument};

use super::{
    publish_staged, read_source, run_blocking, CommitGate, CryptoEngine, CryptoError, CryptoMode,
    CryptoRequest, TaskHandle,
};

const MASK_BYTE: u8 = 0xA5;
const MAGIC: &[u8; 4] = b"MASK";

/// Engine that XOR-masks file contents on the Tokio blocking pool.
/// This is not cryptographically secure; it exists for tests and smoke runs.
/// Production code uses the AES-GCM engine with a keychain-held key.
#[derive(Debug, Default, Clone)]
pub struct MaskingEngine;

impl MaskingEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoEngine for MaskingEngine {
    fn name(&self) -> &'static str {
        "masking"
    }

    fn submit(&self, request: CryptoRequest) -> TaskHandle {
        let (handle, completer) = TaskHandle::channel(&request);
        let span = tracing::debug_span!("mask_task", task = %completer.id(), name = %request.name);
        tokio::spawn(
            async move {
                let gate = completer.gate().clone();
                let outcome = run_blocking(move || transform(&request, &gate)).await;
                debug!(ok = outcome.is_ok(), "masking task finished");
                completer.complete(outcome);
            }
            .instrument(span),
        );
        handle
    }
}

fn transform(request: &CryptoRequest, gate: &CommitGate) -> Result<(), CryptoError> {
    let input = read_source(&request.source)?;
    let output = match request.mode {
        CryptoMode::Encrypt => {
            let mut out = MAGIC.to_vec();
            out.extend(mask(&input));
            out
        }
        CryptoMode::Decrypt => {
            let body = input
                .strip_prefix(MAGIC.as_slice())
                .ok_or_else(|| CryptoError::Malformed {
                    reason: format!("'{}' has no mask header", request.source.display()),
                })?;
            unmask(body)
        }
    };
    publish_staged(&request.destination, &output, gate)
}

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}

fn unmask(input: &[u8]) -> Vec<u8> {
    mask(input) // XOR twice restores original.
}
