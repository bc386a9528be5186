mod masking;

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tempfile::Builder;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

pub use masking::MaskingEngine;

use crate::content::STAGING_PREFIX;

/// Direction of a crypto task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CryptoMode {
    Encrypt,
    Decrypt,
}

impl CryptoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoMode::Encrypt => "encrypt",
            CryptoMode::Decrypt => "decrypt",
        }
    }
}

/// One (source, destination) transformation submitted to an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Base name of the destination file.
    pub name: String,
    pub mode: CryptoMode,
}

/// Failures surfaced by a crypto task.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("i/o failure at '{}': {reason}", path.display())]
    Io { path: PathBuf, reason: String },
    #[error("task interrupted before completion")]
    Interrupted,
    #[error("task execution failed: {reason}")]
    Execution { reason: String },
    #[error("task did not complete within {0:?}")]
    Timeout(Duration),
    /// Ciphertext could not be authenticated.
    #[error("integrity check failed for '{name}'")]
    Integrity { name: String },
    /// Source does not parse as engine output at all.
    #[error("malformed ciphertext container: {reason}")]
    Malformed { reason: String },
    #[error("task was cancelled")]
    Cancelled,
}

impl CryptoError {
    pub fn io(path: &Path, err: impl ToString) -> Self {
        CryptoError::Io {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, CryptoError::Integrity { .. })
    }
}

/// Asynchronous encrypt/decrypt executor.
///
/// `submit` must not block; the returned handle resolves once the destination has been
/// published (or the task failed). Output goes through the handle's [`CommitGate`], so a
/// task whose caller timed out never writes its destination. Implementations that spawn
/// onto Tokio must be called from within a runtime.
pub trait CryptoEngine: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    fn submit(&self, request: CryptoRequest) -> TaskHandle;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum GateState {
    #[default]
    Open,
    Committed,
    Cancelled,
}

/// Serialises "publish output" against "cancel" for a single task.
#[derive(Debug, Clone, Default)]
pub struct CommitGate {
    state: Arc<Mutex<GateState>>,
}

impl CommitGate {
    /// Run `publish` unless the task has been cancelled. Cancellation cannot take effect
    /// while `publish` runs.
    pub fn commit<T>(
        &self,
        publish: impl FnOnce() -> Result<T, CryptoError>,
    ) -> Result<T, CryptoError> {
        let mut state = self
            .state
            .lock()
            .map_err(|err| CryptoError::Execution {
                reason: format!("lock poisoned: {err}"),
            })?;
        if *state == GateState::Cancelled {
            return Err(CryptoError::Cancelled);
        }
        let value = publish()?;
        *state = GateState::Committed;
        Ok(value)
    }

    /// Returns `true` if the task is now guaranteed never to publish, `false` if it
    /// already did.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            GateState::Committed => false,
            GateState::Open | GateState::Cancelled => {
                *state = GateState::Cancelled;
                true
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) == GateState::Cancelled
    }
}

type Outcome = Result<(), CryptoError>;

/// Caller side of a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    id: Uuid,
    name: String,
    outcome: oneshot::Receiver<Outcome>,
    gate: CommitGate,
}

/// Worker side of a submitted task.
#[derive(Debug)]
pub struct TaskCompleter {
    id: Uuid,
    sender: oneshot::Sender<Outcome>,
    gate: CommitGate,
}

impl TaskHandle {
    /// Create a connected handle/completer pair for `request`.
    pub fn channel(request: &CryptoRequest) -> (TaskHandle, TaskCompleter) {
        let id = Uuid::new_v4();
        let gate = CommitGate::default();
        let (sender, outcome) = oneshot::channel();
        (
            TaskHandle {
                id,
                name: request.name.clone(),
                outcome,
                gate: gate.clone(),
            },
            TaskCompleter { id, sender, gate },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait at most `timeout` for the task. On timeout the task is cancelled; if it had
    /// already published its output, its own result is reported instead.
    pub async fn await_completion(self, timeout: Duration) -> Result<(), CryptoError> {
        let TaskHandle {
            id,
            name,
            mut outcome,
            gate,
        } = self;

        match tokio::time::timeout(timeout, &mut outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CryptoError::Interrupted),
            Err(_) => {
                if gate.cancel() {
                    warn!(task = %id, %name, ?timeout, "crypto task timed out; cancelled");
                    return Err(CryptoError::Timeout(timeout));
                }
                debug!(task = %id, %name, "task published output at the deadline");
                match outcome.await {
                    Ok(result) => result,
                    Err(_) => Err(CryptoError::Interrupted),
                }
            }
        }
    }
}

impl TaskCompleter {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn gate(&self) -> &CommitGate {
        &self.gate
    }

    /// Report the task's outcome. A caller that already gave up is ignored.
    pub fn complete(self, outcome: Result<(), CryptoError>) {
        if self.sender.send(outcome).is_err() {
            debug!(task = %self.id, "task finished after its handle was dropped");
        }
    }
}

/// Write `bytes` to a staging file next to `destination` and atomically move it into
/// place through `gate`. The staging file is removed if the gate refuses.
pub fn publish_staged(
    destination: &Path,
    bytes: &[u8],
    gate: &CommitGate,
) -> Result<(), CryptoError> {
    let parent = destination
        .parent()
        .ok_or_else(|| CryptoError::io(destination, "destination has no parent directory"))?;
    fs::create_dir_all(parent).map_err(|e| CryptoError::io(parent, e))?;

    let mut tmp = Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| CryptoError::io(parent, e))?;
    tmp.write_all(bytes)
        .map_err(|e| CryptoError::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| CryptoError::io(tmp.path(), e))?;

    gate.commit(|| {
        tmp.persist(destination)
            .map(|_| ())
            .map_err(|e| CryptoError::io(destination, e.error))
    })
}

/// Read a whole source file, mapping failures onto the task taxonomy.
pub fn read_source(source: &Path) -> Result<Vec<u8>, CryptoError> {
    fs::read(source).map_err(|e| CryptoError::io(source, e))
}

/// Run `work` on the Tokio blocking pool. A worker that panics or is aborted comes back
/// as [`CryptoError::Execution`].
pub async fn run_blocking<F>(work: F) -> Result<(), CryptoError>
where
    F: FnOnce() -> Result<(), CryptoError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .unwrap_or_else(|err| {
            Err(CryptoError::Execution {
                reason: err.to_string(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicking_worker_becomes_execution_error() {
        let err = run_blocking(|| -> Result<(), CryptoError> { panic!("worker exploded") })
            .await
            .expect_err("panic");
        assert!(matches!(err, CryptoError::Execution { .. }));
    }

    fn request(name: &str) -> CryptoRequest {
        CryptoRequest {
            source: PathBuf::from("/src"),
            destination: PathBuf::from("/dst").join(name),
            name: name.to_string(),
            mode: CryptoMode::Encrypt,
        }
    }

    #[tokio::test]
    async fn completed_task_reports_outcome() {
        let (handle, completer) = TaskHandle::channel(&request("a.CRYPT"));
        completer.complete(Ok(()));
        handle
            .await_completion(Duration::from_secs(1))
            .await
            .expect("completed task");
    }

    #[tokio::test]
    async fn dropped_completer_is_an_interruption() {
        let (handle, completer) = TaskHandle::channel(&request("a.CRYPT"));
        drop(completer);
        let err = handle
            .await_completion(Duration::from_secs(1))
            .await
            .expect_err("dropped worker");
        assert_eq!(err, CryptoError::Interrupted);
    }

    #[tokio::test]
    async fn timeout_cancels_the_gate() {
        let (handle, completer) = TaskHandle::channel(&request("slow.CRYPT"));
        let err = handle
            .await_completion(Duration::from_millis(20))
            .await
            .expect_err("should time out");
        assert!(matches!(err, CryptoError::Timeout(_)));
        assert!(completer.gate().is_cancelled());

        let refused = completer.gate().commit(|| Ok(()));
        assert_eq!(refused, Err(CryptoError::Cancelled));
    }

    #[tokio::test]
    async fn timeout_after_publish_waits_for_result() {
        let (handle, completer) = TaskHandle::channel(&request("late.CRYPT"));
        completer.gate().commit(|| Ok(())).expect("commit");
        let worker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            completer.complete(Ok(()));
        });

        handle
            .await_completion(Duration::from_millis(10))
            .await
            .expect("published output wins over the deadline");
        worker.await.expect("worker");
    }

    #[test]
    fn publish_staged_respects_cancellation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let destination = dir.path().join("out.CRYPT");
        let gate = CommitGate::default();
        assert!(gate.cancel());

        let err = publish_staged(&destination, b"bytes", &gate).expect_err("cancelled");
        assert_eq!(err, CryptoError::Cancelled);
        assert!(!destination.exists());
        let leftovers = fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(leftovers, 0, "staging file must be cleaned up");
    }

    #[test]
    fn publish_staged_writes_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        let destination = dir.path().join("out");
        let gate = CommitGate::default();
        publish_staged(&destination, b"payload", &gate).expect("publish");
        assert_eq!(fs::read(&destination).expect("read"), b"payload");
        assert!(!gate.cancel(), "published tasks cannot be cancelled");
    }
}
