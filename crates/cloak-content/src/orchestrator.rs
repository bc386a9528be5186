use std::{
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use cloak_core::{ContentItem, CryptoEngine, CryptoMode, CryptoRequest};
use tracing::{debug, error, info, instrument, warn};

use crate::{error::ContentError, store::ContentStore};

/// Default bounded wait per crypto task.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-item and batch encrypt/decrypt workflows over a [`ContentStore`].
///
/// Items run one after another, each bounded by `task_timeout`. On success the source
/// is replaced by the output. An integrity failure deletes the encrypted source. Any
/// other failure leaves the source alone and removes the placeholder.
pub struct EncryptionOrchestrator {
    store: Arc<ContentStore>,
    task_timeout: Duration,
}

impl EncryptionOrchestrator {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self {
            store,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Encrypt every item in order. Returns true only if all succeeded; observers are
    /// notified exactly once afterwards.
    #[instrument(skip_all, fields(engine = engine.name(), count = batch.len()))]
    pub async fn encrypt_items(&self, batch: &[ContentItem], engine: &dyn CryptoEngine) -> bool {
        self.run_batch(batch, engine, CryptoMode::Encrypt).await
    }

    /// Decrypt every item in order. Returns true only if all succeeded; observers are
    /// notified exactly once afterwards.
    #[instrument(skip_all, fields(engine = engine.name(), count = batch.len()))]
    pub async fn decrypt_items(&self, batch: &[ContentItem], engine: &dyn CryptoEngine) -> bool {
        self.run_batch(batch, engine, CryptoMode::Decrypt).await
    }

    /// Encrypt a single item, notifying observers on success.
    pub async fn encrypt_item(
        &self,
        item: &ContentItem,
        engine: &dyn CryptoEngine,
    ) -> Result<ContentItem, ContentError> {
        let result = self.seal(item, engine).await;
        report(item, CryptoMode::Encrypt, &result);
        if result.is_ok() {
            self.store.notifier().notify_all();
        }
        result
    }

    /// Decrypt a single item, notifying observers whenever the collection changed
    /// (success, or removal of a tampered source).
    pub async fn decrypt_item(
        &self,
        item: &ContentItem,
        engine: &dyn CryptoEngine,
    ) -> Result<ContentItem, ContentError> {
        let result = self.open(item, engine).await;
        report(item, CryptoMode::Decrypt, &result);
        if matches!(result, Ok(_) | Err(ContentError::Integrity { .. })) {
            self.store.notifier().notify_all();
        }
        result
    }

    async fn run_batch(
        &self,
        batch: &[ContentItem],
        engine: &dyn CryptoEngine,
        mode: CryptoMode,
    ) -> bool {
        let mut success = true;
        for item in batch {
            let outcome = match mode {
                CryptoMode::Encrypt => self.seal(item, engine).await,
                CryptoMode::Decrypt => self.open(item, engine).await,
            };
            report(item, mode, &outcome);
            success = outcome.is_ok() && success;
        }

        let names: Vec<&str> = batch.iter().map(|item| item.display_name.as_str()).collect();
        if success {
            info!(mode = mode.as_str(), items = ?names, "batch completed");
        } else {
            warn!(mode = mode.as_str(), items = ?names, "batch completed with errors");
        }

        self.store.notifier().notify_all();
        success
    }

    async fn seal(
        &self,
        item: &ContentItem,
        engine: &dyn CryptoEngine,
    ) -> Result<ContentItem, ContentError> {
        self.ensure_managed(item)?;
        let name = item.encrypted_name();
        let placeholder = Placeholder::create(self.store.path_for(&name), &name)?;
        debug!(source = %item.location.display(), %name, "encrypting item");

        let request = CryptoRequest {
            source: item.location.clone(),
            destination: placeholder.path().to_path_buf(),
            name: name.clone(),
            mode: CryptoMode::Encrypt,
        };
        if let Err(source) = engine
            .submit(request)
            .await_completion(self.task_timeout)
            .await
        {
            return Err(ContentError::Task { name, source });
        }

        self.finish(item, placeholder)
    }

    async fn open(
        &self,
        item: &ContentItem,
        engine: &dyn CryptoEngine,
    ) -> Result<ContentItem, ContentError> {
        self.ensure_managed(item)?;
        let name = match item.decrypted_name() {
            Some(name) => name,
            None if !item.is_encrypted() => {
                return Err(ContentError::NotEncrypted {
                    name: item.display_name.clone(),
                });
            }
            None => {
                return Err(ContentError::InvalidName {
                    name: item.display_name.clone(),
                })
            }
        };
        let placeholder = Placeholder::create(self.store.path_for(&name), &name)?;
        debug!(source = %item.location.display(), %name, "decrypting item");

        let request = CryptoRequest {
            source: item.location.clone(),
            destination: placeholder.path().to_path_buf(),
            name: name.clone(),
            mode: CryptoMode::Decrypt,
        };
        match engine
            .submit(request)
            .await_completion(self.task_timeout)
            .await
        {
            Ok(()) => self.finish(item, placeholder),
            Err(source) if source.is_integrity() => {
                drop(placeholder);
                if let Err(err) = self.store.delete_backing_file(item) {
                    error!(item = %item.location.display(), "failed to remove tampered file: {err}");
                }
                Err(ContentError::Integrity {
                    name: item.display_name.clone(),
                })
            }
            Err(source) => Err(ContentError::Task { name, source }),
        }
    }

    /// Retire the source, then keep the published destination. If the source cannot be
    /// removed the output goes with the placeholder and the collection is unchanged.
    fn finish(
        &self,
        source: &ContentItem,
        placeholder: Placeholder,
    ) -> Result<ContentItem, ContentError> {
        if let Err(err) = self.store.delete_backing_file(source) {
            warn!(item = %source.location.display(), "source not removed; discarding output");
            return Err(err);
        }
        let destination = placeholder.keep();
        ContentItem::from_path(&destination).ok_or_else(|| ContentError::InvalidName {
            name: destination.display().to_string(),
        })
    }

    fn ensure_managed(&self, item: &ContentItem) -> Result<(), ContentError> {
        if self.store.owns(&item.location) {
            Ok(())
        } else {
            Err(ContentError::NotManaged {
                path: item.location.clone(),
            })
        }
    }
}

fn report(item: &ContentItem, mode: CryptoMode, result: &Result<ContentItem, ContentError>) {
    match result {
        Ok(output) => debug!(
            item = %item.location.display(),
            output = %output.display_name,
            mode = mode.as_str(),
            "item transformed"
        ),
        Err(err) => error!(
            item = %item.location.display(),
            mode = mode.as_str(),
            "item failed: {err}"
        ),
    }
}

/// Exclusively created destination file, removed on drop unless kept.
struct Placeholder {
    path: PathBuf,
    armed: bool,
}

impl Placeholder {
    fn create(path: PathBuf, name: &str) -> Result<Self, ContentError> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path, armed: true }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(ContentError::DestinationExists {
                    name: name.to_string(),
                })
            }
            Err(err) => Err(ContentError::io(path, err)),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for Placeholder {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed placeholder"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), "failed to remove placeholder: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use cloak_core::{
        engine::{run_blocking, MaskingEngine, TaskCompleter},
        CryptoError, EncryptionState, TaskHandle,
    };

    use super::*;
    use crate::test_support::CountingObserver;

    #[derive(Clone, Copy)]
    enum Script {
        Hang,
        Integrity,
        Execution,
        Panic,
        /// Publishes output but leaves a directory where the source was, so the source
        /// cannot be removed afterwards.
        PinSource,
    }

    /// Delegates to the masking engine unless the source name has a script.
    #[derive(Default)]
    struct ScriptedEngine {
        scripts: HashMap<String, Script>,
        inner: MaskingEngine,
        held: Mutex<Vec<TaskCompleter>>,
        submitted: Mutex<Vec<CryptoRequest>>,
    }

    impl ScriptedEngine {
        fn with(mut self, source_name: &str, script: Script) -> Self {
            self.scripts.insert(source_name.to_string(), script);
            self
        }
    }

    impl CryptoEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn submit(&self, request: CryptoRequest) -> TaskHandle {
            self.submitted.lock().expect("lock").push(request.clone());
            let source_name = cloak_core::content::base_name(&request.source)
                .unwrap_or_default()
                .to_string();
            let Some(script) = self.scripts.get(&source_name).copied() else {
                return self.inner.submit(request);
            };

            let (handle, completer) = TaskHandle::channel(&request);
            match script {
                Script::Hang => self.held.lock().expect("lock").push(completer),
                Script::Integrity => completer.complete(Err(CryptoError::Integrity {
                    name: request.name,
                })),
                Script::Execution => completer.complete(Err(CryptoError::Execution {
                    reason: "worker crashed".into(),
                })),
                Script::Panic => {
                    tokio::spawn(async move {
                        let outcome = run_blocking(|| -> Result<(), CryptoError> {
                            panic!("cipher worker panicked")
                        })
                        .await;
                        completer.complete(outcome);
                    });
                }
                Script::PinSource => {
                    fs::remove_file(&request.source).expect("drop source");
                    fs::create_dir(&request.source).expect("pin source");
                    fs::write(&request.destination, b"output").expect("publish");
                    completer.complete(Ok(()));
                }
            }
            handle
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        orchestrator: EncryptionOrchestrator,
        counter: Arc<CountingObserver>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_timeout(DEFAULT_TASK_TIMEOUT)
        }

        fn with_timeout(timeout: Duration) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = Arc::new(ContentStore::open(dir.path().join("managed")).expect("store"));
            let counter = Arc::new(CountingObserver::default());
            store.register_observer(counter.clone());
            Self {
                _dir: dir,
                orchestrator: EncryptionOrchestrator::new(store).with_task_timeout(timeout),
                counter,
            }
        }

        fn seed(&self, name: &str, body: &[u8]) -> ContentItem {
            let path = self.orchestrator.store().root().join(name);
            fs::write(&path, body).expect("seed");
            ContentItem::from_path(path).expect("item")
        }

        fn names(&self) -> Vec<String> {
            self.orchestrator
                .store()
                .list_content()
                .expect("list")
                .into_iter()
                .map(|item| item.display_name)
                .collect()
        }
    }

    #[tokio::test]
    async fn encrypt_batch_replaces_plaintext() {
        let fx = Fixture::new();
        let item = fx.seed("a.txt", b"alpha");

        assert!(
            fx.orchestrator
                .encrypt_items(&[item], &MaskingEngine::new())
                .await
        );
        assert_eq!(fx.names(), vec!["a.txt.CRYPT".to_string()]);
        assert_eq!(fx.counter.hits(), 1);
    }

    #[tokio::test]
    async fn encrypt_request_targets_marked_name() {
        let fx = Fixture::new();
        let item = fx.seed("X", b"x");
        let engine = ScriptedEngine::default();

        let sealed = fx
            .orchestrator
            .encrypt_item(&item, &engine)
            .await
            .expect("encrypt");
        assert_eq!(sealed.display_name, "X.CRYPT");
        assert_eq!(sealed.state, EncryptionState::Encrypted);

        let submitted = engine.submitted.lock().expect("lock");
        assert_eq!(submitted[0].name, "X.CRYPT");
        assert_eq!(submitted[0].source, item.location);
        assert_eq!(submitted[0].mode, CryptoMode::Encrypt);
    }

    #[tokio::test]
    async fn round_trip_restores_name_and_bytes() {
        let fx = Fixture::new();
        let engine = MaskingEngine::new();
        let item = fx.seed("doc.txt", b"quarterly numbers");

        let sealed = fx
            .orchestrator
            .encrypt_item(&item, &engine)
            .await
            .expect("encrypt");
        let restored = fx
            .orchestrator
            .decrypt_item(&sealed, &engine)
            .await
            .expect("decrypt");

        assert_eq!(restored.display_name, "doc.txt");
        assert_eq!(
            fs::read(&restored.location).expect("read"),
            b"quarterly numbers"
        );
        assert_eq!(fx.names(), vec!["doc.txt".to_string()]);
        assert_eq!(fx.counter.hits(), 2);
    }

    #[tokio::test]
    async fn aes_round_trip_is_byte_identical() {
        use cloak_crypto::{AesGcmEngine, InMemoryKeyProvider};

        let fx = Fixture::new();
        let engine = AesGcmEngine::new(InMemoryKeyProvider::default());
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let item = fx.seed("doc.txt", &payload);

        assert!(fx.orchestrator.encrypt_items(&[item], &engine).await);
        let sealed = fx.orchestrator.store().list_content().expect("list");
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].display_name, "doc.txt.CRYPT");
        assert_ne!(fs::read(&sealed[0].location).expect("read"), payload);

        assert!(fx.orchestrator.decrypt_items(&sealed, &engine).await);
        let restored = fx.orchestrator.store().list_content().expect("list");
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].display_name, "doc.txt");
        assert_eq!(fs::read(&restored[0].location).expect("read"), payload);
        assert_eq!(fx.counter.hits(), 2);
    }

    #[tokio::test]
    async fn aes_tamper_removes_sealed_file() {
        use cloak_crypto::{AesGcmEngine, InMemoryKeyProvider};

        let fx = Fixture::new();
        let sealer = AesGcmEngine::new(InMemoryKeyProvider::with_key([3u8; 32]));
        let opener = AesGcmEngine::new(InMemoryKeyProvider::with_key([4u8; 32]));
        let item = fx.seed("secret.txt", b"classified");

        let sealed = fx
            .orchestrator
            .encrypt_item(&item, &sealer)
            .await
            .expect("encrypt");
        let err = fx
            .orchestrator
            .decrypt_item(&sealed, &opener)
            .await
            .expect_err("foreign key");
        assert!(matches!(err, ContentError::Integrity { .. }));
        assert!(fx.names().is_empty());
    }

    #[tokio::test]
    async fn timeout_leaves_source_and_cancels_task() {
        let fx = Fixture::with_timeout(Duration::from_millis(50));
        let item = fx.seed("slow.txt", b"unchanged");
        let engine = ScriptedEngine::default().with("slow.txt", Script::Hang);

        let err = fx
            .orchestrator
            .encrypt_item(&item, &engine)
            .await
            .expect_err("timeout");
        assert!(matches!(
            err,
            ContentError::Task {
                source: CryptoError::Timeout(_),
                ..
            }
        ));
        assert_eq!(fx.names(), vec!["slow.txt".to_string()]);
        assert_eq!(fs::read(&item.location).expect("read"), b"unchanged");
        assert_eq!(fx.counter.hits(), 0);

        let held = engine.held.lock().expect("lock");
        assert!(held[0].gate().is_cancelled(), "timeout is forwarded to the engine");
    }

    #[tokio::test]
    async fn integrity_failure_deletes_encrypted_source() {
        let fx = Fixture::new();
        let item = fx.seed("X.CRYPT", b"tampered");
        let engine = ScriptedEngine::default().with("X.CRYPT", Script::Integrity);

        let err = fx
            .orchestrator
            .decrypt_item(&item, &engine)
            .await
            .expect_err("integrity");
        assert!(matches!(err, ContentError::Integrity { .. }));
        assert!(fx.names().is_empty(), "neither X.CRYPT nor X may remain");
        assert_eq!(fx.counter.hits(), 1);
    }

    #[tokio::test]
    async fn other_decrypt_failures_keep_source_and_drop_placeholder() {
        let fx = Fixture::new();
        let item = fx.seed("report.pdf.CRYPT", b"sealed");
        let engine = ScriptedEngine::default().with("report.pdf.CRYPT", Script::Execution);

        let err = fx
            .orchestrator
            .decrypt_item(&item, &engine)
            .await
            .expect_err("execution failure");
        assert!(matches!(err, ContentError::Task { .. }));
        assert_eq!(fx.names(), vec!["report.pdf.CRYPT".to_string()]);
        assert_eq!(fx.counter.hits(), 0);
    }

    #[tokio::test]
    async fn mixed_decrypt_batch_processes_every_item() {
        let fx = Fixture::new();
        let masking = MaskingEngine::new();
        let good = fx.seed("good.txt", b"fine");
        let bad = fx.seed("bad.txt", b"doomed");
        assert!(
            fx.orchestrator
                .encrypt_items(&[good, bad], &masking)
                .await
        );

        let sealed = fx.orchestrator.store().list_content().expect("list");
        let engine = ScriptedEngine::default().with("bad.txt.CRYPT", Script::Integrity);
        let before = fx.counter.hits();

        assert!(!fx.orchestrator.decrypt_items(&sealed, &engine).await);
        assert_eq!(fx.names(), vec!["good.txt".to_string()]);
        assert_eq!(
            fs::read(fx.orchestrator.store().root().join("good.txt")).expect("read"),
            b"fine"
        );
        assert_eq!(fx.counter.hits(), before + 1);
    }

    #[tokio::test]
    async fn batch_notifies_once_even_when_everything_fails() {
        let fx = Fixture::new();
        let item = fx.seed("a.txt", b"a");
        let engine = ScriptedEngine::default().with("a.txt", Script::Execution);

        assert!(!fx.orchestrator.encrypt_items(&[item], &engine).await);
        assert_eq!(fx.names(), vec!["a.txt".to_string()]);
        assert_eq!(fx.counter.hits(), 1);
    }

    #[tokio::test]
    async fn existing_destination_is_not_clobbered() {
        let fx = Fixture::new();
        let item = fx.seed("a.txt", b"new");
        fx.seed("a.txt.CRYPT", b"older ciphertext");
        let engine = ScriptedEngine::default();

        let err = fx
            .orchestrator
            .encrypt_item(&item, &engine)
            .await
            .expect_err("collision");
        assert!(matches!(err, ContentError::DestinationExists { .. }));
        assert!(engine.submitted.lock().expect("lock").is_empty());
        assert_eq!(
            fs::read(fx.orchestrator.store().root().join("a.txt.CRYPT")).expect("read"),
            b"older ciphertext"
        );
    }

    #[tokio::test]
    async fn decrypting_plaintext_is_rejected() {
        let fx = Fixture::new();
        let item = fx.seed("notes.md", b"plain");

        let err = fx
            .orchestrator
            .decrypt_item(&item, &MaskingEngine::new())
            .await
            .expect_err("plaintext");
        assert!(matches!(err, ContentError::NotEncrypted { .. }));
        assert_eq!(fx.names(), vec!["notes.md".to_string()]);
    }

    #[tokio::test]
    async fn bare_marker_name_is_invalid() {
        let fx = Fixture::new();
        let item = fx.seed(".CRYPT", b"?");

        let err = fx
            .orchestrator
            .decrypt_item(&item, &MaskingEngine::new())
            .await
            .expect_err("empty stem");
        assert!(matches!(err, ContentError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn foreign_crypt_file_is_malformed_and_kept() {
        let fx = Fixture::new();
        let item = fx.seed("external.CRYPT", b"not produced by any engine");

        let err = fx
            .orchestrator
            .decrypt_item(&item, &MaskingEngine::new())
            .await
            .expect_err("foreign file");
        assert!(matches!(
            err,
            ContentError::Task {
                source: CryptoError::Malformed { .. },
                ..
            }
        ));
        assert_eq!(fx.names(), vec!["external.CRYPT".to_string()]);
        assert_eq!(
            fs::read(&item.location).expect("read"),
            b"not produced by any engine"
        );
        assert_eq!(fx.counter.hits(), 0);
    }

    #[tokio::test]
    async fn panicking_worker_fails_item_and_batch_continues() {
        let fx = Fixture::new();
        let doomed = fx.seed("doomed.txt", b"boom");
        let fine = fx.seed("fine.txt", b"ok");
        let engine = ScriptedEngine::default().with("doomed.txt", Script::Panic);

        let err = fx
            .orchestrator
            .encrypt_item(&doomed, &engine)
            .await
            .expect_err("panic");
        assert!(matches!(
            err,
            ContentError::Task {
                source: CryptoError::Execution { .. },
                ..
            }
        ));
        assert_eq!(fx.counter.hits(), 0);

        assert!(!fx.orchestrator.encrypt_items(&[doomed, fine], &engine).await);
        assert_eq!(
            fx.names(),
            vec!["doomed.txt".to_string(), "fine.txt.CRYPT".to_string()]
        );
        assert_eq!(fx.counter.hits(), 1);
    }

    #[tokio::test]
    async fn output_is_discarded_when_source_cannot_be_removed() {
        let fx = Fixture::new();
        let item = fx.seed("stuck.txt", b"stuck");
        let engine = ScriptedEngine::default().with("stuck.txt", Script::PinSource);

        let err = fx
            .orchestrator
            .encrypt_item(&item, &engine)
            .await
            .expect_err("source pinned");
        assert!(matches!(err, ContentError::Io { .. }));
        assert!(!fx.orchestrator.store().root().join("stuck.txt.CRYPT").exists());
        assert!(fx.names().is_empty());
        assert_eq!(fx.counter.hits(), 0);
    }
}
