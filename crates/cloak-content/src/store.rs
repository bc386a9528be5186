use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use cloak_core::{
    content::{base_name, is_staging_name},
    ChangeNotifier, ContentItem, ContentObserver,
};
use tracing::{debug, info, instrument, warn};

use crate::{error::ContentError, transfer};

/// Owns the flat managed directory and every file inside it.
///
/// The directory is re-scanned on every listing; nothing is cached. No locking is
/// performed, so callers serialise mutating calls.
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    notifier: ChangeNotifier,
}

impl ContentStore {
    /// Open (and create if needed) managed storage rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ContentError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ContentError::io(&root, e))?;
        debug!(root = %root.display(), "opened content store");
        Ok(Self {
            root,
            notifier: ChangeNotifier::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn register_observer(&self, observer: Arc<dyn ContentObserver>) {
        self.notifier.register(observer);
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn ContentObserver>) -> bool {
        self.notifier.unregister(observer)
    }

    /// Current contents of managed storage, sorted by name.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn list_content(&self) -> Result<Vec<ContentItem>, ContentError> {
        let entries = fs::read_dir(&self.root).map_err(|e| ContentError::io(&self.root, e))?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ContentError::io(&self.root, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| ContentError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            match ContentItem::from_path(entry.path()) {
                Some(item) if is_staging_name(&item.display_name) => {}
                Some(item) => items.push(item),
                None => debug!(path = %entry.path().display(), "skipping non UTF-8 file name"),
            }
        }

        items.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(items)
    }

    /// Copy `external` into managed storage under its own base name and notify observers.
    /// On failure nothing is left behind and no notification fires.
    #[instrument(skip_all, fields(external = %external.display()))]
    pub fn add_item(&self, external: &Path) -> Result<ContentItem, ContentError> {
        let name = base_name(external)
            .filter(|name| !is_staging_name(name))
            .ok_or_else(|| ContentError::InvalidName {
                name: external.display().to_string(),
            })?;
        let destination = self.path_for(name);
        if destination.exists() {
            return Err(ContentError::DestinationExists {
                name: name.to_string(),
            });
        }

        if let Err(err) = transfer::copy_file(external, &destination) {
            warn!("failed to add item: {err}");
            self.discard(&destination);
            return Err(err.into());
        }

        let item = ContentItem::from_path(destination).ok_or_else(|| ContentError::InvalidName {
            name: name.to_string(),
        })?;
        info!(name = %item.display_name, "added item");
        self.notifier.notify_all();
        Ok(item)
    }

    /// Delete one item's backing file. Observers are notified only on success.
    #[instrument(skip(self, item), fields(name = %item.display_name))]
    pub fn remove_item(&self, item: &ContentItem) -> Result<(), ContentError> {
        self.delete_backing_file(item)?;
        self.notifier.notify_all();
        Ok(())
    }

    /// Delete every item independently. True only when the batch is non-empty and every
    /// deletion succeeded; observers are notified once if anything was deleted.
    #[instrument(skip_all, fields(count = batch.len()))]
    pub fn remove_items(&self, batch: &[ContentItem]) -> bool {
        if batch.is_empty() {
            warn!("refusing batch removal: {}", ContentError::EmptyBatch);
            return false;
        }

        let mut all_removed = true;
        let mut any_removed = false;
        for item in batch {
            match self.delete_backing_file(item) {
                Ok(()) => any_removed = true,
                Err(err) => {
                    warn!(name = %item.display_name, "failed to remove item: {err}");
                    all_removed = false;
                }
            }
        }

        if any_removed {
            self.notifier.notify_all();
        }
        all_removed
    }

    /// Best-effort wipe of managed storage. Does not notify observers.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn remove_all_content(&self) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("cannot scan managed storage: {err}");
                return;
            }
        };

        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
                continue;
            }
            let path = entry.path();
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), "failed to remove file: {err}");
            }
        }
    }

    pub(crate) fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Delete an item's backing file without notifying.
    pub(crate) fn delete_backing_file(&self, item: &ContentItem) -> Result<(), ContentError> {
        if !self.owns(&item.location) {
            return Err(ContentError::NotManaged {
                path: item.location.clone(),
            });
        }
        fs::remove_file(&item.location).map_err(|e| ContentError::io(&item.location, e))?;
        debug!(name = %item.display_name, "deleted backing file");
        Ok(())
    }

    pub(crate) fn owns(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path())
    }

    fn discard(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed partial file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), "failed to remove partial file: {err}"),
        }
    }
}
