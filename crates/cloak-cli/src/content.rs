use std::{fs, path::PathBuf};

use cloak_content::{ContentStore, EncryptionOrchestrator};
use cloak_core::{ContentItem, CryptoEngine, CryptoMode, EncryptionState};
use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::cli::Selection;

pub fn list(store: &ContentStore, json: bool) -> Result<()> {
    let items = store.list_content()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No content yet. Add files with `cloak add <path>`.");
        return Ok(());
    }
    for item in items {
        println!("[{}] {}", item.state.label(), item.display_name);
    }
    Ok(())
}

/// Add each path independently; fails if any could not be added.
pub fn add(store: &ContentStore, paths: &[PathBuf]) -> Result<()> {
    let mut failed = 0;
    for path in paths {
        match store.add_item(path) {
            Ok(item) => println!("Added {}", item.display_name),
            Err(err) => {
                eprintln!("Could not add {}: {err}", path.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(eyre!("{failed} of {} file(s) could not be added", paths.len()));
    }
    Ok(())
}

pub fn remove(store: &ContentStore, names: &[String]) -> Result<()> {
    let batch = resolve_names(store, names)?;
    if !store.remove_items(&batch) {
        return Err(eyre!("one or more items could not be removed"));
    }
    println!("Removed {} item(s).", batch.len());
    Ok(())
}

/// Encrypt or decrypt the selected items as one batch.
pub async fn transform(
    orchestrator: &EncryptionOrchestrator,
    engine: &dyn CryptoEngine,
    selection: &Selection,
    mode: CryptoMode,
) -> Result<()> {
    let batch = select(orchestrator.store(), selection, mode)?;
    if batch.is_empty() {
        println!("Nothing to {}.", mode.as_str());
        return Ok(());
    }

    info!(count = batch.len(), mode = mode.as_str(), "starting batch");
    let ok = match mode {
        CryptoMode::Encrypt => orchestrator.encrypt_items(&batch, engine).await,
        CryptoMode::Decrypt => orchestrator.decrypt_items(&batch, engine).await,
    };
    if !ok {
        return Err(eyre!(
            "{} finished with errors; run `cloak list` to see what changed",
            mode.as_str()
        ));
    }
    println!("{} {} item(s).", past_tense(mode), batch.len());
    Ok(())
}

pub fn wipe(store: &ContentStore, confirmed: bool) -> Result<()> {
    if !confirmed {
        return Err(eyre!("refusing to wipe without --yes"));
    }
    store.remove_all_content();
    println!("Managed storage wiped.");
    Ok(())
}

/// Add, encrypt and decrypt a sample file in a throwaway store using `engine`.
pub async fn run_engine_health(
    engine: &dyn CryptoEngine,
    config: &crate::config::Config,
) -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let sample = scratch.path().join("sample.txt");
    let payload = b"cloak health check";
    fs::write(&sample, payload)?;

    let store = std::sync::Arc::new(ContentStore::open(scratch.path().join("managed"))?);
    let orchestrator = crate::storage::orchestrator(config, store);
    let item = orchestrator.store().add_item(&sample)?;
    let sealed = orchestrator.encrypt_item(&item, engine).await?;
    let restored = orchestrator.decrypt_item(&sealed, engine).await?;

    if fs::read(&restored.location)? != payload {
        color_eyre::eyre::bail!("engine round-trip returned different bytes");
    }
    Ok(())
}

fn select(
    store: &ContentStore,
    selection: &Selection,
    mode: CryptoMode,
) -> Result<Vec<ContentItem>> {
    if !selection.all {
        return resolve_names(store, &selection.names);
    }
    let wanted = match mode {
        CryptoMode::Encrypt => EncryptionState::Plaintext,
        CryptoMode::Decrypt => EncryptionState::Encrypted,
    };
    Ok(store
        .list_content()?
        .into_iter()
        .filter(|item| item.state == wanted)
        .collect())
}

fn resolve_names(store: &ContentStore, names: &[String]) -> Result<Vec<ContentItem>> {
    let items = store.list_content()?;
    let mut batch = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match items.iter().find(|item| &item.display_name == name) {
            Some(item) => batch.push(item.clone()),
            None => missing.push(name.as_str()),
        }
    }
    if !missing.is_empty() {
        return Err(eyre!("no such item(s): {}", missing.join(", ")));
    }
    Ok(batch)
}

fn past_tense(mode: CryptoMode) -> &'static str {
    match mode {
        CryptoMode::Encrypt => "Encrypted",
        CryptoMode::Decrypt => "Decrypted",
    }
}
