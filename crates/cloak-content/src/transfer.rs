use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("cannot open source '{}': {source}", path.display())]
    OpenSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open destination '{}': {source}", path.display())]
    OpenDestination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("copy '{}' -> '{}' failed: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("short copy to '{}': expected {expected} bytes, wrote {written}", path.display())]
    ShortCopy {
        path: PathBuf,
        expected: u64,
        written: u64,
    },
}

/// Copy every byte of `source` into `destination`, creating or truncating it.
/// Both files are closed on every path; `source` is never modified. Returns the byte count.
pub fn copy_file(source: &Path, destination: &Path) -> Result<u64, TransferError> {
    let reader = File::open(source).map_err(|source_err| TransferError::OpenSource {
        path: source.to_path_buf(),
        source: source_err,
    })?;
    let expected = reader
        .metadata()
        .map_err(|err| TransferError::OpenSource {
            path: source.to_path_buf(),
            source: err,
        })?
        .len();

    let writer = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(destination)
        .map_err(|err| TransferError::OpenDestination {
            path: destination.to_path_buf(),
            source: err,
        })?;

    let copy_err = |err: io::Error| TransferError::Copy {
        from: source.to_path_buf(),
        to: destination.to_path_buf(),
        source: err,
    };

    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);
    let written = io::copy(&mut reader, &mut writer).map_err(copy_err)?;
    writer.flush().map_err(copy_err)?;
    writer.get_ref().sync_all().map_err(copy_err)?;

    if written != expected {
        return Err(TransferError::ShortCopy {
            path: destination.to_path_buf(),
            expected,
            written,
        });
    }

    debug!(from = %source.display(), to = %destination.display(), bytes = written, "copied file");
    Ok(written)
}
