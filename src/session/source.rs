//! Session-private read handles for replayed logs.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::stream::StreamState;
use crate::{ReplayError, Result};

/// Random-access frame reader over one log.
#[derive(Debug)]
pub(crate) struct FrameSource {
    file: File,
    frame: Vec<u8>,
}

impl FrameSource {
    pub(crate) fn open(path: &Path, message_size: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| ReplayError::file_error(path, e))?;
        Ok(Self { file, frame: vec![0u8; message_size] })
    }

    /// Read the `message_size` bytes starting at `offset`.
    pub(crate) fn read_frame(&mut self, offset: u64) -> std::io::Result<&[u8]> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut self.frame)?;
        Ok(&self.frame)
    }
}

/// Handles for every replayed stream, plus the directory holding private
/// copies when those are enabled.
///
/// Field order matters: handles are closed before the directory is removed.
#[derive(Debug)]
pub(crate) struct SourceSet {
    pub(crate) sources: Vec<FrameSource>,
    workdir: Option<TempDir>,
}

impl SourceSet {
    /// Open one handle per stream, in stream order.
    ///
    /// With `private_copies`, each log is first copied into a fresh temporary
    /// directory and the copy is opened, leaving the original free to be
    /// moved or deleted while the replay runs.
    pub(crate) fn open(streams: &[StreamState], private_copies: bool) -> Result<Self> {
        let workdir = if private_copies {
            Some(TempDir::new().map_err(|e| ReplayError::file_error(std::env::temp_dir(), e))?)
        } else {
            None
        };

        let mut sources = Vec::with_capacity(streams.len());
        for stream in streams {
            let (Some(path), Some(format)) = (stream.path(), stream.format()) else {
                return Err(ReplayError::Task { reason: format!("stream {} is not matched", stream.id()) });
            };

            let path = match &workdir {
                Some(dir) => private_copy(dir.path(), stream, path)?,
                None => path.to_path_buf(),
            };
            sources.push(FrameSource::open(&path, format.message_size())?);
        }

        Ok(Self { sources, workdir })
    }

    pub(crate) fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(|dir| dir.path())
    }
}

fn private_copy(dir: &Path, stream: &StreamState, original: &Path) -> Result<PathBuf> {
    let name = original.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let copy = dir.join(format!("{}-{}", stream.id().0, name));
    std::fs::copy(original, &copy).map_err(|e| ReplayError::file_error(original, e))?;
    debug!("Stream {} replays from private copy {}", stream.id(), copy.display());
    Ok(copy)
}
