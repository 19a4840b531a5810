//! Sliding-window frame scanner.
//!
//! The scanner reads its source in chunks into a working buffer and slides a
//! `message_size` window over it one byte at a time. When the window matches
//! the format's sync/end signature the frame is recorded and the window jumps
//! past the whole frame; frames are never searched for inside another frame.
//!
//! Bytes that could still be the start of a frame are carried over to the
//! next refill, so frames that straddle chunk boundaries are found.
//!
//! ## Parse limit
//!
//! Until the first frame is found, reads are capped at the
//! [`ParseLimit`] byte budget. Once that many bytes have been scanned without
//! a match the format is abandoned with [`ReplayError::NoFrameFound`]. Large
//! logs therefore cost at most one budget per non-matching format.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use tracing::{debug, warn};

use super::ParseLimit;
use crate::format::MessageFormat;
use crate::index::FrameIndex;
use crate::{ReplayError, Result};

/// Default refill size for the working buffer.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Builds frame indexes for a single format.
#[derive(Debug, Clone, Copy)]
pub struct FrameScanner {
    limit: ParseLimit,
    chunk_size: usize,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new(ParseLimit::default())
    }
}

impl FrameScanner {
    pub fn new(limit: ParseLimit) -> Self {
        Self { limit, chunk_size: DEFAULT_CHUNK_SIZE }
    }

    /// Override the refill size. The buffer always holds at least one frame.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn limit(&self) -> ParseLimit {
        self.limit
    }

    /// Index a log file.
    pub fn scan_file(&self, path: &Path, format: &MessageFormat) -> Result<FrameIndex> {
        let file = File::open(path).map_err(|e| ReplayError::file_error(path, e))?;
        let len = file.metadata().map_err(|e| ReplayError::file_error(path, e))?.len();
        self.scan_source(file, Some(len), format, path)
    }

    /// Index an arbitrary byte source.
    ///
    /// `len` is the total source length if known; it is only needed for
    /// percentage parse limits (an unknown length makes them unlimited).
    ///
    /// # Errors
    ///
    /// - [`ReplayError::NoFrameFound`] if the budget ran out before a frame
    /// - [`ReplayError::InsufficientFrames`] if fewer than two frames exist
    /// - [`ReplayError::File`] if the source fails to read
    pub fn scan<R: Read>(&self, reader: R, len: Option<u64>, format: &MessageFormat) -> Result<FrameIndex> {
        self.scan_source(reader, len, format, Path::new("<reader>"))
    }

    fn scan_source<R: Read>(
        &self,
        mut reader: R,
        len: Option<u64>,
        format: &MessageFormat,
        path: &Path,
    ) -> Result<FrameIndex> {
        let size = format.message_size();
        let budget = self.limit.budget(len, size);
        let capacity = self.chunk_size.max(size);

        let mut buffer = vec![0u8; capacity];
        let mut filled = 0usize;
        let mut base = 0u64;
        let mut total_read = 0u64;
        let mut index = FrameIndex::new();

        loop {
            // Only the search for the first frame is bounded.
            let search_budget = if index.is_empty() { budget } else { None };

            let mut want = capacity - filled;
            if let Some(budget) = search_budget {
                let remaining = budget.saturating_sub(total_read);
                want = want.min(usize::try_from(remaining).unwrap_or(usize::MAX));
            }

            let read = read_some(&mut reader, &mut buffer[filled..filled + want])
                .map_err(|e| ReplayError::file_error(path, e))?;
            let exhausted = want > 0 && read == 0;
            filled += read;
            total_read += read as u64;

            let mut position = 0usize;
            while position + size <= filled {
                let window = &buffer[position..position + size];
                if format.matches_at(window) {
                    index.push(base + position as u64, format.decode_timestamp(window));
                    position += size;
                } else {
                    position += 1;
                }
            }

            if let Some(budget) = search_budget.filter(|&b| index.is_empty() && total_read >= b) {
                debug!("'{}' not found in first {} bytes of {}", format.name(), budget, path.display());
                return Err(ReplayError::NoFrameFound { format: format.name().to_string(), budget });
            }

            if exhausted {
                break;
            }

            buffer.copy_within(position..filled, 0);
            filled -= position;
            base += position as u64;
        }

        match index.len() {
            0 => Err(ReplayError::NoFrameFound { format: format.name().to_string(), budget: total_read }),
            1 => Err(ReplayError::InsufficientFrames { format: format.name().to_string(), found: 1 }),
            frames => {
                if !index.is_time_ordered() {
                    warn!(
                        "'{}' timestamps in {} are not monotonic; seeking may be imprecise",
                        format.name(),
                        path.display()
                    );
                }
                debug!("Indexed {} '{}' frames in {}", frames, format.name(), path.display());
                Ok(index)
            }
        }
    }
}

/// `Read::read` that retries on `Interrupted`.
fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}
