use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::{StreamId, StreamRegistration, StreamStatus};
use crate::Result;
use crate::format::MessageFormat;
use crate::index::{FrameIndex, FrameIndexEntry};

/// Playback state of one registered log.
///
/// The format and index are `Arc`s: restarting a replay reuses the exact
/// index built on load.
#[derive(Debug, Clone)]
pub struct StreamState {
    id: StreamId,
    path: Option<PathBuf>,
    destination: SocketAddr,
    format: Option<Arc<MessageFormat>>,
    index: Option<Arc<FrameIndex>>,
    cursor: usize,
    replayed: usize,
    status: StreamStatus,
    notification: String,
}

impl StreamState {
    pub(crate) fn new(id: StreamId, registration: &StreamRegistration) -> Result<Self> {
        let destination = registration.destination()?;
        Ok(Self {
            id,
            path: registration.file_path.clone(),
            destination,
            format: None,
            index: None,
            cursor: 0,
            replayed: 0,
            status: StreamStatus::Unparsed,
            notification: String::new(),
        })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn format(&self) -> Option<&Arc<MessageFormat>> {
        self.format.as_ref()
    }

    pub fn index(&self) -> Option<&Arc<FrameIndex>> {
        self.index.as_ref()
    }

    /// Position of the next frame to send.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn replayed_count(&self) -> usize {
        self.replayed
    }

    pub fn total_count(&self) -> usize {
        self.index.as_ref().map_or(0, |index| index.len())
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn notification(&self) -> &str {
        &self.notification
    }

    pub fn start_time(&self) -> Option<f64> {
        self.index.as_ref().and_then(|index| index.start_time())
    }

    pub fn end_time(&self) -> Option<f64> {
        self.index.as_ref().and_then(|index| index.end_time())
    }

    pub fn duration(&self) -> f64 {
        self.index.as_ref().map_or(0.0, |index| index.duration())
    }

    pub fn is_matched(&self) -> bool {
        self.status.is_matched() && self.index.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.status == StreamStatus::Finished
    }

    /// Share of frames sent, 0 to 100.
    pub fn percent_complete(&self) -> f64 {
        match self.total_count() {
            0 => 0.0,
            total => self.replayed as f64 / total as f64 * 100.0,
        }
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            id: self.id,
            status: self.status,
            file_path: self.path.clone(),
            destination: self.destination,
            format_name: self.format.as_ref().map(|f| f.name().to_string()),
            start_time: self.start_time(),
            end_time: self.end_time(),
            total_packets: self.total_count(),
            replayed_packets: self.replayed,
            percent_complete: self.percent_complete(),
            notification: self.notification.clone(),
        }
    }

    pub(crate) fn begin_parsing(&mut self) {
        self.status = StreamStatus::Parsing;
        self.notification.clear();
    }

    pub(crate) fn bind(&mut self, format: Arc<MessageFormat>, index: Arc<FrameIndex>) {
        self.format = Some(format);
        self.index = Some(index);
        self.cursor = 0;
        self.replayed = 0;
        self.status = StreamStatus::Found;
        self.notification.clear();
    }

    pub(crate) fn mark_not_found(&mut self, notification: impl Into<String>) {
        self.format = None;
        self.index = None;
        self.status = StreamStatus::NotFound;
        self.notification = notification.into();
    }

    pub(crate) fn mark_skipped(&mut self, notification: impl Into<String>) {
        self.status = StreamStatus::Skipped;
        self.notification = notification.into();
    }

    /// Back to `Unparsed`, dropping the bound format and index.
    pub(crate) fn reset(&mut self) {
        self.format = None;
        self.index = None;
        self.cursor = 0;
        self.replayed = 0;
        self.status = StreamStatus::Unparsed;
        self.notification.clear();
    }

    /// Rewind a matched stream to its first frame, keeping the index.
    pub(crate) fn rewind(&mut self) {
        if self.is_matched() {
            self.cursor = 0;
            self.replayed = 0;
            self.status = StreamStatus::Found;
        }
    }

    pub(crate) fn start_playing(&mut self) {
        if self.status == StreamStatus::Found {
            self.status = StreamStatus::Playing;
        }
    }

    pub(crate) fn set_destination(&mut self, destination: SocketAddr) {
        self.destination = destination;
    }

    pub(crate) fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
        self.reset();
    }

    /// Next frame if it is due at replay time `now`.
    pub(crate) fn due_entry(&self, now: f64) -> Option<FrameIndexEntry> {
        let entry = *self.index.as_ref()?.get(self.cursor)?;
        (entry.timestamp <= now).then_some(entry)
    }

    /// Record one delivered frame.
    pub(crate) fn advance(&mut self) {
        let total = self.total_count();
        if self.cursor < total {
            self.cursor += 1;
            self.replayed += 1;
        }
        if self.cursor >= total {
            self.status = StreamStatus::Finished;
        }
    }

    /// Jump to the first frame at or after `target`.
    ///
    /// Frames before the target count as replayed; nothing is sent. A target
    /// behind the cursor moves it back.
    pub(crate) fn seek_to(&mut self, target: f64) {
        let Some(index) = self.index.as_ref() else {
            return;
        };
        let position = index.first_at_or_after(target);
        self.cursor = position;
        self.replayed = position;
        self.status = if position >= index.len() { StreamStatus::Finished } else { StreamStatus::Playing };
    }
}

/// Serializable view of a stream for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    pub id: StreamId,
    pub status: StreamStatus,
    pub file_path: Option<PathBuf>,
    pub destination: SocketAddr,
    pub format_name: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub total_packets: usize,
    pub replayed_packets: usize,
    pub percent_complete: f64,
    pub notification: String,
}
