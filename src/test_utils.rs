//! Test utilities: synthetic logs and an in-memory transport.
//!
//! [`LogBuilder`] writes well-formed frames for any [`MessageFormat`], with
//! optional garbage between them, and remembers where each frame starts.
//! [`RecordingConnector`] hands out transports that record every datagram
//! instead of sending it, optionally failing a number of sends first.

#![cfg(any(test, feature = "benchmark"))]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::NamedTempFile;
use tokio::time::Instant;

use crate::format::{ByteOrder, MessageFormat, MessageFormatRecord};
use crate::transport::{Connector, Transport};
use crate::{ReplayError, Result};

/// 16-byte frames: sync `AA 55`, big-endian `u32` timestamp at offset 4,
/// end `0D 0A`, scaling 1.
pub fn sample_format() -> MessageFormat {
    MessageFormatRecord::new("nav", 16)
        .sync(&[0xAA, 0x55])
        .end(&[0x0D, 0x0A])
        .timestamp(4, 4, 1.0)
        .build()
        .expect("sample format is valid")
}

/// Builds raw log bytes frame by frame.
#[derive(Debug, Clone)]
pub struct LogBuilder {
    format: MessageFormat,
    bytes: Vec<u8>,
    offsets: Vec<u64>,
}

impl LogBuilder {
    pub fn new(format: &MessageFormat) -> Self {
        Self { format: format.clone(), bytes: Vec::new(), offsets: Vec::new() }
    }

    /// Append `len` zero bytes. Zero never starts a frame.
    pub fn garbage(mut self, len: usize) -> Self {
        self.bytes.resize(self.bytes.len() + len, 0);
        self
    }

    /// Append arbitrary bytes.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Append one frame whose decoded timestamp is `timestamp`.
    ///
    /// Payload bytes (and wildcard sync/end slots) hold the frame's ordinal.
    /// The timestamp is written last, so it wins if it overlaps an anchor.
    pub fn frame(mut self, timestamp: f64) -> Self {
        let format = &self.format;
        let size = format.message_size();
        let fill = self.offsets.len() as u8;
        let mut frame = vec![fill; size];

        for (slot, &byte) in format.sync_bytes().iter().enumerate() {
            if byte != 0 {
                frame[slot] = byte;
            }
        }
        let [end1, end2] = format.end_bytes();
        frame[size - 2] = end1;
        if end2 != 0 {
            frame[size - 1] = end2;
        }

        let raw = timestamp * format.timestamp_scaling();
        let start = format.timestamp_byte_offset();
        let field: Vec<u8> = match (format.timestamp_size(), format.byte_order()) {
            (4, ByteOrder::Big) => (raw as u32).to_be_bytes().to_vec(),
            (4, ByteOrder::Little) => (raw as u32).to_le_bytes().to_vec(),
            (8, ByteOrder::Big) => raw.to_be_bytes().to_vec(),
            (8, ByteOrder::Little) => raw.to_le_bytes().to_vec(),
            _ => Vec::new(),
        };
        frame[start..start + field.len()].copy_from_slice(&field);

        self.offsets.push(self.bytes.len() as u64);
        self.bytes.extend_from_slice(&frame);
        self
    }

    pub fn frames(self, timestamps: impl IntoIterator<Item = f64>) -> Self {
        timestamps.into_iter().fold(self, LogBuilder::frame)
    }

    /// Start offset of every frame written so far.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Write the log to a temporary file deleted on drop.
    pub fn write_temp(&self) -> std::io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(&self.bytes)?;
        file.flush()?;
        Ok(file)
    }
}

/// A datagram captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub destination: SocketAddr,
    pub payload: Vec<u8>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Recorder {
    sent: Mutex<Vec<SentDatagram>>,
    failing_sends: AtomicUsize,
    open: AtomicUsize,
    connections: AtomicUsize,
    refuse_connections: AtomicUsize,
}

/// Connector whose transports record instead of sending.
///
/// Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    recorder: Arc<Recorder>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in send order.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Make the next `count` sends fail with `WouldBlock`.
    pub fn fail_next_sends(&self, count: usize) {
        self.recorder.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` connects fail.
    pub fn refuse_next_connections(&self, count: usize) {
        self.recorder.refuse_connections.store(count, Ordering::SeqCst);
    }

    /// Transports handed out and not yet dropped.
    pub fn open_transports(&self) -> usize {
        self.recorder.open.load(Ordering::SeqCst)
    }

    /// Successful connects so far.
    pub fn connections(&self) -> usize {
        self.recorder.connections.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SentDatagram>> {
        self.recorder.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

#[async_trait::async_trait]
impl Connector for RecordingConnector {
    type Transport = RecordingTransport;

    async fn connect(&self) -> Result<RecordingTransport> {
        if take_one(&self.recorder.refuse_connections) {
            return Err(ReplayError::transport_failed("connection refused by test"));
        }
        self.recorder.connections.fetch_add(1, Ordering::SeqCst);
        self.recorder.open.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingTransport { recorder: Arc::clone(&self.recorder) })
    }
}

/// Transport produced by [`RecordingConnector`].
#[derive(Debug)]
pub struct RecordingTransport {
    recorder: Arc<Recorder>,
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> std::io::Result<usize> {
        if take_one(&self.recorder.failing_sends) {
            return Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "send failed by test"));
        }
        let record = SentDatagram { destination, payload: datagram.to_vec(), at: Instant::now() };
        self.recorder.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(record);
        Ok(datagram.len())
    }
}

impl Drop for RecordingTransport {
    fn drop(&mut self) {
        self.recorder.open.fetch_sub(1, Ordering::SeqCst);
    }
}
