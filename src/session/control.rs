//! Lock-free control signals shared between a session and its scheduler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Playback controls the scheduler re-reads on every tick.
#[derive(Debug)]
pub(crate) struct ReplayControl {
    paused: AtomicBool,
    concurrent: AtomicBool,
    speed: AtomicU64,
    seek_target: AtomicU64,
    seek_pending: AtomicBool,
}

impl ReplayControl {
    pub(crate) fn new(speed: f64, concurrent: bool) -> Self {
        Self {
            paused: AtomicBool::new(false),
            concurrent: AtomicBool::new(concurrent),
            speed: AtomicU64::new(speed.to_bits()),
            seek_target: AtomicU64::new(0f64.to_bits()),
            seek_pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub(crate) fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub(crate) fn set_concurrent(&self, concurrent: bool) {
        self.concurrent.store(concurrent, Ordering::Relaxed);
    }

    pub(crate) fn is_concurrent(&self) -> bool {
        self.concurrent.load(Ordering::Relaxed)
    }

    pub(crate) fn set_speed(&self, speed: f64) {
        self.speed.store(speed.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::Relaxed))
    }

    /// Request a seek; a later request replaces an unconsumed one.
    pub(crate) fn request_seek(&self, target: f64) {
        self.seek_target.store(target.to_bits(), Ordering::Relaxed);
        self.seek_pending.store(true, Ordering::Release);
    }

    /// Consume the pending seek, if any.
    pub(crate) fn take_seek(&self) -> Option<f64> {
        self.seek_pending
            .swap(false, Ordering::Acquire)
            .then(|| f64::from_bits(self.seek_target.load(Ordering::Relaxed)))
    }

    /// Clear pause and any pending seek before a new run.
    pub(crate) fn rearm(&self) {
        self.resume();
        self.seek_pending.store(false, Ordering::Release);
    }
}
