//! Replay progress published to status displays.
//!
//! The scheduler publishes a [`ReplayProgress`] through a `watch` channel;
//! [`ReplaySession::progress`](crate::ReplaySession::progress) reads the
//! latest value and
//! [`ReplaySession::progress_updates`](crate::ReplaySession::progress_updates)
//! turns the channel into a [`Sampled`] stream so a UI can redraw at its own
//! rate.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use pin_project_lite::pin_project;
use serde::Serialize;
use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::stream::StreamSnapshot;

/// Aggregate replay position and per-stream status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayProgress {
    /// Current position. An absolute timestamp in synchronized mode, an
    /// offset from the stream's first timestamp in concurrent mode.
    pub position: f64,
    /// Timeline bounds `position` moves between.
    pub start: f64,
    pub end: f64,
    /// `position` within `start..=end`, 0 to 100.
    pub percent: f64,
    pub concurrent: bool,
    pub paused: bool,
    /// Every stream has sent its last frame.
    pub finished: bool,
    pub streams: Vec<StreamSnapshot>,
}

impl ReplayProgress {
    pub(crate) fn percent_of(position: f64, start: f64, end: f64) -> f64 {
        if end > start { ((position - start) / (end - start) * 100.0).clamp(0.0, 100.0) } else { 0.0 }
    }

    /// Total frames sent across all streams.
    pub fn replayed_packets(&self) -> usize {
        self.streams.iter().map(|s| s.replayed_packets).sum()
    }
}

/// Extension trait to sample any stream at a fixed period.
pub trait SampleExt: Stream {
    /// Emit at most one item per `period`, the latest one received.
    fn sample(self, period: Duration) -> Sampled<Self>
    where
        Self: Sized,
    {
        Sampled::new(self, period)
    }
}

impl<T: Stream> SampleExt for T {}

pin_project! {
    /// Latest-wins sampling of an inner stream.
    ///
    /// Items that arrive within one period replace each other. Periods with
    /// no new item emit nothing. When the inner stream ends, its last pending
    /// item is delivered immediately and then the sampled stream ends.
    pub struct Sampled<S: Stream> {
        #[pin]
        inner: S,
        ticks: Interval,
        latest: Option<S::Item>,
        done: bool,
    }
}

impl<S: Stream> Sampled<S> {
    pub fn new(inner: S, period: Duration) -> Self {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { inner, ticks, latest: None, done: false }
    }
}

impl<S: Stream> Stream for Sampled<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        while !*this.done {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.latest = Some(item),
                Poll::Ready(None) => *this.done = true,
                Poll::Pending => break,
            }
        }

        if *this.done {
            return Poll::Ready(this.latest.take());
        }
        if this.latest.is_none() {
            return Poll::Pending;
        }

        match this.ticks.poll_tick(cx) {
            Poll::Ready(_) => Poll::Ready(this.latest.take()),
            Poll::Pending => Poll::Pending,
        }
    }
}
