//! Timed delivery loop.
//!
//! One spawned task owns the matched streams, their read handles and the
//! transport for the duration of a run. Every tick it:
//!
//! 1. exits if the cancellation token fired
//! 2. sleeps without advancing any clock while paused
//! 3. applies a pending seek
//! 4. advances the shared clock and every per-stream clock by
//!    `elapsed × speed`
//! 5. sends every frame whose timestamp is due, per stream, in index order
//! 6. exits once every stream has sent its last frame
//! 7. publishes progress and sleeps one tick
//!
//! The streams are handed back through the task's [`RunOutcome`] so the
//! session can inspect and restart them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::control::ReplayControl;
use super::source::SourceSet;
use crate::clock::{MonotonicClock, VirtualClock};
use crate::progress::ReplayProgress;
use crate::stream::StreamState;
use crate::transport::Transport;

/// Minimum spacing of routine progress publications.
const PUBLISH_INTERVAL: Duration = Duration::from_millis(20);

/// Earliest first timestamp and latest last timestamp across streams.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Timeline {
    pub(crate) start: f64,
    pub(crate) end: f64,
}

impl Timeline {
    pub(crate) fn of(streams: &[StreamState]) -> Self {
        let mut bounds: Option<(f64, f64)> = None;
        for stream in streams {
            if let (Some(first), Some(last)) = (stream.start_time(), stream.end_time()) {
                bounds = Some(match bounds {
                    Some((start, end)) => (start.min(first), end.max(last)),
                    None => (first, last),
                });
            }
        }
        bounds.map_or_else(Self::default, |(start, end)| Self { start, end })
    }
}

/// What a finished run hands back to the session.
#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub(crate) streams: Vec<StreamState>,
    /// Every stream sent its last frame (as opposed to being stopped).
    pub(crate) completed: bool,
}

/// Progress for streams that are not being replayed.
pub(crate) fn idle_progress(streams: &[StreamState], concurrent: bool) -> ReplayProgress {
    let timeline = Timeline::of(streams);
    let (start, end) = if concurrent {
        (0.0, streams.iter().map(|s| s.duration()).fold(0.0, f64::max))
    } else {
        (timeline.start, timeline.end)
    };
    ReplayProgress {
        position: start,
        start,
        end,
        percent: 0.0,
        concurrent,
        paused: false,
        finished: false,
        streams: streams.iter().map(|s| s.snapshot()).collect(),
    }
}

struct ActiveStream {
    state: StreamState,
    clock: VirtualClock,
    /// First timestamp of the stream; its own time base in concurrent mode.
    origin: f64,
    failures: u32,
}

impl ActiveStream {
    fn new(state: StreamState) -> Self {
        let origin = state.start_time().unwrap_or(0.0);
        Self { state, clock: VirtualClock::starting_at(origin), origin, failures: 0 }
    }

    fn note_failure(&mut self, action: &str, error: &std::io::Error) {
        self.failures += 1;
        if self.failures == 1 {
            warn!(
                "Stream {}: {} failed at frame {}: {}; retrying every tick",
                self.state.id(),
                action,
                self.state.cursor(),
                error
            );
        } else {
            trace!("Stream {}: {} failed again ({}): {}", self.state.id(), action, self.failures, error);
        }
    }

    fn note_success(&mut self) {
        if self.failures > 0 {
            info!("Stream {} recovered after {} failed attempts", self.state.id(), self.failures);
            self.failures = 0;
        }
    }
}

pub(crate) struct Scheduler<T: Transport> {
    streams: Vec<ActiveStream>,
    sources: SourceSet,
    transport: T,
    control: Arc<ReplayControl>,
    cancel: CancellationToken,
    progress: Arc<watch::Sender<ReplayProgress>>,
    tick: Duration,
    timeline: Timeline,
    shared: VirtualClock,
    last_publish: Option<Instant>,
}

impl<T: Transport> Scheduler<T> {
    /// `streams[i]` must be the stream `sources.sources[i]` was opened for.
    pub(crate) fn new(
        streams: Vec<StreamState>,
        sources: SourceSet,
        transport: T,
        control: Arc<ReplayControl>,
        cancel: CancellationToken,
        progress: Arc<watch::Sender<ReplayProgress>>,
        tick: Duration,
    ) -> Self {
        let timeline = Timeline::of(&streams);
        Self {
            streams: streams.into_iter().map(ActiveStream::new).collect(),
            sources,
            transport,
            control,
            cancel,
            progress,
            tick,
            timeline,
            shared: VirtualClock::starting_at(timeline.start),
            last_publish: None,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<RunOutcome> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> RunOutcome {
        info!(
            "Replay started: {} stream(s), timeline {:.3}..{:.3}",
            self.streams.len(),
            self.timeline.start,
            self.timeline.end
        );
        for active in &mut self.streams {
            active.state.start_playing();
        }
        self.publish(true, false);

        let mut wall = MonotonicClock::new();
        let mut was_paused = false;

        let completed = loop {
            if self.cancel.is_cancelled() {
                info!("Replay cancelled");
                break false;
            }

            if self.control.is_paused() {
                if !was_paused {
                    debug!("Replay paused at {:.3}", self.shared.position());
                    was_paused = true;
                    self.publish(true, false);
                }
                wall.reset();
                if !self.sleep_tick().await {
                    break false;
                }
                continue;
            }
            if was_paused {
                debug!("Replay resumed at {:.3}", self.shared.position());
                was_paused = false;
            }

            let concurrent = self.control.is_concurrent();
            if let Some(target) = self.control.take_seek() {
                self.seek(target, concurrent);
            }

            let elapsed = wall.lap();
            let speed = self.control.speed();
            self.shared.advance(elapsed, speed);
            for active in &mut self.streams {
                active.clock.advance(elapsed, speed);
            }

            self.drain(concurrent).await;

            if self.streams.iter().all(|active| active.state.is_finished()) {
                info!("Replay finished");
                break true;
            }

            self.publish(false, false);
            if !self.sleep_tick().await {
                break false;
            }
        };

        self.finish(completed)
    }

    /// Sleep one tick; `false` if cancelled meanwhile.
    async fn sleep_tick(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.tick) => true,
        }
    }

    fn seek(&mut self, target: f64, concurrent: bool) {
        // Keep both time bases at the same offset so a later mode switch
        // does not jump.
        let offset = if concurrent { target } else { target - self.timeline.start };
        self.shared.set(self.timeline.start + offset);

        for active in &mut self.streams {
            let position = active.origin + offset;
            active.clock.set(position);
            active.state.seek_to(if concurrent { position } else { target });
        }

        info!("Seeked to {:.3} ({} mode)", target, if concurrent { "concurrent" } else { "synchronized" });
        self.publish(true, false);
    }

    async fn drain(&mut self, concurrent: bool) {
        let shared_now = self.shared.position();

        for (active, source) in self.streams.iter_mut().zip(self.sources.sources.iter_mut()) {
            let now = if concurrent { active.clock.position() } else { shared_now };

            while let Some(entry) = active.state.due_entry(now) {
                let frame = match source.read_frame(entry.byte_offset) {
                    Ok(frame) => frame,
                    Err(e) => {
                        active.note_failure("read", &e);
                        break;
                    }
                };

                match self.transport.send_to(frame, active.state.destination()).await {
                    Ok(_) => {
                        active.note_success();
                        active.state.advance();
                        trace!(
                            "Stream {} sent frame {}/{} (t={:.3})",
                            active.state.id(),
                            active.state.cursor(),
                            active.state.total_count(),
                            entry.timestamp
                        );
                        if active.state.is_finished() {
                            debug!(
                                "Stream {} finished after {} frames",
                                active.state.id(),
                                active.state.replayed_count()
                            );
                        }
                    }
                    Err(e) => {
                        active.note_failure("send", &e);
                        break;
                    }
                }
            }
        }
    }

    fn progress_snapshot(&self, finished: bool) -> ReplayProgress {
        let concurrent = self.control.is_concurrent();
        let (position, start, end) = if concurrent {
            let longest = self
                .streams
                .iter()
                .max_by(|a, b| a.state.duration().total_cmp(&b.state.duration()));
            match longest {
                Some(active) => (active.clock.position() - active.origin, 0.0, active.state.duration()),
                None => (0.0, 0.0, 0.0),
            }
        } else {
            (self.shared.position(), self.timeline.start, self.timeline.end)
        };

        ReplayProgress {
            position: position.min(end),
            start,
            end,
            percent: if finished { 100.0 } else { ReplayProgress::percent_of(position, start, end) },
            concurrent,
            paused: self.control.is_paused(),
            finished,
            streams: self.streams.iter().map(|active| active.state.snapshot()).collect(),
        }
    }

    fn publish(&mut self, force: bool, finished: bool) {
        let now = Instant::now();
        if !force && self.last_publish.is_some_and(|last| now.duration_since(last) < PUBLISH_INTERVAL) {
            return;
        }
        self.last_publish = Some(now);
        self.progress.send_replace(self.progress_snapshot(finished));
    }

    fn finish(mut self, completed: bool) -> RunOutcome {
        self.publish(true, completed);

        let Scheduler { streams, sources, transport, .. } = self;
        drop(transport);
        drop(sources);

        let streams: Vec<StreamState> = streams.into_iter().map(|active| active.state).collect();
        let replayed: usize = streams.iter().map(|s| s.replayed_count()).sum();
        info!("Replay task ended ({} frames sent in total)", replayed);

        RunOutcome { streams, completed }
    }
}
