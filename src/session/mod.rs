//! Replay session: the control surface.
//!
//! A [`ReplaySession`] owns the registered streams, the format catalog and
//! the settings, and drives a scheduler task through the session state
//! machine:
//!
//! ```text
//! Unloaded --load--> Loaded --play--> Started <--pause/resume--> Paused
//!                                        |                         |
//!                                        +----stop / completion----+--> Stopped
//! restart: Loaded | Stopped | Started | Paused --> Started
//! reset:   any --> Unloaded
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use framecast::{FormatCatalog, ReplaySession, ReplaySettings, StreamRegistration};
//!
//! # async fn example() -> framecast::Result<()> {
//! let catalog = FormatCatalog::from_path("formats.yaml")?;
//! let mut session = ReplaySession::new(ReplaySettings::default(), catalog)?;
//!
//! session.register(StreamRegistration::new("run-042.bin", "127.0.0.1", 5000))?;
//! let report = session.load()?;
//! println!("{} of {} logs matched", report.matched(), report.outcomes.len());
//!
//! session.play().await?;
//! session.set_speed(2.0)?;
//! session.wait().await?;
//! # Ok(())
//! # }
//! ```

mod control;
pub(crate) mod scheduler;
mod source;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::format::FormatCatalog;
use crate::progress::{ReplayProgress, SampleExt, Sampled};
use crate::scan::{ConfigurationMatcher, MatchOutcome};
use crate::settings::{PlaybackSpeed, ReplaySettings};
use crate::stream::{StreamId, StreamRegistration, StreamState};
use crate::transport::{Connector, UdpConnector};
use crate::{ReplayError, Result};

use control::ReplayControl;
use scheduler::{RunOutcome, Scheduler, idle_progress};
use source::SourceSet;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unloaded,
    Loaded,
    Started,
    Paused,
    Stopped,
}

impl SessionStatus {
    pub fn is_running(self) -> bool {
        matches!(self, SessionStatus::Started | SessionStatus::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionStatus::Unloaded => "unloaded",
            SessionStatus::Loaded => "loaded",
            SessionStatus::Started => "started",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopped => "stopped",
        };
        f.write_str(text)
    }
}

/// Per-stream result of [`ReplaySession::load`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub outcomes: Vec<(StreamId, MatchOutcome)>,
}

impl LoadReport {
    pub fn matched(&self) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| outcome.is_matched()).count()
    }

    pub fn not_found(&self) -> usize {
        self.count(|outcome| *outcome == MatchOutcome::NotFound)
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| *outcome == MatchOutcome::Skipped)
    }

    fn count(&self, predicate: impl Fn(&MatchOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| predicate(outcome)).count()
    }
}

struct ActiveRun {
    handle: JoinHandle<RunOutcome>,
    cancel: CancellationToken,
}

/// Replays registered logs to their destinations.
///
/// While a replay runs, the scheduler task owns working copies of the stream
/// states; [`streams`](Self::streams) shows the state as of the last load or
/// stop, and [`progress`](Self::progress) shows live counts.
pub struct ReplaySession<C: Connector = UdpConnector> {
    settings: ReplaySettings,
    catalog: FormatCatalog,
    connector: C,
    streams: Vec<StreamState>,
    next_id: usize,
    status: SessionStatus,
    control: Arc<ReplayControl>,
    progress: Arc<watch::Sender<ReplayProgress>>,
    run: Option<ActiveRun>,
}

impl ReplaySession<UdpConnector> {
    /// Session sending over UDP as configured by `settings`.
    pub fn new(settings: ReplaySettings, catalog: FormatCatalog) -> Result<Self> {
        let connector = settings.udp_connector();
        Self::with_connector(settings, catalog, connector)
    }
}

impl<C: Connector> ReplaySession<C> {
    pub fn with_connector(settings: ReplaySettings, catalog: FormatCatalog, connector: C) -> Result<Self> {
        settings.validate()?;
        let control = Arc::new(ReplayControl::new(settings.speed.multiplier(), settings.concurrent));
        let (progress, _) = watch::channel(idle_progress(&[], settings.concurrent));

        Ok(Self {
            settings,
            catalog,
            connector,
            streams: Vec::new(),
            next_id: 0,
            status: SessionStatus::Unloaded,
            control,
            progress: Arc::new(progress),
            run: None,
        })
    }

    /// Current state. A replay that completed on its own reports `Stopped`.
    pub fn status(&self) -> SessionStatus {
        match &self.run {
            Some(run) if run.handle.is_finished() => SessionStatus::Stopped,
            _ => self.status,
        }
    }

    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    /// Edit candidate formats. Streams already matched keep their format.
    pub fn catalog_mut(&mut self) -> &mut FormatCatalog {
        &mut self.catalog
    }

    pub fn streams(&self) -> &[StreamState] {
        &self.streams
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamState> {
        self.streams.iter().find(|s| s.id() == id)
    }

    /// Add a log to replay.
    ///
    /// # Errors
    ///
    /// - [`ReplayError::InvalidState`] unless the session is `Unloaded`
    /// - [`ReplayError::StreamLimit`] once `max_streams` are registered
    /// - [`ReplayError::InvalidAddress`] for a bad destination
    pub fn register(&mut self, registration: StreamRegistration) -> Result<StreamId> {
        self.require_unloaded("register")?;
        if self.streams.len() >= self.settings.max_streams {
            return Err(ReplayError::StreamLimit { limit: self.settings.max_streams });
        }

        let id = StreamId(self.next_id);
        let state = StreamState::new(id, &registration)?;
        self.next_id += 1;
        self.streams.push(state);
        debug!("Registered stream {} -> {}", id, registration.destination_ip);
        self.publish_idle();
        Ok(id)
    }

    pub fn unregister(&mut self, id: StreamId) -> Result<()> {
        self.require_unloaded("unregister")?;
        let position = self.position_of(id)?;
        self.streams.remove(position);
        self.publish_idle();
        Ok(())
    }

    /// Replace a stream's log file. The stream goes back to `Unparsed`.
    pub fn set_file(&mut self, id: StreamId, file_path: Option<PathBuf>) -> Result<()> {
        self.require_unloaded("change a log file")?;
        let position = self.position_of(id)?;
        self.streams[position].set_path(file_path);
        self.publish_idle();
        Ok(())
    }

    /// Change where a stream is sent. Not allowed while a replay runs.
    pub fn set_destination(&mut self, id: StreamId, ip: &str, port: u16) -> Result<()> {
        self.reap_finished();
        if self.status.is_running() {
            return Err(ReplayError::invalid_state("change a destination", self.status));
        }
        let destination = StreamRegistration {
            file_path: None,
            destination_ip: ip.to_string(),
            destination_port: port,
        }
        .destination()?;
        let position = self.position_of(id)?;
        self.streams[position].set_destination(destination);
        self.publish_idle();
        Ok(())
    }

    /// Match every registered log against the catalog.
    ///
    /// Unmatched logs are reported per stream and do not fail the load.
    /// Scanning reads files synchronously.
    ///
    /// # Errors
    ///
    /// - [`ReplayError::InvalidState`] unless the session is `Unloaded`
    /// - [`ReplayError::NoStreamsLoaded`] if no log matched; the session stays `Unloaded`
    pub fn load(&mut self) -> Result<LoadReport> {
        self.require_unloaded("load")?;

        let matcher = ConfigurationMatcher::new(self.settings.parse_limit);
        let candidates = self.catalog.formats().to_vec();
        let mut report = LoadReport::default();
        for stream in &mut self.streams {
            let outcome = matcher.match_stream(stream, &candidates);
            report.outcomes.push((stream.id(), outcome));
        }
        self.publish_idle();

        if report.matched() == 0 {
            warn!("Load failed: none of {} log(s) matched a format", self.streams.len());
            return Err(ReplayError::NoStreamsLoaded);
        }

        self.status = SessionStatus::Loaded;
        info!(
            "Session loaded: {} matched, {} not found, {} skipped",
            report.matched(),
            report.not_found(),
            report.skipped()
        );
        Ok(report)
    }

    /// Start replaying from the beginning.
    ///
    /// # Errors
    ///
    /// - [`ReplayError::InvalidState`] unless the session is `Loaded`
    /// - [`ReplayError::File`] if a log cannot be opened (or copied)
    /// - [`ReplayError::Transport`] if the connector fails
    pub async fn play(&mut self) -> Result<()> {
        self.reap_finished();
        if self.status != SessionStatus::Loaded {
            return Err(ReplayError::invalid_state("play", self.status));
        }
        self.launch().await
    }

    pub fn pause(&mut self) -> Result<()> {
        self.reap_finished();
        if self.status != SessionStatus::Started {
            return Err(ReplayError::invalid_state("pause", self.status));
        }
        self.control.pause();
        self.status = SessionStatus::Paused;
        info!("Replay paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.reap_finished();
        if self.status != SessionStatus::Paused {
            return Err(ReplayError::invalid_state("resume", self.status));
        }
        self.control.resume();
        self.status = SessionStatus::Started;
        info!("Replay resumed");
        Ok(())
    }

    /// Stop the replay and wait for the scheduler to release its transport
    /// and file handles. Stopping a stopped session does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Started | SessionStatus::Paused => {}
            SessionStatus::Stopped => return Ok(()),
            other => return Err(ReplayError::invalid_state("stop", other)),
        }

        let result = match self.run.take() {
            Some(run) => {
                run.cancel.cancel();
                let joined = run.handle.await;
                self.absorb(joined)
            }
            None => Ok(()),
        };
        self.status = SessionStatus::Stopped;
        info!("Replay stopped");
        result
    }

    /// Rewind every stream and replay again without re-scanning.
    ///
    /// A running replay is stopped first.
    pub async fn restart(&mut self) -> Result<()> {
        self.reap_finished();
        match self.status {
            SessionStatus::Started | SessionStatus::Paused => self.stop().await?,
            SessionStatus::Loaded | SessionStatus::Stopped => {}
            SessionStatus::Unloaded => return Err(ReplayError::invalid_state("restart", self.status)),
        }
        for stream in &mut self.streams {
            stream.rewind();
        }
        info!("Restarting replay");
        self.launch().await
    }

    /// Stop if running and forget every match. Registrations are kept.
    pub async fn reset(&mut self) -> Result<()> {
        self.reap_finished();
        if self.status.is_running() {
            self.stop().await?;
        }
        for stream in &mut self.streams {
            stream.reset();
        }
        self.status = SessionStatus::Unloaded;
        self.publish_idle();
        info!("Session reset");
        Ok(())
    }

    /// Change the playback speed; a running replay picks it up next tick.
    pub fn set_speed(&mut self, multiplier: f64) -> Result<()> {
        let speed = PlaybackSpeed::new(multiplier)?;
        self.control.set_speed(speed.multiplier());
        self.settings.speed = speed;
        debug!("Playback speed set to {}", speed);
        Ok(())
    }

    /// Switch between one shared timeline and per-stream timelines.
    pub fn set_concurrent_mode(&mut self, concurrent: bool) {
        self.control.set_concurrent(concurrent);
        self.settings.concurrent = concurrent;
        debug!("Concurrent mode {}", if concurrent { "on" } else { "off" });
        self.publish_idle();
    }

    /// Jump to `position`.
    ///
    /// In synchronized mode `position` is a timestamp on the shared timeline;
    /// in concurrent mode it is an offset from each stream's first timestamp.
    /// Frames before the target are counted as replayed without being sent.
    /// Seeking backwards rewinds the cursors, so frames from the target on
    /// are sent again as the clock reaches them; the seek itself sends
    /// nothing.
    pub fn seek(&mut self, position: f64) -> Result<()> {
        self.reap_finished();
        if !self.status.is_running() {
            return Err(ReplayError::invalid_state("seek", self.status));
        }
        if !position.is_finite() {
            return Err(ReplayError::config("seek", format!("position {} is not finite", position)));
        }
        self.control.request_seek(position);
        Ok(())
    }

    /// Latest published progress.
    pub fn progress(&self) -> ReplayProgress {
        self.progress.borrow().clone()
    }

    /// Progress as a stream sampled at most once per `period`.
    pub fn progress_updates(&self, period: Duration) -> Sampled<WatchStream<ReplayProgress>> {
        WatchStream::new(self.progress.subscribe()).sample(period)
    }

    /// Wait for the running replay to finish on its own.
    ///
    /// Returns immediately for a stopped session.
    pub async fn wait(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Started => {}
            SessionStatus::Stopped => return Ok(()),
            other => return Err(ReplayError::invalid_state("wait", other)),
        }

        let result = match self.run.take() {
            Some(run) => {
                let joined = run.handle.await;
                self.absorb(joined)
            }
            None => Ok(()),
        };
        self.status = SessionStatus::Stopped;
        result
    }

    async fn launch(&mut self) -> Result<()> {
        let participants: Vec<StreamState> =
            self.streams.iter().filter(|s| s.is_matched()).cloned().collect();
        if participants.is_empty() {
            return Err(ReplayError::NoStreamsLoaded);
        }

        // Opening may copy whole logs; keep that off the runtime threads.
        let private_copies = self.settings.private_copies;
        let (participants, sources) = tokio::task::spawn_blocking(move || {
            let sources = SourceSet::open(&participants, private_copies);
            (participants, sources)
        })
        .await
        .map_err(|e| ReplayError::Task { reason: format!("opening logs failed: {}", e) })?;
        let sources = sources?;
        let transport = self.connector.connect().await?;

        self.control.rearm();
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            participants,
            sources,
            transport,
            Arc::clone(&self.control),
            cancel.clone(),
            Arc::clone(&self.progress),
            self.settings.tick_interval(),
        );
        self.run = Some(ActiveRun { handle: scheduler.spawn(), cancel });
        self.status = SessionStatus::Started;
        Ok(())
    }

    /// Collect a replay that completed on its own, without blocking.
    fn reap_finished(&mut self) {
        let Some(mut run) = self.run.take() else {
            return;
        };
        if !run.handle.is_finished() {
            self.run = Some(run);
            return;
        }
        match (&mut run.handle).now_or_never() {
            Some(joined) => {
                if let Err(e) = self.absorb(joined) {
                    warn!("{}", e);
                }
                self.status = SessionStatus::Stopped;
            }
            None => self.run = Some(run),
        }
    }

    /// Merge the scheduler's stream states back into the session.
    fn absorb(&mut self, joined: std::result::Result<RunOutcome, JoinError>) -> Result<()> {
        match joined {
            Ok(outcome) => {
                if outcome.completed {
                    info!("Replay completed");
                }
                for state in outcome.streams {
                    if let Some(slot) = self.streams.iter_mut().find(|s| s.id() == state.id()) {
                        *slot = state;
                    }
                }
                Ok(())
            }
            Err(e) => {
                error!("Replay task failed: {}", e);
                Err(ReplayError::Task { reason: e.to_string() })
            }
        }
    }

    fn publish_idle(&self) {
        if self.run.is_none() {
            self.progress.send_replace(idle_progress(&self.streams, self.control.is_concurrent()));
        }
    }

    fn require_unloaded(&mut self, operation: &'static str) -> Result<()> {
        self.reap_finished();
        if self.status == SessionStatus::Unloaded {
            Ok(())
        } else {
            Err(ReplayError::invalid_state(operation, self.status))
        }
    }

    fn position_of(&self, id: StreamId) -> Result<usize> {
        self.streams
            .iter()
            .position(|s| s.id() == id)
            .ok_or(ReplayError::UnknownStream { id })
    }
}

impl<C: Connector> Drop for ReplaySession<C> {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            debug!("Dropping replay session, cancelling scheduler");
            run.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MessageFormatRecord;
    use crate::scan::ParseLimit;
    use crate::stream::StreamStatus;
    use crate::test_utils::{LogBuilder, RecordingConnector, sample_format};
    use anyhow::{Context, ensure};
    use futures::StreamExt;
    use std::net::SocketAddr;
    use tempfile::NamedTempFile;

    fn catalog() -> FormatCatalog {
        let other = MessageFormatRecord::new("other", 24).sync(&[0x47, 0x47]).end(&[0x99]).build().unwrap();
        let mut catalog = FormatCatalog::new();
        catalog.add(other).unwrap();
        catalog.add(sample_format()).unwrap();
        catalog
    }

    fn settings() -> ReplaySettings {
        ReplaySettings { parse_limit: ParseLimit::None, ..ReplaySettings::default() }
    }

    fn session(connector: &RecordingConnector) -> ReplaySession<RecordingConnector> {
        ReplaySession::with_connector(settings(), catalog(), connector.clone()).unwrap()
    }

    fn log(timestamps: &[f64]) -> NamedTempFile {
        LogBuilder::new(&sample_format()).frames(timestamps.iter().copied()).write_temp().unwrap()
    }

    fn registration(file: &NamedTempFile) -> StreamRegistration {
        StreamRegistration::new(file.path(), "127.0.0.1", 5000)
    }

    #[tokio::test]
    async fn controls_require_the_right_state() {
        let connector = RecordingConnector::new();
        let mut session = session(&connector);

        assert!(matches!(session.play().await, Err(ReplayError::InvalidState { .. })));
        assert!(matches!(session.pause(), Err(ReplayError::InvalidState { .. })));
        assert!(matches!(session.seek(1.0), Err(ReplayError::InvalidState { .. })));
        assert!(matches!(session.stop().await, Err(ReplayError::InvalidState { .. })));
        assert!(matches!(session.restart().await, Err(ReplayError::InvalidState { .. })));
        assert!(matches!(session.load(), Err(ReplayError::NoStreamsLoaded)));
        assert_eq!(session.status(), SessionStatus::Unloaded);
        assert_eq!(connector.connections(), 0);
    }

    #[tokio::test]
    async fn registration_limit_and_editing() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        let mut session = ReplaySession::with_connector(
            ReplaySettings { max_streams: 2, ..settings() },
            catalog(),
            connector,
        )?;

        let first = session.register(StreamRegistration::default())?;
        let second = session.register(StreamRegistration::default())?;
        ensure!(matches!(
            session.register(StreamRegistration::default()),
            Err(ReplayError::StreamLimit { limit: 2 })
        ));

        session.unregister(first)?;
        ensure!(matches!(session.unregister(first), Err(ReplayError::UnknownStream { .. })));
        ensure!(matches!(
            session.set_destination(second, "not-an-ip", 5000),
            Err(ReplayError::InvalidAddress { .. })
        ));
        session.set_destination(second, "10.1.2.3", 7001)?;
        ensure!(session.stream(second).context("registered")?.destination() == "10.1.2.3:7001".parse::<SocketAddr>()?);
        Ok(())
    }

    #[tokio::test]
    async fn load_reports_each_stream() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        let mut session = session(&connector);
        let good = log(&[0.0, 1.0]);
        let foreign = NamedTempFile::new()?;
        std::fs::write(foreign.path(), vec![0x11u8; 256])?;

        let matched = session.register(registration(&good))?;
        let unmatched = session.register(registration(&foreign))?;
        let empty = session.register(StreamRegistration::default())?;

        let report = session.load()?;
        ensure!(report.matched() == 1 && report.not_found() == 1 && report.skipped() == 1);
        ensure!(session.status() == SessionStatus::Loaded);
        ensure!(session.stream(matched).context("matched")?.status() == StreamStatus::Found);
        ensure!(session.stream(unmatched).context("unmatched")?.status() == StreamStatus::NotFound);
        ensure!(session.stream(empty).context("empty")?.status() == StreamStatus::Skipped);

        let progress = session.progress();
        ensure!(progress.streams.len() == 3);
        ensure!(progress.streams[0].format_name.as_deref() == Some("nav"));

        ensure!(matches!(session.register(StreamRegistration::default()), Err(ReplayError::InvalidState { .. })));
        ensure!(matches!(session.load(), Err(ReplayError::InvalidState { .. })));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn replay_runs_to_completion() -> anyhow::Result<()> {
        let _ = tracing_subscriber::fmt::try_init();
        let connector = RecordingConnector::new();
        let mut session = session(&connector);
        let file = log(&[0.0, 0.5, 1.0]);
        let id = session.register(registration(&file))?;
        session.load()?;

        session.play().await?;
        ensure!(session.status() == SessionStatus::Started);
        ensure!(matches!(session.play().await, Err(ReplayError::InvalidState { .. })));

        tokio::time::sleep(Duration::from_secs(2)).await;
        ensure!(session.status() == SessionStatus::Stopped, "completion is visible before reaping");

        session.wait().await?;
        let stream = session.stream(id).context("stream")?;
        ensure!(stream.status() == StreamStatus::Finished);
        ensure!(stream.replayed_count() == 3);
        ensure!(connector.sent().len() == 3);
        ensure!(session.progress().finished);
        ensure!(connector.open_transports() == 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_transitions() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        let mut session = session(&connector);
        let file = log(&[0.0, 10.0]);
        session.register(registration(&file))?;
        session.load()?;
        session.play().await?;

        session.pause()?;
        ensure!(session.status() == SessionStatus::Paused);
        ensure!(matches!(session.pause(), Err(ReplayError::InvalidState { .. })));
        ensure!(matches!(session.wait().await, Err(ReplayError::InvalidState { .. })));

        tokio::time::sleep(Duration::from_secs(30)).await;
        ensure!(connector.sent().len() <= 1, "the t=10 frame must wait for resume");

        session.resume()?;
        ensure!(matches!(session.resume(), Err(ReplayError::InvalidState { .. })));
        session.wait().await?;
        ensure!(connector.sent().len() == 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_files_and_transport() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        let mut session = session(&connector);
        let file = log(&[0.0, 100.0]);
        let path = file.path().to_path_buf();
        session.register(registration(&file))?;
        session.load()?;

        session.play().await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.stop().await?;
        ensure!(session.status() == SessionStatus::Stopped);
        ensure!(connector.open_transports() == 0);
        session.stop().await?;

        // The log can be removed and replaced, and a fresh load picks it up.
        file.close()?;
        ensure!(!path.exists());
        std::fs::write(&path, LogBuilder::new(&sample_format()).frames([0.0, 1.0, 2.0, 3.0]).bytes())?;

        session.reset().await?;
        ensure!(session.status() == SessionStatus::Unloaded);
        let report = session.load()?;
        ensure!(report.outcomes[0].1 == MatchOutcome::Matched { format: "nav".into(), frames: 4 });
        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn private_copies_free_the_original_during_playback() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        let mut session = session(&connector);
        ensure!(session.settings().private_copies, "on unless opted out");
        let file = log(&[0.0, 1.0, 2.0]);
        session.register(registration(&file))?;
        session.load()?;

        session.play().await?;
        file.close()?;
        session.wait().await?;
        ensure!(connector.sent().len() == 3);

        session.settings.private_copies = false;
        session.restart().await.err().context("the original is gone")?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn restart_reuses_the_index() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        let mut session = session(&connector);
        let file = log(&[0.0, 1.0, 2.0]);
        let id = session.register(registration(&file))?;
        session.load()?;
        let index = Arc::clone(session.stream(id).and_then(|s| s.index()).context("index")?);

        session.play().await?;
        session.wait().await?;
        ensure!(session.stream(id).context("stream")?.replayed_count() == 3);

        // A rescan would fail: the file is gone.
        file.close()?;
        session.restart().await.err().context("restart needs the log file")?;

        let file = log(&[0.0, 1.0, 2.0]);
        std::fs::copy(file.path(), session.stream(id).and_then(|s| s.path()).context("path")?)?;
        session.restart().await?;
        ensure!(session.stream(id).context("stream")?.replayed_count() == 0);
        session.wait().await?;

        let stream = session.stream(id).context("stream")?;
        ensure!(Arc::ptr_eq(stream.index().context("index")?, &index), "index must not be rebuilt");
        ensure!(stream.replayed_count() == 3);
        ensure!(connector.connections() == 2);
        std::fs::remove_file(stream.path().context("path")?)?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn restart_while_running_stops_first() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        let mut session = session(&connector);
        let file = log(&[0.0, 60.0]);
        session.register(registration(&file))?;
        session.load()?;

        session.play().await?;
        session.pause()?;
        session.restart().await?;
        ensure!(session.status() == SessionStatus::Started);
        ensure!(connector.open_transports() == 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        ensure!(!session.progress().paused);
        session.reset().await?;
        ensure!(connector.open_transports() == 0);
        Ok(())
    }

    #[tokio::test]
    async fn connector_failure_keeps_the_session_loaded() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        connector.refuse_next_connections(1);
        let mut session = session(&connector);
        let file = log(&[0.0, 0.001]);
        session.register(registration(&file))?;
        session.load()?;

        let err = session.play().await.err().context("connect should fail")?;
        ensure!(matches!(err, ReplayError::Transport { .. }));
        ensure!(session.status() == SessionStatus::Loaded);

        session.play().await?;
        session.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn speed_must_be_positive() -> anyhow::Result<()> {
        let mut session = session(&RecordingConnector::new());
        for bad in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            ensure!(matches!(session.set_speed(bad), Err(ReplayError::InvalidSpeed { .. })));
        }
        session.set_speed(3.0)?;
        ensure!(session.settings().speed.multiplier() == 3.0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn progress_updates_follow_the_replay() -> anyhow::Result<()> {
        let connector = RecordingConnector::new();
        let mut session = session(&connector);
        let file = log(&[0.0, 1.0, 2.0]);
        session.register(registration(&file))?;
        session.load()?;

        let mut updates = Box::pin(session.progress_updates(Duration::from_millis(250)));
        session.play().await?;

        let mut saw_finish = false;
        while let Ok(Some(progress)) = tokio::time::timeout(Duration::from_secs(5), updates.next()).await {
            ensure!(progress.percent >= 0.0 && progress.percent <= 100.0);
            if progress.finished {
                saw_finish = true;
                break;
            }
        }
        ensure!(saw_finish, "final progress should be published");
        Ok(())
    }
}
