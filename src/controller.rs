//! Playback state machine.
//!
//! `PlaybackController` is single-threaded and fully synchronous: the player actor feeds
//! it commands, engine events, progress ticks and due retries one at a time. Engine
//! events carry the `LoadTicket` of the load that produced them; anything from an older
//! load is ignored, so a `stop` or a new track makes in-flight callbacks harmless.

use crate::catalog::TrackCatalog;
use crate::config::PlayerSettings;
use crate::engine::{
    EngineEvent, EngineEventKind, EngineEventSender, EngineFactory, EngineKind, LoadTicket,
    PlaybackEngine, balance_to_volume,
};
use crate::error::{ErrorCode, PlayerError, Result};
use crate::focus::{AlwaysGranted, AudioFocusArbiter, FocusChange, FocusControl, FocusProvider};
use crate::lyrics::{LyricDocument, LyricStore, LyricsIndex};
use crate::model::{PlayMode, PlaybackState, SortOrder, Track, TrackId};
use crate::playlist::PlaylistNavigator;
use crate::subscriber::{PlayerEvent, Subscriber, SubscriberId, SubscriberSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The track being played and where playback is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
    pub track: Option<Track>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub state: PlaybackState,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            track: None,
            position_ms: 0,
            duration_ms: 0,
            state: PlaybackState::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    /// Move past a track that failed.
    Skip,
    /// Re-prepare a track on the alternate engine.
    Failover(Track),
}

#[derive(Debug, Clone)]
struct Scheduled {
    due: Instant,
    action: PendingAction,
}

pub struct PlaybackController {
    settings: PlayerSettings,
    factory: Box<dyn EngineFactory>,
    events: EngineEventSender,
    engine: Option<Box<dyn PlaybackEngine>>,
    engine_kind: EngineKind,
    navigator: PlaylistNavigator,
    session: PlaybackSession,
    ticket: LoadTicket,
    autoplay: bool,
    pending_seek: Option<u64>,
    polling: bool,
    error_count: u32,
    failover_track: Option<TrackId>,
    pending: Option<Scheduled>,
    subscribers: SubscriberSet,
    focus: Box<dyn FocusProvider>,
    has_focus: bool,
    arbiter: AudioFocusArbiter,
    volume: f32,
    lyric_store: Option<Box<dyn LyricStore>>,
    lyrics: Option<LyricsIndex>,
    lyric_line: Option<usize>,
}

impl PlaybackController {
    /// Builds and initializes the configured primary engine.
    pub fn new(
        settings: PlayerSettings,
        factory: Box<dyn EngineFactory>,
        events: EngineEventSender,
    ) -> Result<Self> {
        let mut navigator = PlaylistNavigator::new(settings.history_capacity);
        navigator.set_mode(settings.play_mode);

        let mut controller = Self {
            engine_kind: settings.primary_engine,
            arbiter: AudioFocusArbiter::new(settings.duck_volume),
            volume: settings.volume,
            settings,
            factory,
            events,
            engine: None,
            navigator,
            session: PlaybackSession::default(),
            ticket: LoadTicket::default(),
            autoplay: false,
            pending_seek: None,
            polling: false,
            error_count: 0,
            failover_track: None,
            pending: None,
            subscribers: SubscriberSet::default(),
            focus: Box::new(AlwaysGranted),
            has_focus: false,
            lyric_store: None,
            lyrics: None,
            lyric_line: None,
        };
        controller.switch_engine(controller.engine_kind)?;
        Ok(controller)
    }

    pub fn with_focus(mut self, focus: Box<dyn FocusProvider>) -> Self {
        self.focus = focus;
        self
    }

    pub fn with_lyric_store(mut self, store: Box<dyn LyricStore>) -> Self {
        self.lyric_store = Some(store);
        self
    }

    /// Replaces the navigator, e.g. with a seeded one. Its mode is kept.
    pub fn with_navigator(mut self, navigator: PlaylistNavigator) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn Subscriber>) -> SubscriberId {
        self.subscribers.add(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn navigator(&self) -> &PlaylistNavigator {
        &self.navigator
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine_kind
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn current_ticket(&self) -> LoadTicket {
        self.ticket
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn lyrics(&self) -> Option<&LyricsIndex> {
        self.lyrics.as_ref()
    }

    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.pending.as_ref().map(|scheduled| &scheduled.action)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|scheduled| scheduled.due)
    }

    /// Live position while a source is loaded, otherwise the last known one.
    pub fn position_ms(&self) -> u64 {
        match (&self.engine, self.session.state.has_source()) {
            (Some(engine), true) => self.clamp_position(engine.position_ms()),
            _ => self.session.position_ms,
        }
    }

    // ---- transport -------------------------------------------------------------------

    /// Loads `track` and, when `autoplay` is set, starts it once the engine reports it
    /// prepared. Cancels any scheduled retry. Does not touch the navigator.
    pub fn prepare_and_play(&mut self, track: Track, autoplay: bool) {
        self.cancel_pending();
        self.stop_progress();

        if let Err(err) = self.ensure_engine() {
            self.fail_terminal(err.code(), &err.to_string());
            return;
        }

        self.ticket = self.ticket.next();
        self.autoplay = autoplay;
        self.pending_seek = None;

        let track_changed = self.session.track.as_ref().map(|t| t.id) != Some(track.id);
        if track_changed && self.failover_track != Some(track.id) {
            self.failover_track = None;
        }
        self.session.track = Some(track.clone());
        self.session.position_ms = 0;
        self.session.duration_ms = 0;
        self.set_state(PlaybackState::Preparing);

        if track_changed {
            tracing::info!(track = %track.id, title = %track.title, "track changed");
            self.subscribers
                .publish(PlayerEvent::TrackChanged(Some(track.clone())));
            self.load_lyrics(&track);
        }

        if let Some(engine) = self.engine.as_mut() {
            tracing::debug!(ticket = self.ticket.0, path = %track.source.display(), "loading");
            engine.load(&track.source, self.ticket);
        }
    }

    /// User play: resumes, or (re)prepares the current track, or the first one.
    /// Resets the error counter.
    pub fn play(&mut self) -> Result<()> {
        match self.session.state {
            PlaybackState::Playing => {
                self.error_count = 0;
                Ok(())
            }
            PlaybackState::Prepared | PlaybackState::Paused => {
                self.acquire_focus()?;
                self.error_count = 0;
                self.start_playback();
                Ok(())
            }
            PlaybackState::Preparing => {
                self.acquire_focus()?;
                self.error_count = 0;
                self.autoplay = true;
                Ok(())
            }
            PlaybackState::Idle
            | PlaybackState::Stopped
            | PlaybackState::Completed
            | PlaybackState::Error => {
                if self.navigator.is_empty() {
                    return Err(PlayerError::EmptyPlaylist);
                }
                self.acquire_focus()?;
                self.error_count = 0;
                let track = match self.navigator.current_track() {
                    Some(track) => track.clone(),
                    None => self
                        .navigator
                        .set_current_index(0)
                        .cloned()
                        .ok_or(PlayerError::EmptyPlaylist)?,
                };
                self.prepare_and_play(track, true);
                Ok(())
            }
        }
    }

    /// Continues a paused or prepared session; a no-op otherwise.
    pub fn resume(&mut self) -> Result<()> {
        if matches!(
            self.session.state,
            PlaybackState::Paused | PlaybackState::Prepared
        ) {
            self.acquire_focus()?;
            self.start_playback();
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        match self.session.state {
            PlaybackState::Playing => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.pause();
                }
                self.session.position_ms = self.position_ms();
                self.stop_progress();
                self.set_state(PlaybackState::Paused);
            }
            PlaybackState::Preparing => self.autoplay = false,
            _ => {}
        }
    }

    /// Stops output and cancels any retry or failover that is waiting to run.
    pub fn stop(&mut self) {
        self.cancel_pending();
        self.stop_progress();
        self.autoplay = false;
        self.pending_seek = None;
        self.ticket = self.ticket.next();
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
        if self.session.position_ms != 0 {
            self.session.position_ms = 0;
            self.subscribers.publish(PlayerEvent::PositionChanged(0));
        }
        self.set_state(PlaybackState::Stopped);
    }

    /// Stops and drops the engine. Safe to call repeatedly; a later play builds a new
    /// engine of the current kind.
    pub fn release(&mut self) {
        self.stop();
        if let Some(mut engine) = self.engine.take() {
            engine.release();
            tracing::debug!(engine = %self.engine_kind, "engine released");
        }
        if self.has_focus {
            self.focus.abandon();
            self.has_focus = false;
        }
        self.session.duration_ms = 0;
        self.set_state(PlaybackState::Idle);
    }

    /// Always publishes the new position immediately. The engine only hears about it
    /// once a source is loaded; a seek while preparing is applied on `Prepared`.
    pub fn seek_to(&mut self, position_ms: u64) {
        let position = self.clamp_position(position_ms);
        self.session.position_ms = position;
        self.subscribers
            .publish(PlayerEvent::PositionChanged(position));
        self.sync_lyrics(position);

        if self.session.state == PlaybackState::Preparing {
            self.pending_seek = Some(position);
            return;
        }
        if !self.session.state.has_source() {
            return;
        }
        if let Some(engine) = self.engine.as_mut()
            && let Err(err) = engine.seek(position)
        {
            tracing::warn!(position, "seek rejected: {err}");
        }
    }

    pub fn next(&mut self) -> Result<()> {
        if self.navigator.is_empty() {
            return Err(PlayerError::EmptyPlaylist);
        }
        self.acquire_focus()?;
        let track = self
            .navigator
            .move_to_next()
            .cloned()
            .ok_or(PlayerError::EmptyPlaylist)?;
        self.prepare_and_play(track, true);
        Ok(())
    }

    /// In SingleLoop, past the restart threshold, "previous" rewinds the current track.
    pub fn previous(&mut self) -> Result<()> {
        if self.navigator.mode() == PlayMode::SingleLoop
            && self.session.track.is_some()
            && self.position_ms() > self.settings.single_loop_restart_ms
        {
            self.seek_to(0);
            return Ok(());
        }

        if self.navigator.is_empty() {
            return Err(PlayerError::EmptyPlaylist);
        }
        self.acquire_focus()?;
        let track = self
            .navigator
            .move_to_previous()
            .cloned()
            .ok_or(PlayerError::EmptyPlaylist)?;
        self.prepare_and_play(track, true);
        Ok(())
    }

    pub fn play_at_index(&mut self, index: usize) -> Result<()> {
        let len = self.navigator.len();
        if index >= len {
            return Err(PlayerError::IndexOutOfRange { index, len });
        }
        self.acquire_focus()?;
        self.error_count = 0;
        let track = self
            .navigator
            .set_current_index(index)
            .cloned()
            .ok_or(PlayerError::IndexOutOfRange { index, len })?;
        self.prepare_and_play(track, true);
        Ok(())
    }

    /// Plays a track, appending it to the playlist first when it is not already there.
    /// A filter that hides the track is cleared.
    pub fn play_track(&mut self, track: Track) -> Result<()> {
        self.acquire_focus()?;
        self.error_count = 0;

        let id = track.id;
        if self.navigator.position_of(id).is_none() {
            if !self.navigator.contains(id) {
                self.navigator.add(track);
            }
            if self.navigator.position_of(id).is_none() {
                self.navigator.clear_filter();
            }
            self.publish_playlist();
        }
        let len = self.navigator.len();
        let index = self
            .navigator
            .position_of(id)
            .ok_or(PlayerError::IndexOutOfRange { index: len, len })?;
        let track = self
            .navigator
            .set_current_index(index)
            .cloned()
            .ok_or(PlayerError::IndexOutOfRange { index, len })?;
        self.prepare_and_play(track, true);
        Ok(())
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        if self.navigator.mode() == mode {
            return;
        }
        self.navigator.set_mode(mode);
        tracing::debug!(?mode, "play mode changed");
        self.subscribers.publish(PlayerEvent::PlayModeChanged(mode));
    }

    pub fn cycle_play_mode(&mut self) -> PlayMode {
        let mode = self.navigator.mode().next();
        self.set_play_mode(mode);
        mode
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, left: f32, right: f32) {
        self.volume = balance_to_volume(left, right);
        if let Some(engine) = self.engine.as_mut() {
            engine.set_volume(left, right);
        }
    }

    pub fn handle_focus_change(&mut self, change: FocusChange) {
        match change {
            FocusChange::Gained => self.has_focus = true,
            FocusChange::LostPermanent => self.has_focus = false,
            FocusChange::LostTransient | FocusChange::LostTransientCanDuck => {}
        }
        let mut arbiter = self.arbiter.clone();
        arbiter.handle(change, self);
        self.arbiter = arbiter;
    }

    // ---- engine callbacks, ticks and timers -------------------------------------------

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        if event.ticket != self.ticket {
            tracing::trace!(
                ticket = event.ticket.0,
                current = self.ticket.0,
                "stale engine event ignored"
            );
            return;
        }

        match event.kind {
            EngineEventKind::Prepared { duration_ms } => self.on_prepared(duration_ms),
            EngineEventKind::Completed => self.on_completed(),
            EngineEventKind::Error(code) => self.on_engine_error(code),
        }
    }

    /// One progress sample. Only does work while polling, i.e. while `Playing`.
    pub fn poll_progress(&mut self) {
        if !self.polling || self.session.state != PlaybackState::Playing {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        engine.tick();
        let duration = engine.duration_ms();
        let raw_position = engine.position_ms();

        if duration > 0 && duration != self.session.duration_ms {
            self.session.duration_ms = duration;
            self.subscribers
                .publish(PlayerEvent::DurationChanged(duration));
        }

        let position = self.clamp_position(raw_position);
        self.session.position_ms = position;
        self.subscribers
            .publish(PlayerEvent::PositionChanged(position));
        self.sync_lyrics(position);
    }

    /// Runs the scheduled retry or failover if it is due at `now`.
    pub fn run_due(&mut self, now: Instant) {
        let Some(scheduled) = self.pending.take_if(|scheduled| scheduled.due <= now) else {
            return;
        };

        match scheduled.action {
            PendingAction::Skip => {
                let Some(track) = self.navigator.move_to_next().cloned() else {
                    tracing::debug!("nothing to skip to");
                    self.set_state(PlaybackState::Stopped);
                    return;
                };
                tracing::info!(track = %track.id, attempt = self.error_count, "skipping to next track after error");
                self.prepare_and_play(track, true);
            }
            PendingAction::Failover(track) => {
                tracing::info!(track = %track.id, engine = %self.engine_kind, "retrying on alternate engine");
                self.prepare_and_play(track, true);
            }
        }
    }

    fn on_prepared(&mut self, duration_ms: u64) {
        if self.session.state != PlaybackState::Preparing {
            return;
        }
        self.session.duration_ms = duration_ms;
        if duration_ms > 0 {
            self.subscribers
                .publish(PlayerEvent::DurationChanged(duration_ms));
        }
        self.set_state(PlaybackState::Prepared);

        if let Some(position) = self.pending_seek.take()
            && let Some(engine) = self.engine.as_mut()
            && let Err(err) = engine.seek(position)
        {
            tracing::warn!(position, "deferred seek rejected: {err}");
        }

        if std::mem::take(&mut self.autoplay) {
            self.start_playback();
        }
    }

    fn on_completed(&mut self) {
        if !matches!(
            self.session.state,
            PlaybackState::Playing | PlaybackState::Preparing
        ) {
            return;
        }
        self.stop_progress();
        if self.session.duration_ms > 0 {
            self.session.position_ms = self.session.duration_ms;
        }
        self.set_state(PlaybackState::Completed);

        match self.navigator.advance_after_completion().cloned() {
            Some(track) => self.prepare_and_play(track, true),
            None => tracing::debug!("playlist empty after completion"),
        }
    }

    /// Failover first (once per track, not counted), then the consecutive-error budget.
    fn on_engine_error(&mut self, code: ErrorCode) {
        self.stop_progress();
        let failed = self.session.track.clone();
        let error = match (&failed, self.session.state) {
            (Some(track), PlaybackState::Preparing) => PlayerError::Prepare {
                path: track.source.clone(),
                reason: code.into(),
            },
            _ => PlayerError::Playback(code),
        };
        tracing::warn!(
            code = code.code(),
            track = ?failed.as_ref().map(|t| t.id),
            engine = %self.engine_kind,
            "{error}"
        );

        if code == ErrorCode::Unsupported
            && let Some(track) = failed
            && self.failover_track != Some(track.id)
            && let Some(alternate) = self.factory.alternate(self.engine_kind)
        {
            self.failover_track = Some(track.id);
            self.set_state(PlaybackState::Error);
            match self.switch_engine(alternate) {
                Ok(()) => self.schedule(self.settings.failover_delay(), PendingAction::Failover(track)),
                Err(err) => self.fail_terminal(err.code(), &err.to_string()),
            }
            return;
        }

        self.error_count += 1;
        self.set_state(PlaybackState::Error);

        if self.error_count >= self.settings.max_consecutive_errors {
            let message = format!("{error} ({} consecutive errors)", self.error_count);
            self.fail_terminal(code.code(), &message);
        } else {
            self.schedule(self.settings.retry_delay(), PendingAction::Skip);
        }
    }

    /// Ends the session after an unrecoverable failure: `Error` then `Stopped`, current
    /// index cleared, counter reset, one `Error` notification.
    fn fail_terminal(&mut self, code: i32, message: &str) {
        tracing::error!(code, "{message}");
        self.cancel_pending();
        self.stop_progress();
        self.autoplay = false;
        self.ticket = self.ticket.next();
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
        self.set_state(PlaybackState::Error);
        self.set_state(PlaybackState::Stopped);

        self.navigator.clear_current();
        if self.session.track.take().is_some() {
            self.subscribers.publish(PlayerEvent::TrackChanged(None));
            self.clear_lyrics();
        }
        self.session.position_ms = 0;
        self.session.duration_ms = 0;
        self.error_count = 0;
        self.failover_track = None;
        self.subscribers.publish(PlayerEvent::Error {
            code,
            message: message.to_string(),
        });
    }

    // ---- playlist --------------------------------------------------------------------

    pub fn set_playlist(&mut self, tracks: Vec<Track>) {
        self.navigator.set_tracks(tracks);
        self.publish_playlist();
    }

    pub fn load_from_catalog(&mut self, catalog: &dyn TrackCatalog) {
        self.set_playlist(catalog.all());
    }

    pub fn add(&mut self, track: Track) {
        self.navigator.add(track);
        self.publish_playlist();
    }

    pub fn add_all(&mut self, tracks: Vec<Track>) {
        self.navigator.add_all(tracks);
        self.publish_playlist();
    }

    /// Removing the playing track stops playback; the selection moves per the
    /// navigator's clamping rule.
    pub fn remove(&mut self, index: usize) -> Result<Track> {
        let len = self.navigator.len();
        let was_current = self.navigator.current_index() == Some(index);
        let removed = self
            .navigator
            .remove(index)
            .ok_or(PlayerError::IndexOutOfRange { index, len })?;

        if was_current && self.session.track.as_ref().map(|t| t.id) == Some(removed.id) {
            self.stop();
            self.session.track = None;
            self.subscribers.publish(PlayerEvent::TrackChanged(None));
            self.clear_lyrics();
        }
        self.publish_playlist();
        Ok(removed)
    }

    pub fn clear(&mut self) {
        if self.session.track.is_some() {
            self.stop();
            self.session.track = None;
            self.subscribers.publish(PlayerEvent::TrackChanged(None));
            self.clear_lyrics();
        }
        self.navigator.clear();
        self.publish_playlist();
    }

    pub fn sort(&mut self, order: SortOrder) {
        self.navigator.sort(order);
        self.publish_playlist();
    }

    pub fn filter(&mut self, predicate: impl Fn(&Track) -> bool + Send + 'static) {
        self.navigator.filter(predicate);
        self.publish_playlist();
    }

    pub fn search(&mut self, keyword: &str) {
        self.navigator.search(keyword);
        self.publish_playlist();
    }

    pub fn clear_filter(&mut self) {
        self.navigator.clear_filter();
        self.publish_playlist();
    }

    fn publish_playlist(&mut self) {
        self.subscribers
            .publish(PlayerEvent::PlaylistChanged(self.navigator.snapshot()));
    }

    // ---- lyrics ----------------------------------------------------------------------

    /// Stores `document` for the current track and makes it the active lyrics.
    pub fn save_lyrics(&mut self, document: LyricDocument) -> anyhow::Result<PathBuf> {
        let track = self
            .session
            .track
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no current track"))?;
        let store = self
            .lyric_store
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no lyric store configured"))?;
        let path = store.save(&track, &document.to_lrc())?;

        self.install_lyrics(Some(document.for_track(track.id)));
        let position = self.position_ms();
        self.sync_lyrics(position);
        Ok(path)
    }

    fn load_lyrics(&mut self, track: &Track) {
        let raw = match self.lyric_store.as_ref().map(|store| store.load(track)) {
            Some(Ok(raw)) => raw,
            Some(Err(err)) => {
                tracing::warn!(track = %track.id, "failed to load lyrics: {err:#}");
                None
            }
            None => None,
        };
        let document = raw
            .map(|raw| LyricDocument::parse(&raw).for_track(track.id))
            .filter(|document| !document.is_empty());
        self.install_lyrics(document);
    }

    fn install_lyrics(&mut self, document: Option<LyricDocument>) {
        self.lyric_line = None;
        self.subscribers.publish(PlayerEvent::LyricsChanged(
            document.clone().map(Arc::new),
        ));
        self.lyrics = document.map(LyricsIndex::new);
    }

    fn clear_lyrics(&mut self) {
        if self.lyrics.is_some() {
            self.install_lyrics(None);
        }
    }

    fn sync_lyrics(&mut self, position_ms: u64) {
        let Some(index) = self.lyrics.as_mut() else {
            return;
        };
        let Some(line) = index.line_at(position_ms) else {
            return;
        };
        if self.lyric_line == Some(line) {
            return;
        }
        self.lyric_line = Some(line);
        let text = index
            .current_line()
            .map(|line| line.text.clone())
            .unwrap_or_default();
        self.subscribers
            .publish(PlayerEvent::LyricLineChanged { index: line, text });
    }

    // ---- internals -------------------------------------------------------------------

    fn start_playback(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        engine.play();
        self.set_state(PlaybackState::Playing);
        self.start_progress();
    }

    fn start_progress(&mut self) {
        if !self.polling {
            self.polling = true;
            tracing::trace!("progress polling started");
        }
    }

    fn stop_progress(&mut self) {
        if self.polling {
            self.polling = false;
            tracing::trace!("progress polling stopped");
        }
    }

    fn acquire_focus(&mut self) -> Result<()> {
        if self.has_focus {
            return Ok(());
        }
        if !self.focus.request() {
            tracing::info!("audio focus denied");
            return Err(PlayerError::FocusDenied);
        }
        self.has_focus = true;
        Ok(())
    }

    fn schedule(&mut self, delay: Duration, action: PendingAction) {
        tracing::debug!(?action, delay_ms = delay.as_millis() as u64, "scheduled");
        self.pending = Some(Scheduled {
            due: Instant::now() + delay,
            action,
        });
    }

    fn cancel_pending(&mut self) {
        if let Some(scheduled) = self.pending.take() {
            tracing::debug!(action = ?scheduled.action, "scheduled action cancelled");
        }
    }

    fn ensure_engine(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }
        self.switch_engine(self.engine_kind)
    }

    fn switch_engine(&mut self, kind: EngineKind) -> Result<()> {
        if let Some(mut old) = self.engine.take() {
            old.release();
        }
        let mut engine = self.factory.create(kind, self.events.clone())?;
        engine.initialize()?;
        engine.set_volume(self.volume, self.volume);
        tracing::info!(engine = %kind, "playback engine ready");
        self.engine = Some(engine);
        self.engine_kind = kind;
        Ok(())
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.session.state == state {
            return;
        }
        tracing::debug!(from = ?self.session.state, to = ?state, "state");
        self.session.state = state;
        self.subscribers.publish(PlayerEvent::StateChanged(state));
    }

    fn clamp_position(&self, position_ms: u64) -> u64 {
        match self.session.duration_ms {
            0 => position_ms,
            duration => position_ms.min(duration),
        }
    }
}

impl FocusControl for PlaybackController {
    fn playback_state(&self) -> PlaybackState {
        self.session.state
    }

    fn resume_after_focus(&mut self) {
        if matches!(
            self.session.state,
            PlaybackState::Paused | PlaybackState::Prepared
        ) {
            self.start_playback();
        }
    }

    fn pause(&mut self) {
        PlaybackController::pause(self);
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        PlaybackController::set_volume(self, left, right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineEventReceiver, event_channel};
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls {
        loads: Vec<(PathBuf, LoadTicket)>,
        seeks: Vec<u64>,
        plays: usize,
    }

    struct FakeEngine {
        kind: EngineKind,
        calls: Arc<Mutex<Calls>>,
        position_ms: u64,
    }

    impl PlaybackEngine for FakeEngine {
        fn kind(&self) -> EngineKind {
            self.kind
        }
        fn initialize(&mut self) -> Result<()> {
            Ok(())
        }
        fn load(&mut self, source: &Path, ticket: LoadTicket) {
            self.calls
                .lock()
                .expect("lock")
                .loads
                .push((source.to_path_buf(), ticket));
        }
        fn play(&mut self) {
            self.calls.lock().expect("lock").plays += 1;
        }
        fn pause(&mut self) {}
        fn stop(&mut self) {}
        fn seek(&mut self, position_ms: u64) -> Result<()> {
            self.calls.lock().expect("lock").seeks.push(position_ms);
            self.position_ms = position_ms;
            Ok(())
        }
        fn release(&mut self) {}
        fn position_ms(&self) -> u64 {
            self.position_ms
        }
        fn duration_ms(&self) -> u64 {
            0
        }
        fn is_playing(&self) -> bool {
            false
        }
        fn set_volume(&mut self, _left: f32, _right: f32) {}
    }

    struct FakeFactory(Arc<Mutex<Calls>>);

    impl EngineFactory for FakeFactory {
        fn create(
            &mut self,
            kind: EngineKind,
            _events: EngineEventSender,
        ) -> Result<Box<dyn PlaybackEngine>> {
            Ok(Box::new(FakeEngine {
                kind,
                calls: Arc::clone(&self.0),
                position_ms: 0,
            }))
        }
    }

    fn controller() -> (PlaybackController, Arc<Mutex<Calls>>, EngineEventReceiver) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let (tx, rx) = event_channel();
        let mut controller = PlaybackController::new(
            PlayerSettings::default(),
            Box::new(FakeFactory(Arc::clone(&calls))),
            tx,
        )
        .expect("controller");
        controller.set_playlist(vec![
            Track::new(1, "one", "/music/one.mp3"),
            Track::new(2, "two", "/music/two.mp3"),
        ]);
        (controller, calls, rx)
    }

    #[test]
    fn play_loads_first_track_and_starts_on_prepared() {
        let (mut controller, calls, _rx) = controller();
        controller.play().expect("play");
        assert_eq!(controller.state(), PlaybackState::Preparing);
        assert!(!controller.is_polling());

        let ticket = controller.current_ticket();
        controller.handle_engine_event(EngineEvent::prepared(ticket, 90_000));
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert!(controller.is_polling());
        assert_eq!(controller.session().duration_ms, 90_000);

        let calls = calls.lock().expect("lock");
        assert_eq!(calls.loads.len(), 1);
        assert_eq!(calls.loads[0].0, PathBuf::from("/music/one.mp3"));
        assert_eq!(calls.plays, 1);
    }

    #[test]
    fn events_from_superseded_loads_are_ignored() {
        let (mut controller, _calls, _rx) = controller();
        controller.play().expect("play");
        let stale = controller.current_ticket();
        controller.next().expect("next");

        controller.handle_engine_event(EngineEvent::prepared(stale, 1_000));
        controller.handle_engine_event(EngineEvent::error(stale, ErrorCode::Io));
        assert_eq!(controller.state(), PlaybackState::Preparing);
        assert_eq!(controller.error_count(), 0);
        assert_eq!(
            controller.session().track.as_ref().map(|t| t.id),
            Some(TrackId(2))
        );
    }

    #[test]
    fn seek_while_preparing_is_applied_once_prepared() {
        let (mut controller, calls, _rx) = controller();
        controller.play().expect("play");
        controller.seek_to(4_000);
        assert!(calls.lock().expect("lock").seeks.is_empty());

        controller.handle_engine_event(EngineEvent::prepared(controller.current_ticket(), 10_000));
        assert_eq!(calls.lock().expect("lock").seeks, vec![4_000]);
    }

    #[test]
    fn pause_while_preparing_cancels_autoplay() {
        let (mut controller, calls, _rx) = controller();
        controller.play().expect("play");
        controller.pause();
        controller.handle_engine_event(EngineEvent::prepared(controller.current_ticket(), 10_000));

        assert_eq!(controller.state(), PlaybackState::Prepared);
        assert_eq!(calls.lock().expect("lock").plays, 0);
        controller.resume().expect("resume");
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[test]
    fn release_is_idempotent_and_engine_is_rebuilt() {
        let (mut controller, calls, _rx) = controller();
        controller.release();
        controller.release();
        assert_eq!(controller.state(), PlaybackState::Idle);

        controller.play().expect("play after release");
        assert_eq!(calls.lock().expect("lock").loads.len(), 1);
    }

    #[test]
    fn unknown_index_is_rejected() {
        let (mut controller, _calls, _rx) = controller();
        assert!(matches!(
            controller.play_at_index(7),
            Err(PlayerError::IndexOutOfRange { index: 7, len: 2 })
        ));
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn empty_playlist_cannot_play() {
        let (mut controller, _calls, _rx) = controller();
        controller.clear();
        assert!(matches!(controller.play(), Err(PlayerError::EmptyPlaylist)));
    }
}
