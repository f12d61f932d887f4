use super::{
    EngineEvent, EngineEventSender, EngineKind, LoadTicket, PlaybackEngine, balance_to_volume,
    emit, probe_duration_ms,
};
use crate::error::{ErrorCode, PlayerError, Result};
use std::path::Path;
use std::time::{Duration, Instant};

/// Silent engine driven by the wall clock. Used when no output device is available and
/// for `--silent` runs. Tracks of unknown length never complete on their own.
pub struct NullEngine {
    events: EngineEventSender,
    ticket: Option<LoadTicket>,
    playing: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    completed: bool,
    volume: f32,
}

impl NullEngine {
    pub fn new(events: EngineEventSender) -> Self {
        Self {
            events,
            ticket: None,
            playing: false,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            completed: false,
            volume: 1.0,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if self.playing
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        match self.track_duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn reset(&mut self) {
        self.ticket = None;
        self.playing = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
        self.completed = false;
    }
}

impl PlaybackEngine for NullEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Null
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn load(&mut self, source: &Path, ticket: LoadTicket) {
        self.reset();
        if !source.exists() {
            emit(&self.events, EngineEvent::error(ticket, ErrorCode::SourceMissing));
            return;
        }

        self.ticket = Some(ticket);
        self.track_duration = probe_duration_ms(source)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let duration_ms = self.duration_ms();
        emit(&self.events, EngineEvent::prepared(ticket, duration_ms));
    }

    fn play(&mut self) {
        if self.ticket.is_none() || self.playing {
            return;
        }
        self.started_at = Some(Instant::now());
        self.playing = true;
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.playing = false;
    }

    fn stop(&mut self) {
        self.reset();
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        if self.ticket.is_none() {
            return Err(PlayerError::Seek(String::from("no active source")));
        }

        let position = Duration::from_millis(position_ms);
        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = self.playing.then(Instant::now);
        self.completed = false;
        Ok(())
    }

    fn release(&mut self) {
        self.reset();
    }

    fn position_ms(&self) -> u64 {
        if self.ticket.is_none() {
            return 0;
        }
        self.current_position().as_millis() as u64
    }

    fn duration_ms(&self) -> u64 {
        self.track_duration
            .map_or(0, |duration| duration.as_millis() as u64)
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        self.volume = balance_to_volume(left, right);
    }

    fn tick(&mut self) {
        let (Some(ticket), Some(duration)) = (self.ticket, self.track_duration) else {
            return;
        };
        if self.completed || !self.playing || self.current_position() < duration {
            return;
        }
        self.completed = true;
        self.pause();
        emit(&self.events, EngineEvent::completed(ticket));
    }
}
