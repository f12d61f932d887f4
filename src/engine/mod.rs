//! Playback backends.
//!
//! Every backend implements [`PlaybackEngine`]. Engines are driven from the player's
//! actor thread; loading happens on helper threads that report back through an
//! [`EngineEventSender`]. Each load carries a [`LoadTicket`] so the controller can drop
//! events that belong to a superseded load.

mod buffered;
mod null;
mod output;
mod sink;
mod stream;

pub use buffered::{BufferedEngine, probe_duration_ms};
pub use null::NullEngine;
pub use stream::StreamEngine;

use crate::error::{ErrorCode, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::mpsc;

/// Volume ceiling accepted by the backends.
pub const MAX_VOLUME: f32 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LoadTicket(pub u64);

impl LoadTicket {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEventKind {
    /// The source is loaded and ready to play. `duration_ms` is 0 when unknown.
    Prepared { duration_ms: u64 },
    Completed,
    Error(ErrorCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineEvent {
    pub ticket: LoadTicket,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn prepared(ticket: LoadTicket, duration_ms: u64) -> Self {
        Self {
            ticket,
            kind: EngineEventKind::Prepared { duration_ms },
        }
    }

    pub fn completed(ticket: LoadTicket) -> Self {
        Self {
            ticket,
            kind: EngineEventKind::Completed,
        }
    }

    pub fn error(ticket: LoadTicket, code: ErrorCode) -> Self {
        Self {
            ticket,
            kind: EngineEventKind::Error(code),
        }
    }
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

pub fn event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

/// Sends an event, ignoring a closed channel (the player is shutting down).
pub(crate) fn emit(events: &EngineEventSender, event: EngineEvent) {
    if events.send(event).is_err() {
        tracing::trace!(?event, "engine event dropped, player gone");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EngineKind {
    /// rodio decoder streaming straight from the file.
    #[default]
    Stream,
    /// Whole file read into memory and decoded with an extension hint.
    Buffered,
    /// Silent wall-clock engine.
    Null,
}

impl EngineKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Buffered => "buffered",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Capability set over a native playback backend.
///
/// Contract:
/// - a new `load` supersedes any load still in flight; only the latest ticket may
///   produce `Prepared`, `Completed` or `Error` events,
/// - `duration_ms` is 0 until the source is prepared or when the backend cannot tell,
/// - `release` is idempotent and legal in every state.
pub trait PlaybackEngine {
    fn kind(&self) -> EngineKind;
    fn initialize(&mut self) -> Result<()>;
    fn load(&mut self, source: &Path, ticket: LoadTicket);
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn seek(&mut self, position_ms: u64) -> Result<()>;
    fn release(&mut self);
    fn position_ms(&self) -> u64;
    fn duration_ms(&self) -> u64;
    fn is_playing(&self) -> bool;
    fn set_volume(&mut self, left: f32, right: f32);

    /// Called from the progress loop; engines that detect end-of-stream by polling emit
    /// `Completed` from here.
    fn tick(&mut self) {}
}

/// Builds engines, including the alternate used for failover.
pub trait EngineFactory {
    fn create(
        &mut self,
        kind: EngineKind,
        events: EngineEventSender,
    ) -> Result<Box<dyn PlaybackEngine>>;

    fn alternate(&self, kind: EngineKind) -> Option<EngineKind> {
        match kind {
            EngineKind::Stream => Some(EngineKind::Buffered),
            EngineKind::Buffered => Some(EngineKind::Stream),
            EngineKind::Null => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEngineFactory;

impl EngineFactory for DefaultEngineFactory {
    fn create(
        &mut self,
        kind: EngineKind,
        events: EngineEventSender,
    ) -> Result<Box<dyn PlaybackEngine>> {
        let engine: Box<dyn PlaybackEngine> = match kind {
            EngineKind::Stream => Box::new(StreamEngine::new(events)),
            EngineKind::Buffered => Box::new(BufferedEngine::new(events)),
            EngineKind::Null => Box::new(NullEngine::new(events)),
        };
        Ok(engine)
    }
}

pub(crate) fn balance_to_volume(left: f32, right: f32) -> f32 {
    ((left + right) / 2.0).clamp(0.0, MAX_VOLUME)
}

pub(crate) fn decoder_error_code(err: &rodio::decoder::DecoderError) -> ErrorCode {
    match err {
        rodio::decoder::DecoderError::UnrecognizedFormat => ErrorCode::Unsupported,
        _ => ErrorCode::Decode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_kinds_pair_up() {
        let factory = DefaultEngineFactory;
        assert_eq!(
            factory.alternate(EngineKind::Stream),
            Some(EngineKind::Buffered)
        );
        assert_eq!(
            factory.alternate(EngineKind::Buffered),
            Some(EngineKind::Stream)
        );
        assert_eq!(factory.alternate(EngineKind::Null), None);
    }

    #[test]
    fn balance_averages_and_clamps() {
        assert_eq!(balance_to_volume(0.25, 0.75), 0.5);
        assert_eq!(balance_to_volume(9.0, 9.0), MAX_VOLUME);
        assert_eq!(balance_to_volume(-1.0, 0.0), 0.0);
    }

    #[test]
    fn emit_tolerates_closed_channel() {
        let (tx, rx) = event_channel();
        drop(rx);
        emit(&tx, EngineEvent::completed(LoadTicket(1)));
    }
}
