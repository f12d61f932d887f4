use super::{
    EngineEvent, EngineEventSender, EngineKind, LoadTicket, PlaybackEngine, balance_to_volume,
    emit, output,
};
use crate::error::{ErrorCode, PlayerError, Result};
use rodio::{OutputStream, Sink, Source};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

const NO_LOAD: u64 = 0;

pub struct OpenedSource<S> {
    pub source: S,
    pub duration_ms: u64,
}

/// Turns a path into a rodio source. Runs on a loader thread.
pub trait SourceOpener: Send + Sync + 'static {
    type Source: Source + Send + 'static;

    fn open(&self, path: &Path) -> std::result::Result<OpenedSource<Self::Source>, ErrorCode>;
}

#[derive(Default)]
struct LoadState {
    ready: AtomicBool,
    duration_ms: AtomicU64,
}

struct ActiveLoad {
    sink: Arc<Sink>,
    state: Arc<LoadState>,
    completed: bool,
}

/// rodio-backed engine. Every load gets a fresh `Sink`, so no reset is needed between
/// tracks; the decoder is opened off-thread and appended once ready.
pub struct SinkEngine<O: SourceOpener> {
    kind: EngineKind,
    opener: Arc<O>,
    events: EngineEventSender,
    stream: Option<OutputStream>,
    active: Option<ActiveLoad>,
    latest: Arc<AtomicU64>,
    volume: f32,
}

impl<O: SourceOpener> SinkEngine<O> {
    pub(super) fn with_opener(kind: EngineKind, opener: O, events: EngineEventSender) -> Self {
        Self {
            kind,
            opener: Arc::new(opener),
            events,
            stream: None,
            active: None,
            latest: Arc::new(AtomicU64::new(NO_LOAD)),
            volume: 1.0,
        }
    }

    fn discard_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.sink.stop();
        }
    }

    fn spawn_loader(&self, path: PathBuf, ticket: LoadTicket, sink: Arc<Sink>, state: Arc<LoadState>) {
        let opener = Arc::clone(&self.opener);
        let latest = Arc::clone(&self.latest);
        let events = self.events.clone();
        let kind = self.kind;

        let spawned = thread::Builder::new()
            .name(format!("tuneplay-{kind}-load"))
            .spawn(move || {
                let opened = opener.open(&path);
                if latest.load(Ordering::SeqCst) != ticket.0 {
                    tracing::trace!(ticket = ticket.0, "load superseded, dropping result");
                    return;
                }

                match opened {
                    Ok(OpenedSource {
                        source,
                        duration_ms,
                    }) => {
                        state.duration_ms.store(duration_ms, Ordering::SeqCst);
                        sink.append(source);
                        state.ready.store(true, Ordering::SeqCst);
                        emit(&events, EngineEvent::prepared(ticket, duration_ms));
                    }
                    Err(code) => {
                        tracing::debug!(engine = %kind, path = %path.display(), code = code.code(), "load failed");
                        emit(&events, EngineEvent::error(ticket, code));
                    }
                }
            });

        if let Err(err) = spawned {
            tracing::warn!(engine = %kind, "failed to spawn loader thread: {err}");
            emit(&self.events, EngineEvent::error(ticket, ErrorCode::Io));
        }
    }
}

impl<O: SourceOpener> PlaybackEngine for SinkEngine<O> {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn initialize(&mut self) -> Result<()> {
        if self.stream.is_none() {
            let stream = output::open_output_stream()
                .map_err(|err| PlayerError::EngineInit(format!("{err:#}")))?;
            self.stream = Some(stream);
        }
        Ok(())
    }

    fn load(&mut self, source: &Path, ticket: LoadTicket) {
        self.discard_active();
        self.latest.store(ticket.0, Ordering::SeqCst);

        let Some(stream) = self.stream.as_ref() else {
            emit(&self.events, EngineEvent::error(ticket, ErrorCode::Device));
            return;
        };

        let sink = Arc::new(Sink::connect_new(stream.mixer()));
        sink.pause();
        sink.set_volume(self.volume);
        let state = Arc::new(LoadState::default());
        self.active = Some(ActiveLoad {
            sink: Arc::clone(&sink),
            state: Arc::clone(&state),
            completed: false,
        });

        self.spawn_loader(source.to_path_buf(), ticket, sink, state);
    }

    fn play(&mut self) {
        if let Some(active) = &self.active {
            active.sink.play();
        }
    }

    fn pause(&mut self) {
        if let Some(active) = &self.active {
            active.sink.pause();
        }
    }

    fn stop(&mut self) {
        self.latest.store(NO_LOAD, Ordering::SeqCst);
        self.discard_active();
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        let Some(active) = &self.active else {
            return Err(PlayerError::Seek(String::from("no active source")));
        };
        if !active.state.ready.load(Ordering::SeqCst) {
            return Err(PlayerError::Seek(String::from("source still loading")));
        }
        active
            .sink
            .try_seek(Duration::from_millis(position_ms))
            .map_err(|err| PlayerError::Seek(format!("{err:?}")))
    }

    fn release(&mut self) {
        self.stop();
        self.stream = None;
    }

    fn position_ms(&self) -> u64 {
        self.active
            .as_ref()
            .map_or(0, |active| active.sink.get_pos().as_millis() as u64)
    }

    fn duration_ms(&self) -> u64 {
        self.active
            .as_ref()
            .map_or(0, |active| active.state.duration_ms.load(Ordering::SeqCst))
    }

    fn is_playing(&self) -> bool {
        self.active.as_ref().is_some_and(|active| {
            active.state.ready.load(Ordering::SeqCst)
                && !active.sink.is_paused()
                && !active.sink.empty()
        })
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        self.volume = balance_to_volume(left, right);
        if let Some(active) = &self.active {
            active.sink.set_volume(self.volume);
        }
    }

    fn tick(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.completed || !active.state.ready.load(Ordering::SeqCst) {
            return;
        }
        if !active.sink.is_paused() && active.sink.empty() {
            active.completed = true;
            let ticket = LoadTicket(self.latest.load(Ordering::SeqCst));
            emit(&self.events, EngineEvent::completed(ticket));
        }
    }
}

pub(super) fn millis(duration: Option<Duration>) -> u64 {
    duration.map_or(0, |duration| duration.as_millis() as u64)
}
