#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tuneplay::config::PlayerSettings;
use tuneplay::controller::PlaybackController;
use tuneplay::engine::{
    EngineEvent, EngineEventReceiver, EngineEventSender, EngineFactory, EngineKind, LoadTicket,
    PlaybackEngine, event_channel,
};
use tuneplay::error::{ErrorCode, Result};
use tuneplay::model::Track;
use tuneplay::subscriber::{PlayerEvent, Subscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Prepared(u64),
    Fail(ErrorCode),
    /// Never calls back.
    Silent,
}

/// What every scripted engine answers, and a log of what it was asked to do.
#[derive(Debug, Default)]
pub struct Script {
    outcomes: HashMap<PathBuf, Outcome>,
    per_kind: HashMap<(EngineKind, PathBuf), Outcome>,
    pub created: Vec<EngineKind>,
    pub loads: Vec<(EngineKind, PathBuf, LoadTicket)>,
    pub seeks: Vec<u64>,
    pub released: usize,
}

impl Script {
    pub fn outcome(&self, kind: EngineKind, path: &Path) -> Outcome {
        self.per_kind
            .get(&(kind, path.to_path_buf()))
            .or_else(|| self.outcomes.get(path))
            .copied()
            .unwrap_or(Outcome::Prepared(180_000))
    }
}

pub type SharedScript = Arc<Mutex<Script>>;

pub fn script() -> SharedScript {
    Arc::new(Mutex::new(Script::default()))
}

pub fn set_outcome(script: &SharedScript, path: &str, outcome: Outcome) {
    script
        .lock()
        .expect("lock")
        .outcomes
        .insert(PathBuf::from(path), outcome);
}

pub fn set_outcome_for(script: &SharedScript, kind: EngineKind, path: &str, outcome: Outcome) {
    script
        .lock()
        .expect("lock")
        .per_kind
        .insert((kind, PathBuf::from(path)), outcome);
}

pub struct ScriptedEngine {
    kind: EngineKind,
    script: SharedScript,
    events: EngineEventSender,
    loaded: Option<LoadTicket>,
    playing: bool,
    position_ms: u64,
    duration_ms: u64,
}

impl PlaybackEngine for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn load(&mut self, source: &Path, ticket: LoadTicket) {
        self.loaded = Some(ticket);
        self.playing = false;
        self.position_ms = 0;
        self.duration_ms = 0;

        let outcome = {
            let mut script = self.script.lock().expect("lock");
            script.loads.push((self.kind, source.to_path_buf(), ticket));
            script.outcome(self.kind, source)
        };
        match outcome {
            Outcome::Prepared(duration_ms) => {
                self.duration_ms = duration_ms;
                let _ = self.events.send(EngineEvent::prepared(ticket, duration_ms));
            }
            Outcome::Fail(code) => {
                let _ = self.events.send(EngineEvent::error(ticket, code));
            }
            Outcome::Silent => {}
        }
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.loaded = None;
        self.position_ms = 0;
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.script.lock().expect("lock").seeks.push(position_ms);
        self.position_ms = position_ms;
        Ok(())
    }

    fn release(&mut self) {
        self.script.lock().expect("lock").released += 1;
        self.stop();
    }

    fn position_ms(&self) -> u64 {
        self.position_ms
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn set_volume(&mut self, _left: f32, _right: f32) {}
}

pub struct ScriptedFactory(pub SharedScript);

impl EngineFactory for ScriptedFactory {
    fn create(
        &mut self,
        kind: EngineKind,
        events: EngineEventSender,
    ) -> Result<Box<dyn PlaybackEngine>> {
        self.0.lock().expect("lock").created.push(kind);
        Ok(Box::new(ScriptedEngine {
            kind,
            script: Arc::clone(&self.0),
            events,
            loaded: None,
            playing: false,
            position_ms: 0,
            duration_ms: 0,
        }))
    }
}

/// Collects every event it is notified of.
#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<PlayerEvent>>>);

impl Recorder {
    pub fn events(&self) -> Vec<PlayerEvent> {
        self.0.lock().expect("lock").clone()
    }

    pub fn clear(&self) {
        self.0.lock().expect("lock").clear();
    }

    pub fn errors(&self) -> Vec<i32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PlayerEvent::Error { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn positions(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PlayerEvent::PositionChanged(ms) => Some(ms),
                _ => None,
            })
            .collect()
    }
}

impl Subscriber for Recorder {
    fn notify(&mut self, event: &PlayerEvent) {
        self.0.lock().expect("lock").push(event.clone());
    }
}

pub fn tracks(count: u64) -> Vec<Track> {
    (1..=count)
        .map(|id| Track::new(id, format!("track {id}"), format!("/music/{id}.mp3")))
        .collect()
}

pub struct Harness {
    pub controller: PlaybackController,
    pub events: EngineEventReceiver,
    pub script: SharedScript,
    pub recorder: Recorder,
}

impl Harness {
    pub fn new(settings: PlayerSettings, playlist: Vec<Track>) -> Self {
        let script = script();
        let (tx, events) = event_channel();
        let mut controller =
            PlaybackController::new(settings, Box::new(ScriptedFactory(Arc::clone(&script))), tx)
                .expect("controller");
        controller.set_playlist(playlist);
        let recorder = Recorder::default();
        controller.subscribe(Box::new(recorder.clone()));
        Self {
            controller,
            events,
            script,
            recorder,
        }
    }

    /// Feeds queued engine events to the controller until none are left.
    pub fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.controller.handle_engine_event(event);
        }
    }

    /// Runs whatever retry is scheduled, as if its delay had passed, then pumps.
    pub fn run_scheduled(&mut self) {
        self.controller
            .run_due(Instant::now() + Duration::from_secs(3_600));
        self.pump();
    }

    pub fn load_count(&self) -> usize {
        self.script.lock().expect("lock").loads.len()
    }

    pub fn current_id(&self) -> Option<u64> {
        self.controller.session().track.as_ref().map(|t| t.id.0)
    }
}
