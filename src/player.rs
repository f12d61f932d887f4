//! Player actor.
//!
//! The controller and its engine live on one dedicated thread running a current-thread
//! tokio runtime. Everything that can change playback state (commands, engine events,
//! progress ticks, scheduled retries) is funneled through that thread's `select!` loop,
//! so they are handled strictly one at a time.

use crate::config::PlayerSettings;
use crate::controller::PlaybackController;
use crate::engine::{EngineEventReceiver, EngineFactory, EngineKind, event_channel};
use crate::error::{PlayerError, Result};
use crate::focus::{FocusChange, FocusProvider};
use crate::lyrics::{LyricDocument, LyricStore};
use crate::model::{PlayMode, PlaybackState, SortOrder, Track};
use crate::subscriber::{Subscriber, SubscriberId};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};

type Reply<T = ()> = oneshot::Sender<Result<T>>;

enum Command {
    Play(Reply),
    Resume(Reply),
    Pause,
    Stop,
    Release,
    SeekTo(u64),
    Next(Reply),
    Previous(Reply),
    PlayAtIndex(usize, Reply),
    PlayTrack(Track, Reply),
    SetPlayMode(PlayMode),
    SetVolume(f32, f32),
    SetPlaylist(Vec<Track>),
    Add(Track),
    AddAll(Vec<Track>),
    Remove(usize, Reply<Track>),
    Clear,
    Sort(SortOrder),
    Search(String),
    ClearFilter,
    Focus(FocusChange),
    SaveLyrics(LyricDocument, oneshot::Sender<anyhow::Result<PathBuf>>),
    Subscribe(Box<dyn Subscriber>, oneshot::Sender<SubscriberId>),
    Unsubscribe(SubscriberId),
    Status(oneshot::Sender<PlayerStatus>),
    Shutdown,
}

/// Point-in-time view of the player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub track: Option<Track>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub mode: PlayMode,
    pub volume: f32,
    pub error_count: u32,
    pub engine: EngineKind,
}

/// Optional collaborators for [`Player::spawn`].
#[derive(Default)]
pub struct PlayerOptions {
    pub focus: Option<Box<dyn FocusProvider>>,
    pub lyric_store: Option<Box<dyn LyricStore>>,
    pub playlist: Vec<Track>,
}

/// Handle to the player thread. Dropping it shuts the thread down.
pub struct Player {
    commands: mpsc::UnboundedSender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Starts the player thread and waits until its engine is initialized.
    pub fn spawn<F>(settings: PlayerSettings, factory: F, options: PlayerOptions) -> Result<Self>
    where
        F: EngineFactory + Send + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let thread = thread::Builder::new()
            .name(String::from("tuneplay-player"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(PlayerError::EngineInit(format!(
                            "failed to start player runtime: {err}"
                        ))));
                        return;
                    }
                };

                let progress = settings.progress_interval();
                let (events_tx, events_rx) = event_channel();
                let controller =
                    match PlaybackController::new(settings, Box::new(factory), events_tx) {
                        Ok(controller) => controller,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                let controller = configure(controller, options);
                let _ = ready_tx.send(Ok(()));

                runtime.block_on(run(controller, command_rx, events_rx, progress));
            })
            .map_err(|err| PlayerError::EngineInit(format!("failed to spawn player thread: {err}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands,
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlayerError::Closed)
            }
        }
    }

    pub async fn play(&self) -> Result<()> {
        self.request(Command::Play).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await
    }

    pub async fn next(&self) -> Result<()> {
        self.request(Command::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.request(Command::Previous).await
    }

    pub async fn play_at_index(&self, index: usize) -> Result<()> {
        self.request(|reply| Command::PlayAtIndex(index, reply)).await
    }

    pub async fn play_track(&self, track: Track) -> Result<()> {
        self.request(|reply| Command::PlayTrack(track, reply)).await
    }

    pub async fn remove(&self, index: usize) -> Result<Track> {
        self.request(|reply| Command::Remove(index, reply)).await
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn release(&self) -> Result<()> {
        self.send(Command::Release)
    }

    pub fn seek_to(&self, position_ms: u64) -> Result<()> {
        self.send(Command::SeekTo(position_ms))
    }

    pub fn set_play_mode(&self, mode: PlayMode) -> Result<()> {
        self.send(Command::SetPlayMode(mode))
    }

    pub fn set_volume(&self, left: f32, right: f32) -> Result<()> {
        self.send(Command::SetVolume(left, right))
    }

    pub fn set_playlist(&self, tracks: Vec<Track>) -> Result<()> {
        self.send(Command::SetPlaylist(tracks))
    }

    pub fn add(&self, track: Track) -> Result<()> {
        self.send(Command::Add(track))
    }

    pub fn add_all(&self, tracks: Vec<Track>) -> Result<()> {
        self.send(Command::AddAll(tracks))
    }

    pub fn clear(&self) -> Result<()> {
        self.send(Command::Clear)
    }

    pub fn sort(&self, order: SortOrder) -> Result<()> {
        self.send(Command::Sort(order))
    }

    pub fn search(&self, keyword: impl Into<String>) -> Result<()> {
        self.send(Command::Search(keyword.into()))
    }

    pub fn clear_filter(&self) -> Result<()> {
        self.send(Command::ClearFilter)
    }

    /// Forwards a focus change reported by the platform.
    pub fn focus_changed(&self, change: FocusChange) -> Result<()> {
        self.send(Command::Focus(change))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> Result<()> {
        self.send(Command::Unsubscribe(id))
    }

    pub async fn subscribe(&self, subscriber: Box<dyn Subscriber>) -> Result<SubscriberId> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Subscribe(subscriber, tx))?;
        rx.await.map_err(|_| PlayerError::Closed)
    }

    pub async fn status(&self) -> Result<PlayerStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx))?;
        rx.await.map_err(|_| PlayerError::Closed)
    }

    pub async fn save_lyrics(&self, document: LyricDocument) -> anyhow::Result<PathBuf> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SaveLyrics(document, tx))?;
        rx.await.map_err(|_| PlayerError::Closed)?
    }

    /// Releases the engine and joins the player thread.
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| PlayerError::Closed)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| PlayerError::Closed)?
    }

    fn stop_thread(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if thread.join().is_err() {
            tracing::error!("player thread panicked");
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn configure(mut controller: PlaybackController, options: PlayerOptions) -> PlaybackController {
    if let Some(focus) = options.focus {
        controller = controller.with_focus(focus);
    }
    if let Some(store) = options.lyric_store {
        controller = controller.with_lyric_store(store);
    }
    if !options.playlist.is_empty() {
        controller.set_playlist(options.playlist);
    }
    controller
}

async fn run(
    mut controller: PlaybackController,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut engine_events: EngineEventReceiver,
    progress: Duration,
) {
    let mut ticker = time::interval(progress);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(engine = %controller.engine_kind(), "player loop started");

    loop {
        let deadline = controller.next_deadline();
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => apply(&mut controller, command),
            },
            Some(event) = engine_events.recv() => controller.handle_engine_event(event),
            _ = wait_until(deadline) => controller.run_due(std::time::Instant::now()),
            _ = ticker.tick(), if controller.is_polling() => controller.poll_progress(),
        }
    }

    controller.release();
    tracing::debug!("player loop stopped");
}

async fn wait_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn apply(controller: &mut PlaybackController, command: Command) {
    match command {
        Command::Play(reply) => reply_with(reply, controller.play()),
        Command::Resume(reply) => reply_with(reply, controller.resume()),
        Command::Pause => controller.pause(),
        Command::Stop => controller.stop(),
        Command::Release => controller.release(),
        Command::SeekTo(position) => controller.seek_to(position),
        Command::Next(reply) => reply_with(reply, controller.next()),
        Command::Previous(reply) => reply_with(reply, controller.previous()),
        Command::PlayAtIndex(index, reply) => reply_with(reply, controller.play_at_index(index)),
        Command::PlayTrack(track, reply) => reply_with(reply, controller.play_track(track)),
        Command::SetPlayMode(mode) => controller.set_play_mode(mode),
        Command::SetVolume(left, right) => controller.set_volume(left, right),
        Command::SetPlaylist(tracks) => controller.set_playlist(tracks),
        Command::Add(track) => controller.add(track),
        Command::AddAll(tracks) => controller.add_all(tracks),
        Command::Remove(index, reply) => reply_with(reply, controller.remove(index)),
        Command::Clear => controller.clear(),
        Command::Sort(order) => controller.sort(order),
        Command::Search(keyword) => controller.search(&keyword),
        Command::ClearFilter => controller.clear_filter(),
        Command::Focus(change) => controller.handle_focus_change(change),
        Command::SaveLyrics(document, reply) => {
            let _ = reply.send(controller.save_lyrics(document));
        }
        Command::Subscribe(subscriber, reply) => {
            let _ = reply.send(controller.subscribe(subscriber));
        }
        Command::Unsubscribe(id) => {
            controller.unsubscribe(id);
        }
        Command::Status(reply) => {
            let _ = reply.send(status_of(controller));
        }
        Command::Shutdown => {}
    }
}

fn reply_with<T>(reply: Reply<T>, result: Result<T>) {
    if let Err(err) = &result {
        tracing::debug!("command rejected: {err}");
    }
    let _ = reply.send(result);
}

fn status_of(controller: &PlaybackController) -> PlayerStatus {
    let session = controller.session();
    PlayerStatus {
        state: session.state,
        track: session.track.clone(),
        position_ms: controller.position_ms(),
        duration_ms: session.duration_ms,
        mode: controller.navigator().mode(),
        volume: controller.volume(),
        error_count: controller.error_count(),
        engine: controller.engine_kind(),
    }
}
