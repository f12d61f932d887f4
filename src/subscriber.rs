use crate::lyrics::LyricDocument;
use crate::model::{PlayMode, PlaybackState, Track};
use crate::playlist::PlaylistSnapshot;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Notification emitted by the controller. Each subscriber sees events in the order they
/// were produced.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    StateChanged(PlaybackState),
    PositionChanged(u64),
    TrackChanged(Option<Track>),
    PlaylistChanged(PlaylistSnapshot),
    DurationChanged(u64),
    Error { code: i32, message: String },
    PlayModeChanged(PlayMode),
    LyricsChanged(Option<Arc<LyricDocument>>),
    LyricLineChanged { index: usize, text: String },
}

/// Observer of playback. Override the callbacks of interest; `notify` routes events to
/// them.
pub trait Subscriber: Send {
    fn on_state_changed(&mut self, _state: PlaybackState) {}
    fn on_position_changed(&mut self, _position_ms: u64) {}
    fn on_track_changed(&mut self, _track: Option<&Track>) {}
    fn on_playlist_changed(&mut self, _playlist: &PlaylistSnapshot) {}
    fn on_duration_changed(&mut self, _duration_ms: u64) {}
    fn on_error(&mut self, _code: i32, _message: &str) {}
    fn on_play_mode_changed(&mut self, _mode: PlayMode) {}
    fn on_lyrics_changed(&mut self, _lyrics: Option<&LyricDocument>) {}
    fn on_lyric_line_changed(&mut self, _index: usize, _text: &str) {}

    /// A closed subscriber is dropped at the next publish.
    fn is_closed(&self) -> bool {
        false
    }

    fn notify(&mut self, event: &PlayerEvent) {
        match event {
            PlayerEvent::StateChanged(state) => self.on_state_changed(*state),
            PlayerEvent::PositionChanged(ms) => self.on_position_changed(*ms),
            PlayerEvent::TrackChanged(track) => self.on_track_changed(track.as_ref()),
            PlayerEvent::PlaylistChanged(snapshot) => self.on_playlist_changed(snapshot),
            PlayerEvent::DurationChanged(ms) => self.on_duration_changed(*ms),
            PlayerEvent::Error { code, message } => self.on_error(*code, message),
            PlayerEvent::PlayModeChanged(mode) => self.on_play_mode_changed(*mode),
            PlayerEvent::LyricsChanged(doc) => self.on_lyrics_changed(doc.as_deref()),
            PlayerEvent::LyricLineChanged { index, text } => {
                self.on_lyric_line_changed(*index, text)
            }
        }
    }
}

/// Forwards every event into a tokio channel, for async consumers.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<PlayerEvent>,
}

impl ChannelSubscriber {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn notify(&mut self, event: &PlayerEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
pub struct SubscriberSet {
    next_id: u64,
    entries: Vec<(SubscriberId, Box<dyn Subscriber>)>,
}

impl SubscriberSet {
    pub fn add(&mut self, subscriber: Box<dyn Subscriber>) -> SubscriberId {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.entries.push((id, subscriber));
        id
    }

    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn publish(&mut self, event: PlayerEvent) {
        self.entries.retain(|(_, subscriber)| !subscriber.is_closed());
        for (_, subscriber) in &mut self.entries {
            subscriber.notify(&event);
        }
    }
}
