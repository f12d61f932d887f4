use crate::model::{PlayMode, SortOrder, Track, TrackId};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

const SHUFFLE_REROLL_LIMIT: usize = 32;

/// Active narrowing of the visible list, re-applied to tracks added later.
pub type TrackFilter = Box<dyn Fn(&Track) -> bool + Send>;

/// Immutable view of the playlist handed to subscribers.
#[derive(Debug, Clone)]
pub struct PlaylistSnapshot {
    pub tracks: Arc<[Track]>,
    pub current_index: Option<usize>,
    pub mode: PlayMode,
    pub filtered: bool,
}

impl PlaylistSnapshot {
    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.current_index?)
    }
}

/// Ordered track list, current selection, play mode and navigation history.
///
/// `current` is `None` when nothing is selected; otherwise it always indexes into the
/// visible list. Every mutation re-derives it before returning.
pub struct PlaylistNavigator {
    all: Vec<Track>,
    tracks: Vec<Track>,
    filter: Option<TrackFilter>,
    current: Option<usize>,
    mode: PlayMode,
    history: VecDeque<usize>,
    history_capacity: usize,
    rng: SmallRng,
}

impl fmt::Debug for PlaylistNavigator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistNavigator")
            .field("all", &self.all.len())
            .field("tracks", &self.tracks.len())
            .field("filtered", &self.is_filtered())
            .field("current", &self.current)
            .field("mode", &self.mode)
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl Default for PlaylistNavigator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl PlaylistNavigator {
    pub fn new(history_capacity: usize) -> Self {
        Self::with_rng(history_capacity, SmallRng::from_os_rng())
    }

    /// Deterministic shuffle order, for tests and fuzzing.
    pub fn with_seed(history_capacity: usize, seed: u64) -> Self {
        Self::with_rng(history_capacity, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(history_capacity: usize, rng: SmallRng) -> Self {
        Self {
            all: Vec::new(),
            tracks: Vec::new(),
            filter: None,
            current: None,
            mode: PlayMode::default(),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.current?)
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn position_of(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|track| track.id == id)
    }

    /// Whether the full list holds `id`, visible or not.
    pub fn contains(&self, id: TrackId) -> bool {
        self.all.iter().any(|track| track.id == id)
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn snapshot(&self) -> PlaylistSnapshot {
        PlaylistSnapshot {
            tracks: Arc::from(self.tracks.clone()),
            current_index: self.current,
            mode: self.mode,
            filtered: self.is_filtered(),
        }
    }

    /// Index that follows the current one under `mode`.
    ///
    /// `Sequence` wraps to 0 after the last track rather than stopping. With no selection
    /// every mode starts from index 0 (shuffle still picks at random).
    pub fn next_index(&mut self, mode: PlayMode) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        let next = match (mode, self.current) {
            (PlayMode::Shuffle, _) => self.rng.random_range(0..len),
            (_, None) => 0,
            (PlayMode::SingleLoop, Some(current)) => current,
            (PlayMode::Loop, Some(current)) => (current + 1) % len,
            (PlayMode::Sequence, Some(current)) => {
                if current + 1 == len {
                    0
                } else {
                    current + 1
                }
            }
        };
        Some(next)
    }

    /// Index to go back to. Pops the history when it has entries, ignoring `mode`.
    pub fn previous_index(&mut self, mode: PlayMode) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        if let Some(index) = self.history.pop_back() {
            return Some(index);
        }

        let previous = match (mode, self.current) {
            (PlayMode::Shuffle, _) => self.rng.random_range(0..len),
            (PlayMode::SingleLoop, Some(current)) => current,
            (_, None) => len - 1,
            (PlayMode::Loop, Some(current)) => (current + len - 1) % len,
            (PlayMode::Sequence, Some(current)) => {
                if current == 0 {
                    len - 1
                } else {
                    current - 1
                }
            }
        };
        Some(previous)
    }

    /// User-requested "next". SingleLoop only governs automatic advance, so it moves
    /// like Loop here.
    pub fn move_to_next(&mut self) -> Option<&Track> {
        let mode = manual_mode(self.mode);
        let next = self.next_index(mode)?;
        self.push_current_to_history();
        self.current = Some(next);
        self.current_track()
    }

    /// User-requested "previous": history first, then the mode rule (SingleLoop as Loop).
    pub fn move_to_previous(&mut self) -> Option<&Track> {
        let mode = manual_mode(self.mode);
        let previous = self.previous_index(mode)?;
        self.current = Some(previous);
        self.current_track()
    }

    /// Automatic advance once a track finished playing.
    pub fn advance_after_completion(&mut self) -> Option<&Track> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        let next = match self.mode {
            PlayMode::SingleLoop => self.current.unwrap_or(0),
            PlayMode::Shuffle => self.shuffle_avoiding_current(len),
            mode => self.next_index(mode)?,
        };

        if self.current != Some(next) {
            self.push_current_to_history();
        }
        self.current = Some(next);
        self.current_track()
    }

    fn shuffle_avoiding_current(&mut self, len: usize) -> usize {
        let Some(current) = self.current.filter(|_| len > 1) else {
            return self.rng.random_range(0..len);
        };

        for _ in 0..SHUFFLE_REROLL_LIMIT {
            let candidate = self.rng.random_range(0..len);
            if candidate != current {
                return candidate;
            }
        }
        (current + 1) % len
    }

    pub fn set_current_index(&mut self, index: usize) -> Option<&Track> {
        if index >= self.tracks.len() {
            return None;
        }
        if self.current != Some(index) {
            self.push_current_to_history();
        }
        self.current = Some(index);
        self.current_track()
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    fn push_current_to_history(&mut self) {
        let Some(current) = self.current else {
            return;
        };
        if self.history_capacity == 0 {
            return;
        }
        while self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(current);
    }

    /// Appends to the full list. The track only becomes visible if it passes the active
    /// filter.
    pub fn add(&mut self, mut track: Track) {
        track.promote();
        if self.filter.as_ref().is_none_or(|keep| keep(&track)) {
            self.tracks.push(track.clone());
        }
        self.all.push(track);
    }

    pub fn add_all(&mut self, tracks: impl IntoIterator<Item = Track>) {
        for track in tracks {
            self.add(track);
        }
    }

    /// Replaces the whole list, keeping the current track selected if it is still present.
    pub fn set_tracks(&mut self, tracks: Vec<Track>) {
        let current_id = self.current_track().map(|track| track.id);
        self.all = tracks
            .into_iter()
            .map(|mut track| {
                track.promote();
                track
            })
            .collect();
        self.tracks = self.all.clone();
        self.filter = None;
        self.history.clear();
        self.current = current_id.and_then(|id| self.position_of(id));
    }

    pub fn remove(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }

        let removed = self.tracks.remove(index);
        if let Some(pos) = self.all.iter().position(|track| track.id == removed.id) {
            self.all.remove(pos);
        }

        let len = self.tracks.len();
        self.current = match self.current {
            Some(current) if current == index => {
                if len == 0 {
                    None
                } else {
                    Some(current.min(len - 1))
                }
            }
            Some(current) if index < current => Some(current - 1),
            other => other,
        };

        self.history.retain(|entry| *entry != index);
        for entry in self.history.iter_mut() {
            if *entry > index {
                *entry -= 1;
            }
        }

        Some(removed)
    }

    pub fn clear(&mut self) {
        self.all.clear();
        self.tracks.clear();
        self.filter = None;
        self.current = None;
        self.history.clear();
    }

    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&Track, &Track) -> Ordering,
    {
        self.relocate_after(|nav| {
            nav.tracks.sort_by(&mut compare);
            nav.all.sort_by(&mut compare);
        });
    }

    pub fn sort(&mut self, order: SortOrder) {
        self.sort_by(|a, b| compare_tracks(a, b, order));
    }

    /// Narrows the visible list to tracks matching `predicate`; the full list is kept.
    /// The predicate stays active for later `add` calls until `clear_filter`.
    pub fn filter<P>(&mut self, predicate: P)
    where
        P: Fn(&Track) -> bool + Send + 'static,
    {
        self.relocate_after(|nav| {
            nav.tracks = nav
                .all
                .iter()
                .filter(|track| predicate(track))
                .cloned()
                .collect();
            nav.filter = Some(Box::new(predicate));
        });
    }

    /// Case-insensitive substring match on title, artist and album. An empty keyword
    /// restores the full list.
    pub fn search(&mut self, keyword: &str) {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            self.clear_filter();
            return;
        }
        self.filter(move |track| track_matches(track, &keyword));
    }

    pub fn clear_filter(&mut self) {
        if self.filter.is_none() {
            return;
        }
        self.relocate_after(|nav| {
            nav.tracks = nav.all.clone();
            nav.filter = None;
        });
    }

    /// Runs a reordering mutation, then finds the current track and history entries again
    /// by identity.
    fn relocate_after(&mut self, mutate: impl FnOnce(&mut Self)) {
        let current_id = self.current_track().map(|track| track.id);
        let history_ids: Vec<TrackId> = self
            .history
            .iter()
            .filter_map(|index| self.tracks.get(*index).map(|track| track.id))
            .collect();

        mutate(self);

        self.current = current_id.and_then(|id| self.position_of(id));
        self.history = history_ids
            .into_iter()
            .filter_map(|id| self.position_of(id))
            .collect();
    }
}

fn manual_mode(mode: PlayMode) -> PlayMode {
    match mode {
        PlayMode::SingleLoop => PlayMode::Loop,
        other => other,
    }
}

pub fn track_matches(track: &Track, lowercase_keyword: &str) -> bool {
    track.title.to_lowercase().contains(lowercase_keyword)
        || track.artist.to_lowercase().contains(lowercase_keyword)
        || track.album.to_lowercase().contains(lowercase_keyword)
}

fn compare_tracks(a: &Track, b: &Track, order: SortOrder) -> Ordering {
    match order {
        SortOrder::TitleAsc => compare_text(&a.title, &b.title),
        SortOrder::TitleDesc => compare_text(&b.title, &a.title),
        SortOrder::ArtistAsc => compare_text(&a.artist, &b.artist),
        SortOrder::ArtistDesc => compare_text(&b.artist, &a.artist),
        SortOrder::AlbumAsc => compare_text(&a.album, &b.album),
        SortOrder::AlbumDesc => compare_text(&b.album, &a.album),
        SortOrder::DurationAsc => a.duration_ms.cmp(&b.duration_ms),
        SortOrder::DurationDesc => b.duration_ms.cmp(&a.duration_ms),
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}
