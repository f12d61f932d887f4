use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayMode {
    #[default]
    Sequence,
    Loop,
    Shuffle,
    SingleLoop,
}

impl PlayMode {
    pub fn next(self) -> Self {
        match self {
            Self::Sequence => Self::Loop,
            Self::Loop => Self::Shuffle,
            Self::Shuffle => Self::SingleLoop,
            Self::SingleLoop => Self::Sequence,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequence" | "normal" => Some(Self::Sequence),
            "loop" => Some(Self::Loop),
            "shuffle" => Some(Self::Shuffle),
            "single" | "singleloop" | "single-loop" | "loopone" => Some(Self::SingleLoop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Preparing,
    Prepared,
    Playing,
    Paused,
    Completed,
    Stopped,
    Error,
}

impl PlaybackState {
    /// States that need a fresh `prepare_and_play` before audio can be produced again.
    pub fn needs_prepare(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Stopped | Self::Completed | Self::Error
        )
    }

    /// States in which the backend holds a loaded source and seeks are audible.
    pub fn has_source(self) -> bool {
        matches!(self, Self::Prepared | Self::Playing | Self::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Provenance {
    #[default]
    Library,
    SearchResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: u64,
    pub source: PathBuf,
    #[serde(default)]
    pub artwork: Option<PathBuf>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Track {
    pub fn new(id: u64, title: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: TrackId(id),
            title: title.into(),
            artist: String::new(),
            album: String::new(),
            duration_ms: 0,
            source: source.into(),
            artwork: None,
            provenance: Provenance::Library,
        }
    }

    pub fn is_library_member(&self) -> bool {
        self.provenance == Provenance::Library
    }

    /// Clears the search-result flag once the track joins the playlist.
    pub fn promote(&mut self) {
        self.provenance = Provenance::Library;
    }

    pub fn formatted_duration(&self) -> String {
        let total_seconds = self.duration_ms / 1000;
        format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    TitleAsc,
    TitleDesc,
    ArtistAsc,
    ArtistDesc,
    AlbumAsc,
    AlbumDesc,
    DurationAsc,
    DurationDesc,
}
