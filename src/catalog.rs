use crate::engine::probe_duration_ms;
use crate::model::{Provenance, Track, TrackId};
use crate::playlist::track_matches;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;

/// Source of already-resolved track records.
pub trait TrackCatalog {
    fn track(&self, id: TrackId) -> Option<Track>;
    /// Matches are flagged as search results until they are added to a playlist.
    fn search(&self, keyword: &str) -> Vec<Track>;
    fn all(&self) -> Vec<Track>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tracks: BTreeMap<TrackId, Track>,
}

impl MemoryCatalog {
    pub fn new(tracks: impl IntoIterator<Item = Track>) -> Self {
        Self {
            tracks: tracks.into_iter().map(|track| (track.id, track)).collect(),
        }
    }

    /// One record per path, ids assigned in order starting at 1. Title, artist and album
    /// come from the file's tags when it has them.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(
            paths
                .into_iter()
                .enumerate()
                .map(|(idx, path)| track_from_path(idx as u64 + 1, path.into())),
        )
    }

    pub fn insert(&mut self, track: Track) {
        self.tracks.insert(track.id, track);
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl TrackCatalog for MemoryCatalog {
    fn track(&self, id: TrackId) -> Option<Track> {
        self.tracks.get(&id).cloned()
    }

    fn search(&self, keyword: &str) -> Vec<Track> {
        let keyword = keyword.trim().to_lowercase();
        self.tracks
            .values()
            .filter(|track| keyword.is_empty() || track_matches(track, &keyword))
            .cloned()
            .map(|mut track| {
                track.provenance = Provenance::SearchResult;
                track
            })
            .collect()
    }

    fn all(&self) -> Vec<Track> {
        self.tracks.values().cloned().collect()
    }
}

pub fn track_from_path(id: u64, path: PathBuf) -> Track {
    let tags = read_tags(&path);
    let title = tags.title.unwrap_or_else(|| {
        path.file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or("unknown")
            .to_string()
    });

    let mut track = Track::new(id, title, path);
    track.artist = tags.artist.unwrap_or_default();
    track.album = tags.album.unwrap_or_default();
    track.duration_ms = probe_duration_ms(&track.source).unwrap_or(0);
    track
}

#[derive(Default)]
struct FileTags {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
}

fn read_tags(path: &Path) -> FileTags {
    let Ok(file) = File::open(path) else {
        return FileTags::default();
    };
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let Ok(mut probed) = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) else {
        return FileTags::default();
    };

    let metadata = probed.format.metadata();
    let Some(revision) = metadata.current() else {
        return FileTags::default();
    };
    let tags = revision.tags();

    FileTags {
        title: tag_value(tags, StandardTagKey::TrackTitle, &["title"]),
        artist: tag_value(tags, StandardTagKey::Artist, &["artist", "albumartist"]),
        album: tag_value(tags, StandardTagKey::Album, &["album"]),
    }
}

fn tag_value(tags: &[Tag], standard_key: StandardTagKey, fallback_keys: &[&str]) -> Option<String> {
    tags.iter()
        .find(|tag| tag.std_key == Some(standard_key))
        .or_else(|| {
            tags.iter().find(|tag| {
                fallback_keys
                    .iter()
                    .any(|key| tag.key.eq_ignore_ascii_case(key))
            })
        })
        .map(|tag| tag.value.to_string())
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MemoryCatalog {
        let mut a = Track::new(1, "Morning", "a.mp3");
        a.artist = String::from("Lark");
        let mut b = Track::new(2, "Evening", "b.mp3");
        b.album = String::from("Larkspur");
        let c = Track::new(3, "Noon", "c.mp3");
        MemoryCatalog::new([a, b, c])
    }

    #[test]
    fn search_flags_results_as_transient() {
        let found = catalog().search("LARK");
        let ids: Vec<u64> = found.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(found.iter().all(|t| !t.is_library_member()));
    }

    #[test]
    fn lookup_and_listing() {
        let catalog = catalog();
        assert_eq!(catalog.track(TrackId(3)).map(|t| t.title), Some(String::from("Noon")));
        assert!(catalog.track(TrackId(9)).is_none());
        assert_eq!(catalog.all().len(), 3);
    }

    #[test]
    fn untagged_paths_fall_back_to_file_stem() {
        let catalog = MemoryCatalog::from_paths(["/nowhere/first song.flac", "/nowhere/b.ogg"]);
        let titles: Vec<String> = catalog.all().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["first song", "b"]);
        assert_eq!(catalog.track(TrackId(1)).map(|t| t.duration_ms), Some(0));
    }
}
