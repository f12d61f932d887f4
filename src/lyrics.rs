use crate::model::{Track, TrackId};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// How far the cached cursor may walk before `LyricsIndex` falls back to a binary search.
const CURSOR_STEP_LIMIT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub timestamp_ms: u64,
    pub text: String,
    /// Set on the active line by `LyricsIndex::line_at`.
    pub current: bool,
}

impl LyricLine {
    pub fn new(timestamp_ms: u64, text: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            text: text.into(),
            current: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricDocument {
    pub track_id: Option<TrackId>,
    pub lines: Vec<LyricLine>,
    pub metadata: BTreeMap<String, String>,
}

impl LyricDocument {
    /// Parses LRC text. Lines without a leading time tag are skipped unless they are
    /// `[key:value]` metadata. A line carrying several time tags yields one entry per tag.
    pub fn parse(input: &str) -> Self {
        let mut doc = Self::default();

        for raw_line in input.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let (timestamps, rest) = parse_line_timestamps(line);
            if timestamps.is_empty() {
                if let Some((key, value)) = parse_metadata_tag(line) {
                    doc.metadata.insert(key, value);
                }
                continue;
            }

            let text = strip_word_timestamps(rest);
            for timestamp_ms in timestamps {
                doc.lines.push(LyricLine::new(timestamp_ms, text.clone()));
            }
        }

        // stable: equal timestamps keep encounter order
        doc.lines.sort_by_key(|line| line.timestamp_ms);
        doc
    }

    /// Builds a timed document from untimed text, one line every `interval_seconds`.
    pub fn seeded_from_lines<I, S>(lines: I, interval_seconds: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let step_ms = u64::from(interval_seconds.max(1)) * 1000;
        let lines = lines
            .into_iter()
            .map(Into::into)
            .map(|text: String| lrc_text(&text))
            .filter(|text| !text.is_empty())
            .enumerate()
            .map(|(idx, text)| LyricLine::new(idx as u64 * step_ms, text))
            .collect();

        Self {
            lines,
            ..Self::default()
        }
    }

    pub fn for_track(mut self, track_id: TrackId) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("ti").map(String::as_str)
    }

    pub fn artist(&self) -> Option<&str> {
        self.metadata.get("ar").map(String::as_str)
    }

    pub fn album(&self) -> Option<&str> {
        self.metadata.get("al").map(String::as_str)
    }

    /// `[offset:...]` in milliseconds; positive values show lines earlier.
    pub fn offset_ms(&self) -> i64 {
        self.metadata
            .get("offset")
            .and_then(|raw| raw.trim().trim_start_matches('+').parse::<i64>().ok())
            .unwrap_or(0)
    }

    /// Index of the last line whose timestamp is `<= position_ms`.
    ///
    /// Positions before the first line map to 0 so a preview line is always available;
    /// an empty document yields `None`.
    pub fn line_index_at(&self, position_ms: u64) -> Option<usize> {
        if self.lines.is_empty() {
            return None;
        }
        let after = self
            .lines
            .partition_point(|line| line.timestamp_ms <= position_ms);
        Some(after.saturating_sub(1))
    }

    /// Serializes to LRC: metadata tags, a blank line, then `[mm:ss.mmm]text` lines.
    ///
    /// Line text is written as `parse` would read it back: leading time tags and
    /// `<mm:ss.xx>` word stamps inside the text are dropped, line breaks become spaces.
    pub fn to_lrc(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        for (key, value) in &self.metadata {
            out.push_str(&format!("[{key}:{value}]\n"));
        }
        out.push('\n');
        for line in &self.lines {
            out.push_str(&format_lrc_timestamp(line.timestamp_ms));
            out.push_str(&lrc_text(&line.text));
            out.push('\n');
        }
        out
    }
}

/// Cursor-based lookup over a `LyricDocument`, queried on every progress tick.
#[derive(Debug, Clone, Default)]
pub struct LyricsIndex {
    document: LyricDocument,
    cursor: Option<usize>,
    offset_ms: i64,
}

impl LyricsIndex {
    pub fn new(document: LyricDocument) -> Self {
        let offset_ms = document.offset_ms();
        Self {
            document,
            cursor: None,
            offset_ms,
        }
    }

    pub fn document(&self) -> &LyricDocument {
        &self.document
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current_line(&self) -> Option<&LyricLine> {
        self.document.lines.get(self.cursor?)
    }

    /// Active line at `position_ms`, adjusted by the document offset.
    ///
    /// Steps the cached cursor a few lines in either direction and falls back to a
    /// binary search after seeks.
    pub fn line_at(&mut self, position_ms: u64) -> Option<usize> {
        let target = shift(position_ms, self.offset_ms);
        let lines = &self.document.lines;
        if lines.is_empty() {
            return None;
        }

        let found = match self.cursor {
            Some(start) => step_cursor(lines, start, target)
                .or_else(|| self.document.line_index_at(target)),
            None => self.document.line_index_at(target),
        }?;

        if self.cursor != Some(found) {
            if let Some(line) = self.cursor.and_then(|old| self.document.lines.get_mut(old)) {
                line.current = false;
            }
            if let Some(line) = self.document.lines.get_mut(found) {
                line.current = true;
            }
            self.cursor = Some(found);
        }
        Some(found)
    }

    pub fn reset(&mut self) {
        if let Some(line) = self.cursor.and_then(|old| self.document.lines.get_mut(old)) {
            line.current = false;
        }
        self.cursor = None;
    }
}

fn step_cursor(lines: &[LyricLine], start: usize, target: u64) -> Option<usize> {
    let mut idx = start.min(lines.len() - 1);
    for _ in 0..=CURSOR_STEP_LIMIT {
        let at_or_before = lines[idx].timestamp_ms <= target;
        let next_reached = lines
            .get(idx + 1)
            .is_some_and(|next| next.timestamp_ms <= target);

        if at_or_before && !next_reached {
            return Some(idx);
        }
        if !at_or_before && idx == 0 {
            return Some(0);
        }
        if next_reached {
            idx += 1;
        } else {
            idx -= 1;
        }
    }
    None
}

fn shift(position_ms: u64, offset_ms: i64) -> u64 {
    if offset_ms >= 0 {
        position_ms.saturating_add(offset_ms.unsigned_abs())
    } else {
        position_ms.saturating_sub(offset_ms.unsigned_abs())
    }
}

/// Source of raw lyric text for a track.
pub trait LyricStore: Send {
    fn load(&self, track: &Track) -> Result<Option<String>>;
    fn save(&self, track: &Track, lrc: &str) -> Result<PathBuf>;
}

/// Looks for lyrics next to the audio file (same stem, then `artist - title.lrc`), then in
/// a private lyrics directory keyed by track id, then in the file's own tags.
#[derive(Debug, Clone)]
pub struct FileLyricStore {
    dir: PathBuf,
}

impl FileLyricStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn private_path(&self, track: &Track) -> PathBuf {
        self.dir.join(format!("{}.lrc", track.id))
    }

    fn candidates(&self, track: &Track) -> Vec<PathBuf> {
        let mut paths = vec![track.source.with_extension("lrc")];
        if let Some(parent) = track.source.parent().filter(|_| !track.artist.is_empty()) {
            paths.push(parent.join(format!("{} - {}.lrc", track.artist, track.title)));
        }
        paths.push(self.private_path(track));
        paths
    }
}

impl LyricStore for FileLyricStore {
    fn load(&self, track: &Track) -> Result<Option<String>> {
        for path in self.candidates(track) {
            if !path.is_file() {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read lyrics file {}", path.display()))?;
            tracing::debug!(track = %track.id, path = %path.display(), "lyrics file found");
            return Ok(Some(raw));
        }

        Ok(read_embedded_lyrics(&track.source))
    }

    fn save(&self, track: &Track, lrc: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let target = self.private_path(track);
        fs::write(&target, lrc)
            .with_context(|| format!("failed to write lyrics file {}", target.display()))?;
        Ok(target)
    }
}

fn read_embedded_lyrics(track_path: &Path) -> Option<String> {
    let file = fs::File::open(track_path).ok()?;
    let source = symphonia::core::io::MediaSourceStream::new(
        Box::new(file),
        symphonia::core::io::MediaSourceStreamOptions::default(),
    );

    let mut hint = symphonia::core::probe::Hint::new();
    if let Some(extension) = track_path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &symphonia::core::formats::FormatOptions::default(),
            &symphonia::core::meta::MetadataOptions::default(),
        )
        .ok()?;

    let metadata = probed.format.metadata();
    let revision = metadata.current()?;

    // Only timed lyrics are useful for sync; plain USLT text is ignored.
    revision
        .tags()
        .iter()
        .filter(|tag| {
            let key = tag.key.to_ascii_lowercase();
            key.contains("lyric") || key == "uslt" || key == "sylt"
        })
        .map(|tag| tag.value.to_string())
        .find(|value| looks_like_lrc(value))
}

fn looks_like_lrc(input: &str) -> bool {
    input
        .lines()
        .any(|line| !parse_line_timestamps(line.trim()).0.is_empty())
}

fn parse_metadata_tag(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (key, value) = inner.split_once(':')?;
    let key = key.trim();
    let starts_alphabetic = key.chars().next().is_some_and(char::is_alphabetic);
    if !starts_alphabetic || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((key.to_ascii_lowercase(), value.to_string()))
}

fn parse_line_timestamps(input: &str) -> (Vec<u64>, &str) {
    let mut remaining = input;
    let mut out = Vec::new();

    while remaining.starts_with('[') {
        let Some(closing_idx) = remaining.find(']') else {
            break;
        };
        let Some(ms) = parse_timestamp(&remaining[1..closing_idx]) else {
            break;
        };
        out.push(ms);
        remaining = remaining[closing_idx + 1..].trim_start();
    }

    (out, remaining)
}

/// `m:ss`, `m:ss.f`, `m:ss.ff` (hundredths) or `m:ss.fff` (milliseconds).
fn parse_timestamp(content: &str) -> Option<u64> {
    let (minutes, rest) = content.split_once(':')?;
    let (seconds, fraction) = match rest.split_once('.') {
        Some((seconds, fraction)) => (seconds, fraction),
        None => (rest, ""),
    };

    if !all_digits(minutes) || !all_digits(seconds) || seconds.len() > 2 {
        return None;
    }
    if !fraction.is_empty() && !all_digits(fraction) {
        return None;
    }

    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    let fraction_ms = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<u64>().ok()? * 100,
        2 => fraction.parse::<u64>().ok()? * 10,
        3 => fraction.parse::<u64>().ok()?,
        _ => fraction[..3].parse::<u64>().ok()?,
    };

    Some(minutes * 60_000 + seconds * 1000 + fraction_ms)
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// Reduces `text` until it no longer carries LRC markup of its own.
fn lrc_text(text: &str) -> String {
    let mut current = text.replace(['\r', '\n'], " ");
    loop {
        let (_, rest) = parse_line_timestamps(current.trim());
        let next = strip_word_timestamps(rest);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn strip_word_timestamps(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(open_idx) = remaining.find('<') {
        out.push_str(&remaining[..open_idx]);
        let tail = &remaining[open_idx..];
        let Some(close_idx) = tail.find('>') else {
            break;
        };
        let token = &tail[..=close_idx];
        if parse_timestamp(&token[1..token.len() - 1]).is_none() {
            out.push_str(token);
        }
        remaining = &tail[close_idx + 1..];
    }

    if let Some(open_idx) = remaining.find('<') {
        out.push_str(&remaining[open_idx..]);
    } else {
        out.push_str(remaining);
    }
    out.trim().to_string()
}

fn format_lrc_timestamp(timestamp_ms: u64) -> String {
    let minutes = timestamp_ms / 60_000;
    let seconds = (timestamp_ms % 60_000) / 1000;
    let millis = timestamp_ms % 1000;
    format!("[{minutes:02}:{seconds:02}.{millis:03}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn doc_at(times: &[u64]) -> LyricDocument {
        LyricDocument {
            lines: times
                .iter()
                .map(|ms| LyricLine::new(*ms, format!("line {ms}")))
                .collect(),
            ..LyricDocument::default()
        }
    }

    #[test]
    fn two_and_three_digit_fractions() {
        let doc = LyricDocument::parse("[00:01.50]a\n[00:02.505]b\n[01:00]c\n");
        let times: Vec<u64> = doc.lines.iter().map(|l| l.timestamp_ms).collect();
        assert_eq!(times, vec![1500, 2505, 60_000]);
    }

    #[test]
    fn multiple_tags_share_text_and_sort() {
        let doc = LyricDocument::parse("[00:10.00][00:02.00]chorus\n[00:05.00]verse\n");
        let pairs: Vec<(u64, &str)> = doc
            .lines
            .iter()
            .map(|l| (l.timestamp_ms, l.text.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![(2000, "chorus"), (5000, "verse"), (10_000, "chorus")]
        );
    }

    #[test]
    fn metadata_is_collected_and_untimed_text_dropped() {
        let doc = LyricDocument::parse("[ti:Song]\n[ar:Someone]\n[al:Record]\nplain\n[00:01.00]x");
        assert_eq!(doc.title(), Some("Song"));
        assert_eq!(doc.artist(), Some("Someone"));
        assert_eq!(doc.album(), Some("Record"));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn word_tags_are_stripped() {
        let doc = LyricDocument::parse("[00:01.00]<00:01.20>hel<00:01.50>lo <b>x</b>\n");
        assert_eq!(doc.lines[0].text, "hello <b>x</b>");
    }

    #[test]
    fn lookup_boundaries() {
        let doc = doc_at(&[0, 1000, 5000]);
        assert_eq!(doc.line_index_at(500), Some(0));
        assert_eq!(doc.line_index_at(999), Some(0));
        assert_eq!(doc.line_index_at(1000), Some(1));
        assert_eq!(doc.line_index_at(999_999), Some(2));
        assert_eq!(LyricDocument::default().line_index_at(10), None);
    }

    #[test]
    fn position_before_first_line_previews_it() {
        let doc = doc_at(&[3000, 4000]);
        assert_eq!(doc.line_index_at(0), Some(0));
    }

    #[test]
    fn cursor_follows_playback_and_seeks() {
        let mut index = LyricsIndex::new(doc_at(&[0, 1000, 2000, 3000, 4000, 50_000, 60_000]));
        assert_eq!(index.line_at(0), Some(0));
        assert_eq!(index.line_at(1200), Some(1));
        assert_eq!(index.line_at(2999), Some(2));
        assert_eq!(index.line_at(59_000), Some(5));
        assert_eq!(index.line_at(500), Some(0));
        assert!(index.document().lines[0].current);
        assert_eq!(
            index.document().lines.iter().filter(|l| l.current).count(),
            1
        );
    }

    #[test]
    fn offset_shifts_lookup() {
        let mut doc = doc_at(&[0, 1000, 2000]);
        doc.metadata.insert("offset".into(), "+500".into());
        let mut index = LyricsIndex::new(doc);
        assert_eq!(index.line_at(600), Some(1));

        let mut doc = doc_at(&[0, 1000, 2000]);
        doc.metadata.insert("offset".into(), "-500".into());
        let mut index = LyricsIndex::new(doc);
        assert_eq!(index.line_at(1200), Some(0));
    }

    #[test]
    fn generate_writes_metadata_then_millisecond_tags() {
        let mut doc = doc_at(&[61_005]);
        doc.metadata.insert("ti".into(), "Song".into());
        assert_eq!(doc.to_lrc(), "[ti:Song]\n\n[01:01.005]line 61005\n");
        assert_eq!(LyricDocument::default().to_lrc(), "");
    }

    #[test]
    fn generated_text_cannot_smuggle_time_tags() {
        let mut doc = LyricDocument::default();
        doc.lines.push(LyricLine::new(2000, "[00:09.00]quoted"));
        doc.lines.push(LyricLine::new(3000, "<00:02.00>echo <b>"));
        doc.lines.push(LyricLine::new(4000, "two\nrows"));

        let reparsed = LyricDocument::parse(&doc.to_lrc());
        let lines: Vec<(u64, &str)> = reparsed
            .lines
            .iter()
            .map(|l| (l.timestamp_ms, l.text.as_str()))
            .collect();
        assert_eq!(
            lines,
            vec![(2000, "quoted"), (3000, "echo <b>"), (4000, "two rows")]
        );

        let seeded = LyricDocument::seeded_from_lines(["[01:00]", "<00:01>hi"], 1);
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded.lines[0].text, "hi");
    }

    #[test]
    fn seeded_lines_get_fixed_intervals() {
        let doc = LyricDocument::seeded_from_lines(["a", "", "b", "c"], 3);
        let times: Vec<u64> = doc.lines.iter().map(|l| l.timestamp_ms).collect();
        assert_eq!(times, vec![0, 3000, 6000]);
    }

    #[test]
    fn store_prefers_colocated_file_and_saves_privately() {
        let dir = tempdir().expect("tempdir");
        let music = dir.path().join("music");
        fs::create_dir_all(&music).expect("mkdir");
        let mut track = Track::new(42, "Song", music.join("song.mp3"));
        track.artist = String::from("Band");
        let store = FileLyricStore::new(dir.path().join("lyrics"));

        assert!(store.load(&track).expect("load").is_none());

        let saved = store.save(&track, "[00:01.000]private").expect("save");
        assert_eq!(saved, dir.path().join("lyrics").join("42.lrc"));
        assert_eq!(
            store.load(&track).expect("load").as_deref(),
            Some("[00:01.000]private")
        );

        fs::write(music.join("Band - Song.lrc"), "[00:01.000]named").expect("write");
        assert_eq!(
            store.load(&track).expect("load").as_deref(),
            Some("[00:01.000]named")
        );

        fs::write(music.join("song.lrc"), "[00:01.000]beside").expect("write");
        assert_eq!(
            store.load(&track).expect("load").as_deref(),
            Some("[00:01.000]beside")
        );
    }

    proptest! {
        #[test]
        fn generate_then_parse_keeps_timing_and_text(
            lines in proptest::collection::vec((0u64..6_000_000, "[a-z0-9 ,.':<>\\[\\]]{0,24}"), 1..40)
        ) {
            let mut doc = LyricDocument::default();
            for (ms, text) in &lines {
                doc.lines.push(LyricLine::new(*ms, text.as_str()));
            }
            doc.lines.sort_by_key(|line| line.timestamp_ms);

            let reparsed = LyricDocument::parse(&doc.to_lrc());
            let expected: Vec<(u64, String)> =
                doc.lines.iter().map(|l| (l.timestamp_ms, lrc_text(&l.text))).collect();
            let actual: Vec<(u64, String)> =
                reparsed.lines.iter().map(|l| (l.timestamp_ms, l.text.clone())).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn cursor_agrees_with_binary_search(
            times in proptest::collection::vec(0u64..100_000, 1..30),
            probes in proptest::collection::vec(0u64..120_000, 1..30),
        ) {
            let mut sorted = times.clone();
            sorted.sort_unstable();
            let doc = doc_at(&sorted);
            let mut index = LyricsIndex::new(doc.clone());
            for probe in probes {
                prop_assert_eq!(index.line_at(probe), doc.line_index_at(probe));
            }
        }
    }
}
