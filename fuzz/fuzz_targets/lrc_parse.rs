#![no_main]

use libfuzzer_sys::fuzz_target;
use tuneplay::lyrics::{LyricDocument, LyricsIndex};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let document = LyricDocument::parse(text);
    assert!(
        document
            .lines
            .windows(2)
            .all(|pair| pair[0].timestamp_ms <= pair[1].timestamp_ms)
    );

    let _ = LyricDocument::parse(&document.to_lrc());

    let mut index = LyricsIndex::new(document);
    for position in [0, 1_000, 60_000, u64::MAX / 2, 500] {
        if let Some(line) = index.line_at(position) {
            assert!(line < index.document().len());
        }
    }
});
