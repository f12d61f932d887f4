#![no_main]

use libfuzzer_sys::fuzz_target;
use tuneplay::model::{PlayMode, SortOrder, Track};
use tuneplay::playlist::{DEFAULT_HISTORY_CAPACITY, PlaylistNavigator};

fuzz_target!(|data: &[u8]| {
    let mut nav = PlaylistNavigator::with_seed(DEFAULT_HISTORY_CAPACITY, 0);
    let len = data.len() % 32;
    nav.add_all((0..len).map(|idx| Track::new(idx as u64, format!("t{idx}"), format!("{idx}.mp3"))));

    for byte in data {
        match byte % 12 {
            0 => nav.set_mode(nav.mode().next()),
            1 => {
                let _ = nav.move_to_next();
            }
            2 => {
                let _ = nav.move_to_previous();
            }
            3 => {
                let _ = nav.advance_after_completion();
            }
            4 => {
                let _ = nav.set_current_index(usize::from(*byte) % 40);
            }
            5 => {
                let _ = nav.remove(usize::from(*byte) % 40);
            }
            6 => nav.sort(SortOrder::TitleDesc),
            7 => nav.search(&format!("{}", byte % 10)),
            8 => nav.clear_filter(),
            9 => nav.add(Track::new(u64::from(*byte) + 100, "added", "added.mp3")),
            10 => nav.set_mode(PlayMode::Shuffle),
            _ => nav.clear_current(),
        }

        if let Some(current) = nav.current_index() {
            assert!(current < nav.len());
        }
        assert!(nav.history_len() <= DEFAULT_HISTORY_CAPACITY);
    }
});
