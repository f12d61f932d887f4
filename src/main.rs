use std::path::PathBuf;
use tuneplay::catalog::{MemoryCatalog, TrackCatalog};
use tuneplay::config::{self, PlayerSettings};
use tuneplay::engine::{DefaultEngineFactory, EngineKind};
use tuneplay::error::PlayerError;
use tuneplay::lyrics::FileLyricStore;
use tuneplay::model::PlayMode;
use tuneplay::player::{Player, PlayerOptions};
use tuneplay::subscriber::{ChannelSubscriber, PlayerEvent};

#[derive(Debug, Default)]
struct CliArgs {
    silent: bool,
    mode: Option<PlayMode>,
    lyrics_dir: Option<PathBuf>,
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    tuneplay::logging::init_logging()?;

    let mut settings = config::load_settings()?;
    if let Some(mode) = args.mode {
        settings.play_mode = mode;
    }
    if args.silent {
        settings.primary_engine = EngineKind::Null;
    }
    let lyrics_dir = match args.lyrics_dir {
        Some(dir) => dir,
        None => settings.resolved_lyrics_dir()?,
    };

    let catalog = MemoryCatalog::from_paths(args.files);
    if catalog.is_empty() {
        anyhow::bail!("no input files; see --help");
    }

    let player = spawn_player(settings, catalog.all(), lyrics_dir)?;
    let (subscriber, mut events) = ChannelSubscriber::new();
    player.subscribe(Box::new(subscriber)).await?;
    player.play().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
        }
    }

    player.shutdown();
    Ok(())
}

/// Falls back to the silent engine when no output device can be opened.
fn spawn_player(
    settings: PlayerSettings,
    playlist: Vec<tuneplay::model::Track>,
    lyrics_dir: PathBuf,
) -> anyhow::Result<Player> {
    let options = |playlist| PlayerOptions {
        focus: None,
        lyric_store: Some(Box::new(FileLyricStore::new(lyrics_dir.clone()))),
        playlist,
    };

    match Player::spawn(settings.clone(), DefaultEngineFactory, options(playlist.clone())) {
        Err(PlayerError::EngineInit(reason)) if settings.primary_engine != EngineKind::Null => {
            tracing::warn!("audio output unavailable ({reason}), continuing silently");
            let settings = PlayerSettings {
                primary_engine: EngineKind::Null,
                ..settings
            };
            Ok(Player::spawn(settings, DefaultEngineFactory, options(playlist))?)
        }
        other => Ok(other?),
    }
}

fn print_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::StateChanged(state) => println!("state     {state:?}"),
        PlayerEvent::TrackChanged(Some(track)) => {
            let artist = if track.artist.is_empty() {
                "unknown artist"
            } else {
                track.artist.as_str()
            };
            println!("track     {} - {} [{}]", artist, track.title, track.formatted_duration());
        }
        PlayerEvent::TrackChanged(None) => println!("track     none"),
        PlayerEvent::DurationChanged(ms) => println!("duration  {ms} ms"),
        PlayerEvent::Error { code, message } => eprintln!("error     {code}: {message}"),
        PlayerEvent::PlayModeChanged(mode) => println!("mode      {mode:?}"),
        PlayerEvent::LyricLineChanged { text, .. } if !text.is_empty() => {
            println!("          {text}")
        }
        PlayerEvent::PositionChanged(_)
        | PlayerEvent::PlaylistChanged(_)
        | PlayerEvent::LyricsChanged(_)
        | PlayerEvent::LyricLineChanged { .. } => {}
    }
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--silent" => out.silent = true,
            "--mode" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--mode requires a value");
                };
                let Some(mode) = PlayMode::parse(value) else {
                    anyhow::bail!("unknown play mode {value}");
                };
                out.mode = Some(mode);
            }
            "--lyrics" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--lyrics requires a directory");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--lyrics cannot be empty");
                }
                out.lyrics_dir = Some(PathBuf::from(value.trim()));
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with("--") => anyhow::bail!("unknown argument {other}"),
            file => out.files.push(PathBuf::from(file)),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("tuneplay [options] FILE...");
    println!("  --mode MODE       sequence, loop, shuffle or single");
    println!("  --silent          Use the silent engine (no audio device)");
    println!("  --lyrics DIR      Directory for saved .lrc files");
}
