use super::sink::{OpenedSource, SinkEngine, SourceOpener, millis};
use super::{EngineEventSender, EngineKind, decoder_error_code};
use crate::error::ErrorCode;
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Primary backend: decodes while streaming from disk. Some containers only report a
/// duration once playback has started, so `duration_ms` may be 0 after `Prepared`.
pub type StreamEngine = SinkEngine<StreamOpener>;

impl StreamEngine {
    pub fn new(events: EngineEventSender) -> Self {
        SinkEngine::with_opener(EngineKind::Stream, StreamOpener, events)
    }
}

pub struct StreamOpener;

impl SourceOpener for StreamOpener {
    type Source = Decoder<BufReader<File>>;

    fn open(&self, path: &Path) -> Result<OpenedSource<Self::Source>, ErrorCode> {
        let file = File::open(path).map_err(|err| ErrorCode::from_io(&err))?;
        let source = Decoder::try_from(file).map_err(|err| decoder_error_code(&err))?;
        let duration_ms = millis(source.total_duration());
        Ok(OpenedSource {
            source,
            duration_ms,
        })
    }
}
