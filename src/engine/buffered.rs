use super::sink::{OpenedSource, SinkEngine, SourceOpener, millis};
use super::{EngineEventSender, EngineKind, decoder_error_code};
use crate::error::ErrorCode;
use rodio::{Decoder, Source};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Alternate backend: reads the whole file into memory and decodes it with the file
/// extension as a format hint. Slower to prepare, but copes with files whose container
/// cannot be sniffed from a stream, and always knows the duration when the container
/// records a frame count.
pub type BufferedEngine = SinkEngine<BufferedOpener>;

impl BufferedEngine {
    pub fn new(events: EngineEventSender) -> Self {
        SinkEngine::with_opener(EngineKind::Buffered, BufferedOpener, events)
    }
}

pub struct BufferedOpener;

impl SourceOpener for BufferedOpener {
    type Source = Decoder<Cursor<Vec<u8>>>;

    fn open(&self, path: &Path) -> Result<OpenedSource<Self::Source>, ErrorCode> {
        let bytes = fs::read(path).map_err(|err| ErrorCode::from_io(&err))?;
        let byte_len = bytes.len() as u64;
        let extension = path.extension().and_then(OsStr::to_str);

        let mut builder = Decoder::builder()
            .with_data(Cursor::new(bytes))
            .with_byte_len(byte_len)
            .with_seekable(true);
        if let Some(extension) = extension {
            builder = builder.with_hint(extension);
        }
        let source = builder.build().map_err(|err| decoder_error_code(&err))?;

        let duration_ms = match millis(source.total_duration()) {
            0 => probe_duration_ms(path).unwrap_or(0),
            known => known,
        };
        Ok(OpenedSource {
            source,
            duration_ms,
        })
    }
}

/// Duration from the container's frame count, without decoding.
pub fn probe_duration_ms(path: &Path) -> Option<u64> {
    let file = File::open(path).ok()?;
    let stream = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;

    let params = &probed.format.default_track()?.codec_params;
    let frames = params.n_frames?;
    if let Some(time_base) = params.time_base {
        let time = time_base.calc_time(frames);
        return Some(time.seconds * 1000 + (time.frac * 1000.0) as u64);
    }
    let rate = u64::from(params.sample_rate?);
    (rate > 0).then(|| frames * 1000 / rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_wav(path: &PathBuf, duration_ms: u32) {
        let sample_rate: u32 = 8_000;
        let total_samples = sample_rate * duration_ms / 1_000;
        let data_size = total_samples * 2;

        let mut bytes = Vec::with_capacity(44 + data_size as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_size).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2_u16.to_le_bytes());
        bytes.extend_from_slice(&16_u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_size.to_le_bytes());
        bytes.resize(44 + data_size as usize, 0);
        fs::write(path, bytes).expect("write wav");
    }

    #[test]
    fn probe_reads_wav_duration() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tone.wav");
        write_wav(&path, 1_500);
        let duration = probe_duration_ms(&path).expect("duration");
        assert!((1_450..=1_550).contains(&duration), "got {duration}");
    }

    #[test]
    fn missing_file_maps_to_source_missing() {
        let dir = tempdir().expect("tempdir");
        let err = BufferedOpener
            .open(&dir.path().join("absent.flac"))
            .err()
            .expect("missing file should fail");
        assert_eq!(err, ErrorCode::SourceMissing);
    }
}
