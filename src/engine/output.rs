use anyhow::{Context, Result};
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamBuilder};
#[cfg(unix)]
use std::ffi::CString;

/// Opens the default output, falling back to any device that starts, preferring
/// sound-server devices.
pub(super) fn open_output_stream() -> Result<OutputStream> {
    let mut stream = with_silenced_stderr(|| {
        let default_attempt = OutputStreamBuilder::from_default_device()
            .context("failed to open default system output stream")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_stream_or_fallback()
                    .context("failed to start default output stream")
            });

        match default_attempt {
            Ok(stream) => Ok(stream),
            Err(default_err) => open_first_working_device().with_context(|| {
                format!("unable to start any audio output stream after default failed: {default_err:#}")
            }),
        }
    })?;
    stream.log_on_drop(false);
    Ok(stream)
}

fn open_first_working_device() -> Result<OutputStream> {
    let host = rodio::cpal::default_host();
    let mut candidates: Vec<String> = host
        .output_devices()
        .context("failed to enumerate output devices")?
        .filter_map(|device| device.name().ok())
        .collect();
    candidates.sort_by_cached_key(|name| (device_rank(name), name.to_ascii_lowercase()));
    candidates.dedup();

    for candidate in candidates {
        let Some(device) = host
            .output_devices()
            .ok()
            .into_iter()
            .flatten()
            .find(|entry| entry.name().ok().as_deref() == Some(candidate.as_str()))
        else {
            continue;
        };

        let opened = OutputStreamBuilder::from_device(device)
            .context("failed to open fallback output device")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_stream_or_fallback()
                    .context("failed to start fallback output stream")
            });
        match opened {
            Ok(stream) => {
                tracing::info!(device = %candidate, "using fallback audio output");
                return Ok(stream);
            }
            Err(err) => tracing::debug!(device = %candidate, "output device rejected: {err:#}"),
        }
    }

    anyhow::bail!("no output device could be started")
}

fn device_rank(name: &str) -> u8 {
    let lower = name.to_ascii_lowercase();
    if lower.contains("pulse") {
        0
    } else if lower.contains("pipewire") {
        1
    } else if lower.contains("default") {
        2
    } else {
        3
    }
}

// ALSA and JACK probing write noise straight to fd 2.
#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}
