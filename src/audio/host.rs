//! Host audio device: opens the default
//! `cpal` output stream and drains the mixer's ring on its callback thread.
//! A dedicated thread owns the `!Send` `cpal::Stream`, parked until shutdown.

use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::queue::AudioRing;

/// Opened device's negotiated format, reported back to the orchestrator so
/// the mixer's output spec can be rebuilt at the device's native rate.
#[derive(Debug, Clone, Copy)]
pub struct HostAudioFormat {
    pub rate_hz: u32,
    pub channels: u16,
}

/// A live device keeps its `cpal::Stream` alive on a parked thread for as
/// long as this handle lives; dropping it signals the thread to tear down
/// the stream and exit.
enum Handle {
    Open { shutdown: Arc<std::sync::atomic::AtomicBool>, join: Option<thread::JoinHandle<()>> },
    Absent,
}

/// Wraps the host's default output device, or nothing at all when one could
/// not be opened — the mix still runs silently against the ring.
pub struct HostAudioDevice {
    handle: Handle,
    format: Option<HostAudioFormat>,
}

impl HostAudioDevice {
    /// Attempts to open the default output device at its native rate,
    /// draining `ring` (interleaved little-endian i16 frames) on the
    /// callback. On any failure, logs a warning and returns an `Absent`
    /// device rather than propagating — this is a degradation,
    /// not a fatal error.
    pub fn open(ring: Arc<AudioRing>, channels: u16) -> Self {
        match Self::try_open(ring, channels) {
            Ok((handle, format)) => HostAudioDevice { handle, format: Some(format) },
            Err(reason) => {
                log::warn!("host audio device unavailable, falling back to silent mix: {reason}");
                HostAudioDevice { handle: Handle::Absent, format: None }
            }
        }
    }

    fn try_open(ring: Arc<AudioRing>, channels: u16) -> Result<(Handle, HostAudioFormat), String> {
        let (result_tx, result_rx) = std::sync::mpsc::sync_channel::<Result<HostAudioFormat, String>>(1);
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let join = thread::Builder::new()
            .name("host-audio".into())
            .spawn(move || {
                let opened = (|| -> Result<(cpal::Stream, HostAudioFormat), String> {
                    let host = cpal::default_host();
                    let device = host
                        .default_output_device()
                        .ok_or_else(|| "no default audio output device".to_string())?;
                    let default_config = device
                        .default_output_config()
                        .map_err(|e| format!("no default output config: {e}"))?;

                    let rate_hz = default_config.sample_rate().0;
                    let config = cpal::StreamConfig {
                        channels,
                        sample_rate: cpal::SampleRate(rate_hz),
                        buffer_size: cpal::BufferSize::Default,
                    };

                    let bytes_per_frame = channels as usize * std::mem::size_of::<i16>();
                    let ring_for_cb = Arc::clone(&ring);
                    let stream = device
                        .build_output_stream(
                            &config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                let frames = data.len() / channels as usize;
                                let mut bytes = vec![0u8; frames * bytes_per_frame];
                                let got = ring_for_cb.read(&mut bytes);
                                bytes[got..].fill(0);
                                for (i, sample) in data.iter_mut().enumerate() {
                                    let off = i * 2;
                                    let raw = i16::from_le_bytes([bytes[off], bytes[off + 1]]);
                                    *sample = raw as f32 / i16::MAX as f32;
                                }
                            },
                            move |err| log::error!("host audio stream error: {err}"),
                            None,
                        )
                        .map_err(|e| format!("build_output_stream failed: {e}"))?;

                    stream.play().map_err(|e| format!("stream.play() failed: {e}"))?;
                    Ok((stream, HostAudioFormat { rate_hz, channels }))
                })();

                match opened {
                    Ok((stream, format)) => {
                        let _ = result_tx.send(Ok(format));
                        while !thread_shutdown.load(std::sync::atomic::Ordering::Relaxed) {
                            thread::park_timeout(std::time::Duration::from_millis(100));
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = result_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| format!("spawn host audio thread: {e}"))?;

        let format = result_rx
            .recv()
            .map_err(|_| "host audio thread died before reporting status".to_string())??;
        Ok((Handle::Open { shutdown, join: Some(join) }, format))
    }

    pub fn format(&self) -> Option<HostAudioFormat> {
        self.format
    }

    pub fn is_open(&self) -> bool {
        matches!(self.handle, Handle::Open { .. })
    }
}

impl Drop for HostAudioDevice {
    fn drop(&mut self) {
        if let Handle::Open { shutdown, join } = &mut self.handle {
            shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
            if let Some(join) = join.take() {
                let _ = join.join();
            }
        }
    }
}
