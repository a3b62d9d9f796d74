//! cpal Device Backend
//!
//! cpal streams are not `Send`, so each one lives on a blocking task that owns
//! it until told to stop. Capture encodes 20 ms opus frames into the shared
//! local track; playback decodes one peer's inbound payloads.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleRate, StreamConfig};
use opus::{Channels as OpusChannels, Decoder, Encoder};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    AudioConstraints, LocalAudioTrack, LocalStream, MediaDevices, MediaError, PlaybackSink,
    CHANNELS, FRAME_SIZE, SAMPLE_RATE,
};

/// Encoded frames buffered between the capture callback and the track writer.
const CAPTURE_QUEUE: usize = 50;
/// Inbound frames buffered per playback sink.
const PLAYBACK_QUEUE: usize = 100;
/// Decoded samples held for the output callback, about 200 ms.
const MAX_PLAYBACK_SAMPLES: usize = SAMPLE_RATE as usize / 5 * CHANNELS as usize;

/// Default cpal host with optional named devices.
pub struct CpalDevices {
    host: Arc<Host>,
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalDevices {
    pub fn new() -> Self {
        Self {
            host: Arc::new(cpal::default_host()),
            input_device: None,
            output_device: None,
        }
    }

    /// Use the named input device instead of the default.
    #[must_use]
    pub fn with_input_device(mut self, name: impl Into<String>) -> Self {
        self.input_device = Some(name.into());
        self
    }

    /// Use the named output device instead of the default.
    #[must_use]
    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }

    fn get_device(&self, device_name: Option<&str>, is_input: bool) -> Result<Device, MediaError> {
        match device_name {
            Some(name) => {
                let mut devices = if is_input {
                    self.host.input_devices()
                } else {
                    self.host.output_devices()
                }
                .map_err(|e| MediaError::ConfigError(e.to_string()))?;

                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| MediaError::DeviceNotFound(name.to_string()))
            }
            None => {
                if is_input {
                    self.host.default_input_device().ok_or(MediaError::NoInputDevice)
                } else {
                    self.host
                        .default_output_device()
                        .ok_or(MediaError::NoOutputDevice)
                }
            }
        }
    }
}

impl Default for CpalDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for CpalDevices {
    async fn capture_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<LocalStream, MediaError> {
        let device = self.get_device(self.input_device.as_deref(), true)?;
        debug!(?constraints, "Opening capture device");

        let track = LocalAudioTrack::opus(&Uuid::new_v4().to_string());
        let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<u8>>(CAPTURE_QUEUE);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            run_capture_task(device, frames_tx, stop_rx, ready_tx);
        });

        let writer = track.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if let Err(e) = writer.write_frame(Bytes::from(frame)).await {
                    warn!(error = %e, "Failed to write captured frame");
                }
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Audio capture started");
                Ok(LocalStream::new(vec![track], *constraints, Some(stop_tx)))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MediaError::StreamError("capture task exited".into())),
        }
    }

    fn open_playback(&self, peer_id: Uuid) -> Result<PlaybackSink, MediaError> {
        let device = self.get_device(self.output_device.as_deref(), false)?;
        let (frames_tx, frames_rx) = mpsc::channel(PLAYBACK_QUEUE);
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            run_playback_task(peer_id, device, frames_rx, stop_rx);
        });

        info!(peer_id = %peer_id, "Audio playback started");
        Ok(PlaybackSink::new(peer_id, frames_tx, Some(stop_tx)))
    }
}

fn stream_config() -> StreamConfig {
    StreamConfig {
        channels: CHANNELS,
        sample_rate: SampleRate(SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    }
}

fn build_error(e: cpal::BuildStreamError) -> MediaError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => MediaError::NoInputDevice,
        other => MediaError::StreamError(other.to_string()),
    }
}

/// Run capture task (owns the Stream)
fn run_capture_task(
    device: Device,
    frames_tx: mpsc::Sender<Vec<u8>>,
    stop_rx: oneshot::Receiver<()>,
    ready_tx: oneshot::Sender<Result<(), MediaError>>,
) {
    let mut encoder = match Encoder::new(SAMPLE_RATE, OpusChannels::Stereo, opus::Application::Voip) {
        Ok(enc) => enc,
        Err(e) => {
            let _ = ready_tx.send(Err(MediaError::CodecError(e.to_string())));
            return;
        }
    };

    let frame_samples = FRAME_SIZE * CHANNELS as usize;
    let mut buffer: Vec<f32> = Vec::with_capacity(frame_samples * 2);

    let stream = match device.build_input_stream(
        &stream_config(),
        move |data: &[f32], _| {
            buffer.extend_from_slice(data);

            while buffer.len() >= frame_samples {
                let samples_i16: Vec<i16> = buffer
                    .drain(..frame_samples)
                    .map(|s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                    .collect();

                let mut encoded = vec![0u8; 4000];
                match encoder.encode(&samples_i16, &mut encoded) {
                    Ok(len) => {
                        encoded.truncate(len);
                        if frames_tx.try_send(encoded).is_err() {
                            debug!("Capture queue full, dropping frame");
                        }
                    }
                    Err(e) => error!(error = %e, "Opus encode error"),
                }
            }
        },
        |err| error!(error = %err, "Audio capture stream error"),
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(build_error(e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(MediaError::StreamError(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Block until stopped or the stream handle is dropped.
    let _ = stop_rx.blocking_recv();

    drop(stream);
    info!("Capture task stopped");
}

/// Run playback task for one peer (owns the Stream)
/// Append decoded PCM, dropping the oldest samples beyond
/// [`MAX_PLAYBACK_SAMPLES`]. Returns how many were dropped.
fn push_decoded(buffer: &mut VecDeque<f32>, samples: &[i16]) -> usize {
    buffer.extend(samples.iter().map(|&s| f32::from(s) / 32768.0));
    let excess = buffer.len().saturating_sub(MAX_PLAYBACK_SAMPLES);
    buffer.drain(..excess);
    excess
}

fn run_playback_task(
    peer_id: Uuid,
    device: Device,
    mut frames_rx: mpsc::Receiver<Bytes>,
    stop_rx: oneshot::Receiver<()>,
) {
    let mut decoder = match Decoder::new(SAMPLE_RATE, OpusChannels::Stereo) {
        Ok(dec) => dec,
        Err(e) => {
            error!(peer_id = %peer_id, error = %e, "Failed to create decoder");
            return;
        }
    };

    let playback_buffer = Arc::new(Mutex::new(VecDeque::<f32>::new()));

    let decoded_into = playback_buffer.clone();
    std::thread::spawn(move || {
        let mut decoded = vec![0i16; FRAME_SIZE * CHANNELS as usize * 2];
        while let Some(encoded) = frames_rx.blocking_recv() {
            match decoder.decode(&encoded, &mut decoded, false) {
                Ok(len) => {
                    // `len` is per channel.
                    let samples = len * CHANNELS as usize;
                    if let Ok(mut buffer) = decoded_into.lock() {
                        let dropped = push_decoded(&mut buffer, &decoded[..samples]);
                        if dropped > 0 {
                            debug!(peer_id = %peer_id, dropped, "Playback behind, dropping oldest samples");
                        }
                    }
                }
                Err(e) => error!(peer_id = %peer_id, error = %e, "Opus decode error"),
            }
        }
    });

    let stream = match device.build_output_stream(
        &stream_config(),
        move |data: &mut [f32], _| {
            let Ok(mut buffer) = playback_buffer.lock() else {
                data.fill(0.0);
                return;
            };
            let available = buffer.len().min(data.len());
            for (slot, sample) in data.iter_mut().zip(buffer.drain(..available)) {
                *slot = sample;
            }
            data[available..].fill(0.0);
        },
        move |err| error!(peer_id = %peer_id, error = %err, "Audio playback stream error"),
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            error!(peer_id = %peer_id, error = %e, "Failed to build playback stream");
            return;
        }
    };

    if let Err(e) = stream.play() {
        error!(peer_id = %peer_id, error = %e, "Failed to start playback stream");
        return;
    }

    let _ = stop_rx.blocking_recv();

    drop(stream);
    debug!(peer_id = %peer_id, "Playback task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_buffer_keeps_newest_samples() {
        let mut buffer = VecDeque::new();
        let frame = vec![0i16; FRAME_SIZE * CHANNELS as usize];

        let mut dropped = 0;
        for _ in 0..20 {
            dropped += push_decoded(&mut buffer, &frame);
        }
        assert_eq!(buffer.len(), MAX_PLAYBACK_SAMPLES);
        assert_eq!(dropped, 20 * frame.len() - MAX_PLAYBACK_SAMPLES);

        // The newest frame survives at the back.
        assert_eq!(push_decoded(&mut buffer, &[i16::MAX]), 1);
        assert_eq!(buffer.back().copied(), Some(f32::from(i16::MAX) / 32768.0));
    }

    #[test]
    fn test_playback_buffer_under_cap_drops_nothing() {
        let mut buffer = VecDeque::new();
        assert_eq!(push_decoded(&mut buffer, &[1, 2, 3, 4]), 0);
        assert_eq!(buffer.len(), 4);
    }
}
