//! Microphone capture using CPAL.
//!
//! Holds the exclusive input device handle and emits fixed-size PCM16 frames
//! at the device's processing cadence until the stream handle is dropped.

use crate::error::{SessionError, SessionResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Samples per emitted frame (default: 4096)
    pub frame_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            frame_samples: 4096,
        }
    }
}

/// One fixed-size block of captured audio in transit to the remote service.
/// Transient; not retained after transmission.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Microphone capture. Consumed by `start`; a stopped pipeline is not
/// restartable, open a new one instead.
pub struct MicCapture {
    config: CaptureConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl MicCapture {
    /// Acquire the default input device.
    pub fn new(config: CaptureConfig) -> SessionResult<Self> {
        let device = cpal::default_host().default_input_device().ok_or_else(|| {
            SessionError::MediaAccess("no input device available".to_string())
        })?;

        info!(
            "📱 Using input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Start capturing. Frames are emitted on `chunk_tx` in capture order.
    ///
    /// Stopping is dropping the returned `Stream`; the device is released and
    /// no further frames are produced.
    pub fn start(self, chunk_tx: mpsc::UnboundedSender<AudioChunk>) -> SessionResult<Stream> {
        info!(
            "🎤 Starting capture ({}Hz, {}ch, {} samples/frame)",
            self.config.sample_rate, self.config.channels, self.config.frame_samples
        );

        let frame_samples = self.config.frame_samples;
        let sample_rate = self.config.sample_rate;
        let channels = self.config.channels;
        let mut frame = Vec::with_capacity(frame_samples);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    let clamped = sample.clamp(-1.0, 1.0);
                    frame.push((clamped * i16::MAX as f32) as i16);

                    if frame.len() >= frame_samples {
                        let chunk = AudioChunk {
                            samples: std::mem::replace(
                                &mut frame,
                                Vec::with_capacity(frame_samples),
                            ),
                            sample_rate,
                            channels,
                        };
                        if chunk_tx.send(chunk).is_err() {
                            // Receiver gone; the session is tearing down.
                            return;
                        }
                    }
                }
            },
            move |err| {
                warn!("Capture stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;

        Ok(stream)
    }

    /// List available input devices.
    pub fn list_input_devices() -> SessionResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }

        Ok(names)
    }
}
