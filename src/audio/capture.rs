//! Microphone access via `cpal`.
//!
//! [`InputDevice`] opens the default input device; [`InputDevice::start`]
//! streams raw [`AudioChunk`]s over a std mpsc channel from the cpal
//! callback thread.  The returned [`StreamHandle`] owns the stream: dropping
//! it closes the microphone.  `cpal::Stream` is not `Send` on every
//! platform, so the handle has to stay on the thread that created it.

use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::resample::to_mono_16k;

/// One device buffer: interleaved `f32` at the device's native format.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioChunk {
    pub fn to_mono_16k(&self) -> Vec<f32> {
        to_mono_16k(&self.samples, self.channels, self.sample_rate)
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to pause audio stream: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),
}

/// Keeps the cpal input stream open.
pub struct StreamHandle {
    stream: cpal::Stream,
}

impl StreamHandle {
    /// Stop the hardware delivering buffers without closing the device.
    pub fn pause(&self) -> Result<(), CaptureError> {
        self.stream.pause()?;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), CaptureError> {
        self.stream.play()?;
        Ok(())
    }
}

/// `true` when the default host reports an input device.
pub fn input_available() -> bool {
    cpal::default_host().default_input_device().is_some()
}

pub struct InputDevice {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_rate: u32,
    channels: u16,
}

impl InputDevice {
    /// Open the system default input with its preferred configuration.
    pub fn open_default() -> Result<Self, CaptureError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(CaptureError::NoDevice)?;

        let supported = device.default_input_config()?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        if let Ok(name) = device.name() {
            log::info!("capture: opened '{name}' ({sample_rate} Hz, {channels} ch)");
        }

        Ok(Self {
            device,
            config: supported.into(),
            sample_rate,
            channels,
        })
    }

    /// Begin streaming.  Send errors are ignored so the audio thread never
    /// panics once the receiver is gone.
    pub fn start(&self, tx: mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError> {
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(AudioChunk {
                    samples: data.to_vec(),
                    sample_rate,
                    channels,
                });
            },
            |err: cpal::StreamError| {
                log::error!("capture: cpal stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(StreamHandle { stream })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}
