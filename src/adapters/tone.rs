//! Cue beep on the default output device.
//!
//! Each `play` spawns a short-lived thread that opens a cpal output stream,
//! renders a faded sine wave, and drops the stream when the tone ends or
//! `stop` is called.  Nothing is held open between tones.

use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use tokio::sync::oneshot;

use super::{AdapterError, AdapterKind, TonePlayer};

const FADE: Duration = Duration::from_millis(5);

/// Linear fade-in/out gain for frame `n` of `total`.
pub fn envelope(n: usize, total: usize, fade: usize) -> f32 {
    if n >= total {
        return 0.0;
    }
    if fade == 0 {
        return 1.0;
    }
    let from_start = n as f32 / fade as f32;
    let from_end = (total - n) as f32 / fade as f32;
    from_start.min(from_end).min(1.0)
}

struct ToneShape {
    frequency_hz: f32,
    volume: f32,
    sample_rate: u32,
    total_frames: usize,
    fade_frames: usize,
}

impl ToneShape {
    fn sample(&self, n: usize) -> f32 {
        let phase = 2.0 * std::f32::consts::PI * self.frequency_hz * n as f32 / self.sample_rate as f32;
        phase.sin() * self.volume * envelope(n, self.total_frames, self.fade_frames)
    }
}

pub struct CpalTonePlayer {
    volume: f32,
    /// Signals the tone thread of the current `play`, if any.
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CpalTonePlayer {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
            stop_tx: Mutex::new(None),
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shape: ToneShape,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut frame = 0usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for out in data.chunks_mut(channels) {
                let value = T::from_sample(shape.sample(frame));
                out.iter_mut().for_each(|s| *s = value);
                frame += 1;
            }
        },
        |err| log::error!("tone: cpal stream error: {err}"),
        None,
    )
}

/// Body of the tone thread.  Returns once the tone has run its course or a
/// stop signal arrives; the stream is dropped on return.
fn run_tone(
    frequency_hz: f32,
    duration: Duration,
    volume: f32,
    stop_rx: std_mpsc::Receiver<()>,
) -> Result<(), AdapterError> {
    let fail = |e: &dyn std::fmt::Display| AdapterError::failed(AdapterKind::Tone, e.to_string());

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AdapterError::unavailable(AdapterKind::Tone, "no output device"))?;
    let supported = device.default_output_config().map_err(|e| fail(&e))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let rate = config.sample_rate.0;
    let shape = ToneShape {
        frequency_hz,
        volume,
        sample_rate: rate,
        total_frames: (duration.as_secs_f64() * rate as f64) as usize,
        fade_frames: (FADE.as_secs_f64() * rate as f64) as usize,
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, shape),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, shape),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, shape),
        other => {
            return Err(AdapterError::failed(
                AdapterKind::Tone,
                format!("unsupported output format {other:?}"),
            ))
        }
    }
    .map_err(|e| fail(&e))?;
    stream.play().map_err(|e| fail(&e))?;

    // Disconnected means the player was dropped: treat like stop.
    match stop_rx.recv_timeout(duration) {
        Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
            log::debug!("tone: stopped early");
        }
        Err(std_mpsc::RecvTimeoutError::Timeout) => {}
    }
    drop(stream);
    Ok(())
}

#[async_trait]
impl TonePlayer for CpalTonePlayer {
    async fn play(&self, frequency_hz: f32, duration: Duration) -> Result<(), AdapterError> {
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (done_tx, done_rx) = oneshot::channel();
        if let Ok(mut slot) = self.stop_tx.lock() {
            // Replacing the sender disconnects any earlier tone thread.
            *slot = Some(stop_tx);
        }

        let volume = self.volume;
        std::thread::Builder::new()
            .name("speech-drill-tone".into())
            .spawn(move || {
                let _ = done_tx.send(run_tone(frequency_hz, duration, volume, stop_rx));
            })
            .map_err(|e| AdapterError::failed(AdapterKind::Tone, e.to_string()))?;

        done_rx
            .await
            .map_err(|_| AdapterError::failed(AdapterKind::Tone, "tone thread vanished"))?
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.stop_tx.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(());
            }
        }
    }

    fn is_available(&self) -> bool {
        cpal::default_host().default_output_device().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_fades_both_ends() {
        assert_eq!(envelope(0, 100, 10), 0.0);
        assert!((envelope(5, 100, 10) - 0.5).abs() < 1e-6);
        assert_eq!(envelope(50, 100, 10), 1.0);
        assert!((envelope(95, 100, 10) - 0.5).abs() < 1e-6);
        assert_eq!(envelope(100, 100, 10), 0.0);
    }

    #[test]
    fn tone_is_silent_after_its_duration() {
        let shape = ToneShape {
            frequency_hz: 880.0,
            volume: 0.3,
            sample_rate: 48_000,
            total_frames: 480,
            fade_frames: 240,
        };
        assert_eq!(shape.sample(480), 0.0);
        assert!(shape.sample(300).abs() <= 0.3);
    }

    #[test]
    fn stop_without_play_is_noop() {
        let player = CpalTonePlayer::new(0.3);
        player.stop();
        player.stop();
    }
}
