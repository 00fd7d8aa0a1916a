//! Conversion of raw device audio to the 16 kHz mono format used for
//! recognition and WAV export.
//!
//! Linear interpolation is plenty for speech that is only transcribed and
//! replayed, so no resampling crate is pulled in.

/// Sample rate of everything past the capture thread.
pub const TARGET_RATE: u32 = 16_000;

/// Average interleaved channels down to mono.
///
/// ```rust
/// use speech_drill::audio::downmix;
///
/// let mono = downmix(&[0.4, 0.2, -0.2, -0.4], 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Linearly resample mono `samples` from `source_rate` to [`TARGET_RATE`].
pub fn resample_to_16k(samples: &[f32], source_rate: u32) -> Vec<f32> {
    if source_rate == TARGET_RATE || source_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let step = source_rate as f64 / TARGET_RATE as f64;
    let out_len = (samples.len() as f64 / step).ceil() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

/// Device buffer → 16 kHz mono, in one step.
pub fn to_mono_16k(interleaved: &[f32], channels: u16, source_rate: u32) -> Vec<f32> {
    resample_to_16k(&downmix(interleaved, channels), source_rate)
}
