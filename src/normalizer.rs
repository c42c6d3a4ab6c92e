use crate::error::{Result, TranscribeError};
use crate::model::note::Waveform;
use log::debug;

/// Downmix interleaved samples to mono and scale them so the loudest sample hits 1.0.
///
/// Each complete frame of `channels` interleaved samples becomes the arithmetic mean of
/// its channels. A trailing incomplete frame is discarded. Non-finite samples count as
/// silence. Silent input stays all-zero instead of being divided by a zero peak.
pub fn normalize(samples: &[f32], channels: usize, sample_rate: u32) -> Result<Waveform> {
    if channels == 0 {
        return Err(TranscribeError::InvalidInput(
            "channel count must be positive".into(),
        ));
    }
    if sample_rate == 0 {
        return Err(TranscribeError::InvalidInput(
            "sample rate must be positive".into(),
        ));
    }

    let mut mono: Vec<f32> = if channels == 1 {
        samples.iter().map(|&s| finite_or_zero(s)).collect()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().map(|&s| finite_or_zero(s)).sum::<f32>() / channels as f32)
            .collect()
    };

    let peak = mono.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        for s in mono.iter_mut() {
            *s /= peak;
        }
    } else {
        debug!("Waveform is silent, skipping peak normalization..!");
    }

    debug!(
        "Normalized {} channel(s) into {} mono samples at {} Hz (peak was {:.5})",
        channels,
        mono.len(),
        sample_rate,
        peak
    );

    Ok(Waveform {
        samples: mono,
        sample_rate,
    })
}

fn finite_or_zero(s: f32) -> f32 {
    if s.is_finite() { s } else { 0.0 }
}
