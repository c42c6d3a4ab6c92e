use crate::error::{Result, TranscribeError};
use crate::model::config::AnalysisConfig;
use crate::model::note::{OnsetSegment, Waveform};
use crate::pitch_detector::validate_waveform;
use log::{debug, warn};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

/// Segments shorter than this are detection noise, not notes.
pub const MIN_SEGMENT_SECS: f64 = 0.01;

const PRE_MAX_SECS: f64 = 0.03;
const POST_MAX_SECS: f64 = 0.0;
const PRE_AVG_SECS: f64 = 0.1;
const POST_AVG_SECS: f64 = 0.1;
const WAIT_SECS: f64 = 0.03;

/// Envelope values under this fraction of the peak are flattened to zero, so ripple in
/// a held note never forms a false minimum for backtracking.
const NOISE_FLOOR: f32 = 0.03;

/// Hann-windowed log-magnitude spectra over the hop grid.
///
/// Frame `t` holds the `frame_size` samples ending a quarter hop past grid point `t - 1`,
/// zero-padded before the first sample. A note is first seen by the frame after the
/// grid point at or after its start, which is where backtracking lands.
struct FrameSpectra<'a> {
    samples: &'a [f32],
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
}

impl<'a> FrameSpectra<'a> {
    fn new(samples: &'a [f32], frame_size: usize, hop: usize) -> Self {
        let window = (0..frame_size)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / frame_size as f32).cos())
            .collect();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(frame_size);

        Self {
            samples,
            hop,
            window,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); frame_size],
        }
    }

    fn bins(&self) -> usize {
        self.window.len() / 2 + 1
    }

    fn log_magnitudes(&mut self, frame: usize) -> Vec<f32> {
        let end = (frame * self.hop + self.hop / 4) as isize - self.hop as isize;
        let start = end - self.window.len() as isize;

        for (n, slot) in self.buffer.iter_mut().enumerate() {
            let sample = usize::try_from(start + n as isize)
                .ok()
                .and_then(|idx| self.samples.get(idx))
                .copied()
                .unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[n], 0.0);
        }

        self.fft.process(&mut self.buffer);

        let bins = self.bins();
        self.buffer[..bins]
            .iter()
            .map(|c| bin_magnitude(c).ln_1p())
            .collect()
    }
}

/// Half-wave rectified log spectral flux, normalized to `[0, 1]`.
///
/// Each bin is first held at its minimum over the next `ceil(frame_size / hop) + 1` frames.
/// A note that stops abruptly smears energy across the spectrum only while the cut
/// passes through the window, so the hold removes that burst while a new note, which
/// keeps sounding, still rises. The first frame is compared against silence.
pub fn onset_envelope(waveform: &Waveform, config: &AnalysisConfig) -> Result<Vec<f32>> {
    validate_waveform(waveform)?;
    config.validate()?;

    let hop = config.hop_size;
    let hold = config.frame_size.div_ceil(hop) + 1;
    let frame_count = 1 + waveform.samples.len() / hop;

    let mut spectra = FrameSpectra::new(&waveform.samples, config.frame_size, hop);
    let bins = spectra.bins();

    let mut pending: VecDeque<Vec<f32>> = VecDeque::with_capacity(hold);
    let mut next_frame = 0usize;
    let mut previous = vec![0.0f32; bins];
    let mut current = vec![0.0f32; bins];
    let mut envelope = Vec::with_capacity(frame_count);

    for i in 0..frame_count {
        while next_frame < frame_count && next_frame < i + hold {
            pending.push_back(spectra.log_magnitudes(next_frame));
            next_frame += 1;
        }

        current.fill(f32::INFINITY);
        for spectrum in pending.iter() {
            for (held, &value) in current.iter_mut().zip(spectrum) {
                *held = held.min(value);
            }
        }

        let flux = current
            .iter()
            .zip(&previous)
            .map(|(now, before)| (now - before).max(0.0))
            .sum::<f32>()
            / bins as f32;

        if !flux.is_finite() {
            return Err(TranscribeError::EstimationFailure(format!(
                "spectral flux is not finite at frame {}",
                i
            )));
        }

        envelope.push(flux);
        std::mem::swap(&mut previous, &mut current);
        pending.pop_front();
    }

    let min = envelope.iter().copied().fold(f32::INFINITY, f32::min);
    let max = envelope.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range > 0.0 {
        for value in envelope.iter_mut() {
            *value = (*value - min) / range;
            if *value < NOISE_FLOOR {
                *value = 0.0;
            }
        }
    } else {
        envelope.fill(0.0);
    }

    Ok(envelope)
}

fn bin_magnitude(c: &Complex<f32>) -> f32 {
    (c.re * c.re + c.im * c.im).sqrt()
}

fn secs_to_frames(secs: f64, sample_rate: u32, hop: usize) -> usize {
    ((secs * sample_rate as f64 / hop as f64).round() as usize).max(1)
}

/// Peak picking on the normalized envelope: local maximum, above the local mean by
/// `delta`, and more than `wait` frames after the previous peak.
fn pick_peaks(envelope: &[f32], sample_rate: u32, hop: usize, delta: f32) -> Vec<usize> {
    let pre_max = secs_to_frames(PRE_MAX_SECS, sample_rate, hop);
    let post_max = if POST_MAX_SECS > 0.0 {
        secs_to_frames(POST_MAX_SECS, sample_rate, hop)
    } else {
        0
    };
    let pre_avg = secs_to_frames(PRE_AVG_SECS, sample_rate, hop);
    let post_avg = secs_to_frames(POST_AVG_SECS, sample_rate, hop);
    let wait = secs_to_frames(WAIT_SECS, sample_rate, hop);

    let last_index = envelope.len().saturating_sub(1);
    let mut peaks: Vec<usize> = Vec::new();

    for (i, &value) in envelope.iter().enumerate() {
        let max_window = &envelope[i.saturating_sub(pre_max)..=(i + post_max).min(last_index)];
        if max_window.iter().any(|&v| v > value) {
            continue;
        }

        let avg_window = &envelope[i.saturating_sub(pre_avg)..=(i + post_avg).min(last_index)];
        let mean = avg_window.iter().sum::<f32>() / avg_window.len() as f32;
        if value < mean + delta {
            continue;
        }

        if let Some(&last) = peaks.last()
            && i - last <= wait
        {
            continue;
        }

        peaks.push(i);
    }

    peaks
}

/// Move each onset back to the nearest preceding local minimum of `energy`.
/// Frame 0 always counts as a minimum. Onsets that collapse onto the same minimum are
/// merged, so the result stays strictly increasing.
fn backtrack(onsets: &[usize], energy: &[f32]) -> Vec<usize> {
    let mut minima = vec![0usize];
    for i in 1..energy.len().saturating_sub(1) {
        if energy[i] <= energy[i - 1] && energy[i] < energy[i + 1] {
            minima.push(i);
        }
    }

    let mut result: Vec<usize> = Vec::with_capacity(onsets.len());
    for &onset in onsets {
        let idx = minima.partition_point(|&m| m <= onset);
        let frame = minima[idx.saturating_sub(1)];
        if result.last() != Some(&frame) {
            result.push(frame);
        }
    }

    result
}

/// Turn ascending onset times into segments running to the next onset (or the end of the
/// waveform for the last one), dropping anything shorter than `MIN_SEGMENT_SECS`.
///
/// Onsets within `MIN_SEGMENT_SECS` of the end are discarded first so the final segment
/// always ends exactly at `total_secs`.
pub fn segments_from_onsets(onset_times: &[f64], total_secs: f64) -> Vec<OnsetSegment> {
    let usable = onset_times
        .iter()
        .copied()
        .filter(|&t| t >= 0.0 && total_secs - t >= MIN_SEGMENT_SECS)
        .collect::<Vec<_>>();

    let mut segments = Vec::with_capacity(usable.len());
    for (i, &onset_time) in usable.iter().enumerate() {
        let end = usable.get(i + 1).copied().unwrap_or(total_secs);
        let duration = end - onset_time;

        if duration < MIN_SEGMENT_SECS {
            debug!(
                "Dropping {:.4}s segment at {:.4}s as detection noise",
                duration, onset_time
            );
            continue;
        }

        segments.push(OnsetSegment {
            onset_time,
            duration,
        });
    }

    segments
}

/// Detect note onsets and derive a duration for each.
pub fn detect_onsets(waveform: &Waveform, config: &AnalysisConfig) -> Result<Vec<OnsetSegment>> {
    let envelope = onset_envelope(waveform, config)?;
    let peaks = pick_peaks(
        &envelope,
        waveform.sample_rate,
        config.hop_size,
        config.onset_delta,
    );
    let frames = backtrack(&peaks, &envelope);

    let onset_times = frames
        .iter()
        .map(|&frame| (frame * config.hop_size) as f64 / waveform.sample_rate as f64)
        .collect::<Vec<_>>();

    let segments = segments_from_onsets(&onset_times, waveform.duration_secs());

    if segments.is_empty() {
        warn!("No note onsets found in {:.3}s of audio..!", waveform.duration_secs());
    } else {
        debug!(
            "Detected {} onset(s) ({} peaks before backtracking)",
            segments.len(),
            peaks.len()
        );
    }

    Ok(segments)
}
