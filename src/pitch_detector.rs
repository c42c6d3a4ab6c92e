use crate::error::{Result, TranscribeError};
use crate::model::config::AnalysisConfig;
use crate::model::note::{PitchFrame, PitchPoint, Waveform};
use log::{debug, warn};

/// Convert a frequency to the nearest MIDI semitone (A4 = 440Hz = 69).
pub fn frequency_to_midi(freq: f64) -> Option<u8> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }

    let midi = (69.0 + 12.0 * (freq / 440.0).log2()).round();
    if (0.0..=127.0).contains(&midi) {
        Some(midi as u8)
    } else {
        None
    }
}

pub(crate) fn validate_waveform(waveform: &Waveform) -> Result<()> {
    if waveform.is_empty() {
        return Err(TranscribeError::InvalidInput(
            "invalid waveform: no samples".into(),
        ));
    }
    if waveform.sample_rate == 0 {
        return Err(TranscribeError::InvalidInput(
            "sample rate must be positive".into(),
        ));
    }
    Ok(())
}

/// YIN fundamental frequency estimator with reusable scratch buffers.
struct Yin {
    sample_rate: f64,
    fmin: f64,
    fmax: f64,
    /// Length of the integration window, half of the frame.
    window: usize,
    min_tau: usize,
    max_tau: usize,
    threshold: f64,
    voicing_threshold: f64,
    silence_rms: f64,
    diff: Vec<f64>,
    cmndf: Vec<f64>,
}

impl Yin {
    fn new(sample_rate: u32, config: &AnalysisConfig) -> Result<Self> {
        let sample_rate = sample_rate as f64;
        let window = config.frame_size / 2;

        let min_tau = ((sample_rate / config.fmax).floor() as usize).max(2);
        let wanted_max_tau = (sample_rate / config.fmin).ceil() as usize;
        let max_tau = wanted_max_tau.min(window - 1);

        if max_tau < wanted_max_tau {
            warn!(
                "Frame size {} is too short to resolve {:.3}Hz at {}Hz, lowest trackable pitch is {:.3}Hz..!",
                config.frame_size,
                config.fmin,
                sample_rate,
                sample_rate / max_tau as f64
            );
        }

        if min_tau >= max_tau {
            return Err(TranscribeError::EstimationFailure(format!(
                "no lag range left for [{}, {}]Hz at {}Hz with frame size {}",
                config.fmin, config.fmax, sample_rate, config.frame_size
            )));
        }

        Ok(Self {
            sample_rate,
            fmin: config.fmin,
            fmax: config.fmax,
            window,
            min_tau,
            max_tau,
            threshold: config.yin_threshold,
            voicing_threshold: config.voicing_threshold,
            silence_rms: config.silence_rms,
            diff: vec![0.0; max_tau + 2],
            cmndf: vec![1.0; max_tau + 2],
        })
    }

    /// Returns `(frequency_hz, confidence)`; frequency is NaN when nothing was found.
    fn process(&mut self, frame: &[f64]) -> (f64, f64) {
        let integrated = &frame[..self.window];
        let rms = (integrated.iter().map(|s| s * s).sum::<f64>() / self.window as f64).sqrt();
        if rms < self.silence_rms {
            return (f64::NAN, 0.0);
        }

        self.difference(frame);
        self.normalize_difference();

        let tau = self.best_tau();
        let confidence = 1.0 - self.cmndf[tau].clamp(0.0, 1.0);
        let frequency = self.sample_rate / self.refine(tau);

        (frequency, confidence)
    }

    /// Number of leading frame samples the difference function reads.
    fn span(&self) -> usize {
        self.window + self.max_tau + 1
    }

    fn difference(&mut self, frame: &[f64]) {
        self.diff[0] = 0.0;
        for tau in 1..self.diff.len() {
            let mut sum = 0.0;
            for j in 0..self.window {
                let d = frame[j] - frame[j + tau];
                sum += d * d;
            }
            self.diff[tau] = sum;
        }
    }

    fn normalize_difference(&mut self) {
        self.cmndf[0] = 1.0;
        let mut running = 0.0;
        for tau in 1..self.cmndf.len() {
            running += self.diff[tau];
            self.cmndf[tau] = if running > 0.0 {
                self.diff[tau] * tau as f64 / running
            } else {
                1.0
            };
        }
    }

    /// First dip under the absolute threshold, followed down to its local minimum.
    /// Falls back to the global minimum of the lag range.
    fn best_tau(&self) -> usize {
        let mut tau = self.min_tau;
        while tau <= self.max_tau {
            if self.cmndf[tau] < self.threshold {
                while tau < self.max_tau && self.cmndf[tau + 1] < self.cmndf[tau] {
                    tau += 1;
                }
                return tau;
            }
            tau += 1;
        }

        let mut best = self.min_tau;
        for tau in self.min_tau..=self.max_tau {
            if self.cmndf[tau] < self.cmndf[best] {
                best = tau;
            }
        }
        best
    }

    fn refine(&self, tau: usize) -> f64 {
        let s0 = self.cmndf[tau - 1];
        let s1 = self.cmndf[tau];
        let s2 = self.cmndf[tau + 1];

        let adjustment = (s0 - s2) / (2.0 * (s0 - 2.0 * s1 + s2));
        if adjustment.is_finite() && adjustment.abs() < 1.0 {
            tau as f64 + adjustment
        } else {
            tau as f64
        }
    }

    fn is_voiced(&self, frequency: f64, confidence: f64) -> bool {
        frequency.is_finite()
            && confidence >= self.voicing_threshold
            && (self.fmin..=self.fmax).contains(&frequency)
    }
}

/// Run the estimator over every frame of the waveform, voiced or not.
///
/// Frames are not centered: frame `i` starts at sample `i * hop` and is stamped at
/// `i * hop / sample_rate`. A frame is only analysed while every sample the difference
/// function reads (half a frame plus the longest lag) lies inside the waveform, so the
/// last frame starts up to `frame_size / 2 + max_lag + hop` samples before the end and
/// onsets in that tail take their pitch from it. A waveform shorter than that is
/// zero-padded into a single frame.
pub fn estimate_frames(waveform: &Waveform, config: &AnalysisConfig) -> Result<Vec<PitchFrame>> {
    validate_waveform(waveform)?;
    config.validate()?;

    let mut yin = Yin::new(waveform.sample_rate, config)?;
    let samples = &waveform.samples;
    let frame_size = config.frame_size;
    let hop = config.hop_size;

    let span = yin.span();
    let frame_count = if samples.len() < span {
        1
    } else {
        (samples.len() - span) / hop + 1
    };

    let mut buffer = vec![0.0f64; frame_size];
    let mut frames = Vec::with_capacity(frame_count);

    for i in 0..frame_count {
        let start = i * hop;
        let end = (start + frame_size).min(samples.len());

        buffer.fill(0.0);
        for (dst, &src) in buffer.iter_mut().zip(&samples[start..end]) {
            *dst = src as f64;
        }

        let (frequency, confidence) = yin.process(&buffer);
        if confidence.is_nan() {
            return Err(TranscribeError::EstimationFailure(format!(
                "pitch confidence became NaN at frame {}",
                i
            )));
        }

        frames.push(PitchFrame {
            time: (i * hop) as f64 / waveform.sample_rate as f64,
            voiced: yin.is_voiced(frequency, confidence),
            frequency_hz: frequency,
            confidence,
        });
    }

    Ok(frames)
}

/// Estimate the pitch track and quantize voiced frames to MIDI notes.
/// Unvoiced frames are dropped entirely.
pub fn detect_pitches(waveform: &Waveform, config: &AnalysisConfig) -> Result<Vec<PitchPoint>> {
    let frames = estimate_frames(waveform, config)?;
    let total = frames.len();

    let points = frames
        .into_iter()
        .filter(|frame| frame.voiced)
        .filter_map(|frame| {
            frequency_to_midi(frame.frequency_hz).map(|midi_note| PitchPoint {
                time: frame.time,
                midi_note,
            })
        })
        .collect::<Vec<_>>();

    debug!(
        "Pitch track: {} of {} frames voiced (hop {} @ {}Hz)",
        points.len(),
        total,
        config.hop_size,
        waveform.sample_rate
    );

    Ok(points)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::f32::consts::PI;

    pub(crate) fn sine(freq: f32, secs: f32, sample_rate: u32) -> Waveform {
        let len = (secs * sample_rate as f32).round() as usize;
        let samples = (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        Waveform {
            samples,
            sample_rate,
        }
    }

    #[test]
    fn frequency_quantization() {
        assert_eq!(frequency_to_midi(440.0), Some(69));
        assert_eq!(frequency_to_midi(261.63), Some(60));
        assert_eq!(frequency_to_midi(452.0), Some(69));
        assert_eq!(frequency_to_midi(0.0), None);
        assert_eq!(frequency_to_midi(f64::NAN), None);
        assert_eq!(frequency_to_midi(f64::INFINITY), None);
        assert_eq!(frequency_to_midi(20_000.0), None);
    }

    #[test]
    fn steady_a4_is_midi_69() {
        env_logger::try_init().unwrap_or(());

        let wave = sine(440.0, 2.0, 16000);
        let points = detect_pitches(&wave, &AnalysisConfig::default()).unwrap();

        assert!(!points.is_empty());
        assert!(points.iter().all(|p| p.midi_note == 69));
        assert_eq!(points[0].time, 0.0);
    }

    #[test]
    fn lower_pitches_track_without_octave_errors() {
        env_logger::try_init().unwrap_or(());

        let config = AnalysisConfig::default();
        for (freq, expected) in [(110.0, 45), (220.0, 57), (261.63, 60), (880.0, 81)] {
            let points = detect_pitches(&sine(freq, 0.5, 16000), &config).unwrap();
            assert!(!points.is_empty(), "no voiced frames for {}Hz", freq);
            assert!(
                points.iter().all(|p| p.midi_note == expected),
                "expected {} for {}Hz, got {:?}",
                expected,
                freq,
                points.iter().map(|p| p.midi_note).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn frames_follow_hop_grid() {
        env_logger::try_init().unwrap_or(());

        let config = AnalysisConfig::default();
        let wave = sine(330.0, 1.0, 8000);
        let frames = estimate_frames(&wave, &config).unwrap();

        // half frame of 1024 plus lags up to ceil(8000 / 65.406) = 123
        assert_eq!(frames.len(), (8000 - 1148) / 512 + 1);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.time, (i * 512) as f64 / 8000.0);
        }
        assert!(frames.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn short_trailing_note_gets_its_own_frame() {
        env_logger::try_init().unwrap_or(());

        // 0.12s of E5 is shorter than a whole frame
        let mut samples = sine(440.0, 1.0, 16000).samples;
        samples.extend(sine(659.26, 0.12, 16000).samples);
        let wave = Waveform {
            samples,
            sample_rate: 16000,
        };

        let points = detect_pitches(&wave, &AnalysisConfig::default()).unwrap();
        let last = points.last().unwrap();
        assert_eq!(last.midi_note, 76);
        assert!(last.time >= 1.0);
    }

    #[test]
    fn silence_is_unvoiced() {
        env_logger::try_init().unwrap_or(());

        let wave = Waveform {
            samples: vec![0.0; 16000],
            sample_rate: 16000,
        };
        let frames = estimate_frames(&wave, &AnalysisConfig::default()).unwrap();
        assert!(frames.iter().all(|f| !f.voiced && f.frequency_hz.is_nan()));
        assert!(detect_pitches(&wave, &AnalysisConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn short_waveform_is_one_padded_frame() {
        env_logger::try_init().unwrap_or(());

        let wave = sine(440.0, 0.05, 16000);
        let frames = estimate_frames(&wave, &AnalysisConfig::default()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].time, 0.0);
    }

    #[test]
    fn empty_or_rateless_waveform_is_invalid() {
        let empty = Waveform {
            samples: Vec::new(),
            sample_rate: 16000,
        };
        assert!(matches!(
            detect_pitches(&empty, &AnalysisConfig::default()),
            Err(TranscribeError::InvalidInput(_))
        ));

        let rateless = Waveform {
            samples: vec![0.5; 128],
            sample_rate: 0,
        };
        assert!(matches!(
            detect_pitches(&rateless, &AnalysisConfig::default()),
            Err(TranscribeError::InvalidInput(_))
        ));
    }

    #[test]
    fn unresolvable_range_is_an_estimation_failure() {
        let config = AnalysisConfig {
            frame_size: 8,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            detect_pitches(&sine(440.0, 0.1, 8000), &config),
            Err(TranscribeError::EstimationFailure(_))
        ));
    }
}
