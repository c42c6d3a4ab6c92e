use crate::error::{Result, TranscribeError};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// C2
pub const DEFAULT_FMIN: f64 = 65.406;
/// C7
pub const DEFAULT_FMAX: f64 = 2093.005;
pub const DEFAULT_FRAME_SIZE: usize = 2048;
pub const DEFAULT_HOP_SIZE: usize = 512;
pub const DEFAULT_VELOCITY: i32 = 64;

#[derive(Parser, Debug)]
#[command(
    name = "audio2midi",
    about = "Convert MP3 or M4A audio files to MIDI format!"
)]
pub struct Args {
    /// Path to the input audio file (MP3 or M4A, WAV and FLAC also work).
    #[arg(long)]
    pub input: PathBuf,

    /// Path to save the output MIDI file (must end with .mid).
    #[arg(long)]
    pub output: PathBuf,

    /// MIDI note velocity (0-127).
    #[arg(long, default_value_t = DEFAULT_VELOCITY, allow_negative_numbers = true)]
    pub velocity: i32,

    /// Analysis window size in samples.
    #[arg(long, default_value_t = DEFAULT_FRAME_SIZE)]
    pub frame_size: usize,

    /// Hop between analysis frames in samples.
    #[arg(long, default_value_t = DEFAULT_HOP_SIZE)]
    pub hop_size: usize,

    /// Lowest fundamental frequency to track, in Hz.
    #[arg(long, default_value_t = DEFAULT_FMIN)]
    pub fmin: f64,

    /// Highest fundamental frequency to track, in Hz.
    #[arg(long, default_value_t = DEFAULT_FMAX)]
    pub fmax: f64,

    /// Dry run (print the first dry_run_max notes and exit without writing).
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,

    /// Maximum notes to print in dry run.
    #[arg(long, default_value_t = 80)]
    pub dry_run_max: usize,

    /// Re-read the written MIDI file and check it against the transcription.
    #[arg(long, default_value_t = false)]
    pub verify: bool,

    /// Prints extra information to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Frame grid and thresholds shared by the pitch estimator and onset segmenter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub frame_size: usize,
    pub hop_size: usize,
    pub fmin: f64,
    pub fmax: f64,

    /// YIN absolute threshold on the normalized difference.
    pub yin_threshold: f64,

    /// Frames whose confidence falls below this are unvoiced.
    pub voicing_threshold: f64,

    /// Frames quieter than this RMS are unvoiced without running YIN.
    pub silence_rms: f64,

    /// Minimum normalized novelty rise above the local mean for an onset.
    pub onset_delta: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            hop_size: DEFAULT_HOP_SIZE,
            fmin: DEFAULT_FMIN,
            fmax: DEFAULT_FMAX,
            yin_threshold: 0.15,
            voicing_threshold: 0.5,
            silence_rms: 1e-3,
            onset_delta: 0.07,
        }
    }
}

impl AnalysisConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            frame_size: args.frame_size,
            hop_size: args.hop_size,
            fmin: args.fmin,
            fmax: args.fmax,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_size < 4 {
            return Err(TranscribeError::InvalidInput(format!(
                "frame size must be at least 4 samples, got {}",
                self.frame_size
            )));
        }
        if self.hop_size == 0 {
            return Err(TranscribeError::InvalidInput(
                "hop size must be positive".into(),
            ));
        }
        if !(self.fmin.is_finite() && self.fmax.is_finite() && 0.0 < self.fmin && self.fmin < self.fmax)
        {
            return Err(TranscribeError::InvalidInput(format!(
                "frequency range must satisfy 0 < fmin < fmax, got [{}, {}]",
                self.fmin, self.fmax
            )));
        }
        Ok(())
    }
}
