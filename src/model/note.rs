use serde::{Deserialize, Serialize};

/// Mono samples normalized to `[-1, 1]` at a fixed sample rate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Raw estimator output for a single analysis frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PitchFrame {
    pub time: f64,
    pub voiced: bool,
    pub frequency_hz: f64,
    pub confidence: f64,
}

/// A voiced frame quantized to the nearest semitone.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PitchPoint {
    pub time: f64,
    pub midi_note: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct OnsetSegment {
    pub onset_time: f64,
    pub duration: f64,
}

impl OnsetSegment {
    pub fn end_time(&self) -> f64 {
        self.onset_time + self.duration
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub onset_time: f64,
    pub duration: f64,
    pub midi_note: u8,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn end_time(&self) -> f64 {
        self.onset_time + self.duration
    }
}
