mod aligner;
mod audio_loader;
mod error;
mod midi_exporter;
mod model;
mod normalizer;
mod onset_detector;
mod pipeline;
mod pitch_detector;
mod separator;
mod util;

pub use aligner::*;
pub use audio_loader::*;
pub use error::*;
pub use midi_exporter::*;
pub use model::config::*;
pub use model::note::*;
pub use normalizer::*;
pub use onset_detector::*;
pub use pipeline::*;
pub use pitch_detector::*;
pub use separator::*;
pub use util::*;
