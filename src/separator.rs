use crate::model::note::Waveform;
use log::debug;

/// Split a mix into stems. Source separation is not implemented, so the mix comes back
/// as its only stem and the transcription pipeline never calls this.
pub fn separate_sources(waveform: &Waveform) -> Vec<Waveform> {
    debug!("Source separation unavailable, returning the mix as a single stem");
    vec![waveform.clone()]
}
