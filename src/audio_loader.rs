use crate::error::{Result, TranscribeError};
use crate::util::has_extension;
use log::{debug, warn};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "flac"];

/// Decoded PCM exactly as the container stored it: interleaved, not yet normalized.
#[derive(Debug, Clone)]
pub struct RawAudio {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl RawAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }
}

/// Check that `path` is an existing file with one of the `allowed` extensions.
pub fn validate_file(path: &Path, allowed: &[&str]) -> Result<()> {
    if !path.is_file() {
        return Err(TranscribeError::NotFound(path.to_path_buf()));
    }
    if !has_extension(path, allowed) {
        return Err(TranscribeError::InvalidInput(format!(
            "unsupported file format {}. Allowed: {:?}",
            path.display(),
            allowed
        )));
    }
    Ok(())
}

/// Decode the first audio track of `path` into interleaved `f32` samples in memory.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<RawAudio> {
    let path = path.as_ref();
    validate_file(path, AUDIO_EXTENSIONS)?;

    let decode_err = |what: &str, e: SymphoniaError| {
        TranscribeError::Decode(format!("{} for {}: {}", what, path.display(), e))
    };

    let src = File::open(path).map_err(|e| {
        TranscribeError::Decode(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let format_result = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err("Unrecognized container", e))?;
    let mut format = format_result.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| {
            TranscribeError::Decode(format!("No audio track found in {}", path.display()))
        })?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(0);

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err("Unsupported codec", e))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err("Failed to read packet", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(why)) => {
                skipped += 1;
                debug!("Skipping undecodable packet: {}", why);
            }
            Err(e) => return Err(decode_err("Failed to decode packet", e)),
        }
    }

    if skipped > 0 {
        warn!(
            "Skipped {} corrupt packet(s) while decoding {}..!",
            skipped,
            path.display()
        );
    }

    if channels == 0 || sample_rate == 0 {
        return Err(TranscribeError::Decode(format!(
            "{} does not declare its channel layout or sample rate",
            path.display()
        )));
    }

    let audio = RawAudio {
        samples,
        channels,
        sample_rate,
    };
    debug!(
        "Decoded {} frame(s) of {} channel audio at {}Hz from {}",
        audio.frames(),
        audio.channels,
        audio.sample_rate,
        path.display()
    );

    Ok(audio)
}
