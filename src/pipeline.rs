use crate::aligner::{align_notes, validate_output_path, validate_velocity};
use crate::audio_loader::load_audio;
use crate::error::Result;
use crate::midi_exporter::{ExportOptions, write_midi};
use crate::model::config::AnalysisConfig;
use crate::model::note::{NoteEvent, Waveform};
use crate::normalizer::normalize;
use crate::onset_detector::detect_onsets;
use crate::pitch_detector::detect_pitches;
use log::info;
use std::path::Path;

/// Decode an audio file and normalize it into a mono waveform.
pub fn load_waveform<P: AsRef<Path>>(path: P) -> Result<Waveform> {
    let raw = load_audio(path)?;
    normalize(&raw.samples, raw.channels, raw.sample_rate)
}

/// Run pitch estimation, onset segmentation and alignment over a normalized waveform.
pub fn transcribe(
    waveform: &Waveform,
    config: &AnalysisConfig,
    output_path: &Path,
    velocity: i32,
) -> Result<Vec<NoteEvent>> {
    info!("Detecting pitches...");
    let pitches = detect_pitches(waveform, config)?;

    info!("Detecting note onsets...");
    let onsets = detect_onsets(waveform, config)?;

    align_notes(&pitches, &onsets, output_path, velocity)
}

/// Validate the request, then load and transcribe `input` without writing anything.
pub fn transcribe_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    velocity: i32,
    config: &AnalysisConfig,
) -> Result<Vec<NoteEvent>> {
    let input = input.as_ref();
    let output = output.as_ref();

    // reject a bad request before spending time on decoding
    validate_output_path(output)?;
    validate_velocity(velocity)?;
    config.validate()?;

    info!("Loading audio file: {}", input.display());
    let waveform = load_waveform(input)?;
    info!(
        "Audio loaded with sample rate: {} Hz ({:.2}s)",
        waveform.sample_rate,
        waveform.duration_secs()
    );

    transcribe(&waveform, config, output, velocity)
}

/// Export options naming the MIDI track after the source file.
pub fn export_options_for(input: &Path) -> ExportOptions {
    ExportOptions {
        track_name: input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap_or_default(),
        ..ExportOptions::default()
    }
}

/// Load `input`, transcribe it, and write the notes to `output`.
pub fn convert_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    velocity: i32,
    config: &AnalysisConfig,
) -> Result<Vec<NoteEvent>> {
    let notes = transcribe_file(input.as_ref(), output.as_ref(), velocity, config)?;

    info!("Generating MIDI file: {}", output.as_ref().display());
    write_midi(&notes, output.as_ref(), &export_options_for(input.as_ref()))?;

    Ok(notes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::TranscribeError;
    use crate::midi_exporter::{midi_bytes, midi_bytes_to_events, read_midi};
    use crate::pitch_detector::test::sine;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("audio2midi-pipeline-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn steady_a4_becomes_one_note() {
        env_logger::try_init().unwrap_or(());

        let wave = sine(440.0, 2.0, 16000);
        let notes = transcribe(&wave, &AnalysisConfig::default(), Path::new("a4.mid"), 90).unwrap();

        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].onset_time, 0.0);
        assert!((notes[0].duration - 2.0).abs() < 1e-9);
        assert_eq!(notes[0].midi_note, 69);
        assert_eq!(notes[0].velocity, 90);
    }

    #[test]
    fn two_notes_split_by_a_rest() {
        env_logger::try_init().unwrap_or(());

        let mut samples = sine(440.0, 0.5, 16000).samples;
        samples.extend(std::iter::repeat_n(0.0, 4000));
        samples.extend(sine(523.25, 0.75, 16000).samples);
        let wave = Waveform {
            samples,
            sample_rate: 16000,
        };

        let notes = transcribe(&wave, &AnalysisConfig::default(), Path::new("two.mid"), 64).unwrap();
        assert_eq!(
            notes.iter().map(|n| n.midi_note).collect::<Vec<_>>(),
            vec![69, 72]
        );
        assert!((notes[1].onset_time - 0.75).abs() < 0.1);
        assert!((notes[1].end_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn quieter_second_note_keeps_its_pitch() {
        env_logger::try_init().unwrap_or(());

        let mut samples = sine(440.0, 1.0, 16000).samples;
        samples.extend(sine(659.26, 1.0, 16000).samples.iter().map(|s| s * 0.6));
        let wave = Waveform {
            samples,
            sample_rate: 16000,
        };

        let notes = transcribe(&wave, &AnalysisConfig::default(), Path::new("legato.mid"), 0).unwrap();
        assert_eq!(
            notes.iter().map(|n| n.midi_note).collect::<Vec<_>>(),
            vec![69, 76]
        );
        assert!(notes.iter().all(|n| n.velocity == 0));

        // silent notes still come back out of the file
        let bytes = midi_bytes(&notes, &ExportOptions::default()).unwrap();
        let decoded = midi_bytes_to_events(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].midi_note, 76);
    }

    #[test]
    fn empty_waveform_fails_fast() {
        let wave = Waveform {
            samples: Vec::new(),
            sample_rate: 44100,
        };
        assert!(matches!(
            transcribe(&wave, &AnalysisConfig::default(), Path::new("x.mid"), 64),
            Err(TranscribeError::InvalidInput(_))
        ));
    }

    #[test]
    fn silent_audio_has_nothing_to_align() {
        let wave = Waveform {
            samples: vec![0.0; 16000],
            sample_rate: 16000,
        };
        assert!(matches!(
            transcribe(&wave, &AnalysisConfig::default(), Path::new("x.mid"), 64),
            Err(TranscribeError::InvalidInput(_))
        ));
    }

    #[test]
    fn wav_file_to_midi_file() {
        env_logger::try_init().unwrap_or(());

        let dir = scratch_dir("convert");
        let input = dir.join("a4.wav");
        let output = dir.join("a4.mid");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&input, spec).unwrap();
        for s in sine(440.0, 2.0, 16000).samples {
            writer.write_sample((s * 0.5 * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let notes = convert_file(&input, &output, 64, &AnalysisConfig::default()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].midi_note, 69);

        let decoded = read_midi(&output).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].midi_note, 69);
        assert_eq!(decoded[0].velocity, 64);
        assert!(decoded[0].onset_time.abs() < 1e-9);
        assert!((decoded[0].duration - 2.0).abs() < 0.002 + 1e-9);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn bad_request_is_rejected_before_decoding() {
        let missing = Path::new("no/such/input.mp3");

        assert!(matches!(
            convert_file(missing, "out.txt", 64, &AnalysisConfig::default()),
            Err(TranscribeError::InvalidInput(_))
        ));
        assert!(matches!(
            convert_file(missing, "out.mid", 200, &AnalysisConfig::default()),
            Err(TranscribeError::InvalidInput(_))
        ));
        assert!(matches!(
            convert_file(missing, "out.mid", 64, &AnalysisConfig::default()),
            Err(TranscribeError::NotFound(_))
        ));
    }
}
