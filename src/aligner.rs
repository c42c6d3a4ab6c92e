use crate::error::{Result, TranscribeError};
use crate::model::note::{NoteEvent, OnsetSegment, PitchPoint};
use crate::util::has_extension;
use log::{debug, warn};
use std::path::Path;

/// Middle C, used when there is no pitch track at all to look up.
pub const FALLBACK_NOTE: u8 = 60;
pub const MIDI_EXTENSION: &str = "mid";

/// Closest pitch point to `time`, first one winning ties.
pub fn nearest_pitch(pitches: &[PitchPoint], time: f64) -> Option<&PitchPoint> {
    let mut best: Option<&PitchPoint> = None;
    for point in pitches {
        match best {
            Some(current) if (point.time - time).abs() >= (current.time - time).abs() => {}
            _ => best = Some(point),
        }
    }
    best
}

pub fn validate_velocity(velocity: i32) -> Result<u8> {
    if !(0..=127).contains(&velocity) {
        return Err(TranscribeError::InvalidInput(format!(
            "velocity must be between 0 and 127, got {}",
            velocity
        )));
    }
    Ok(velocity as u8)
}

pub fn validate_output_path(output_path: &Path) -> Result<()> {
    if !has_extension(output_path, &[MIDI_EXTENSION]) {
        return Err(TranscribeError::InvalidInput(format!(
            "output file must have .{} extension: {}",
            MIDI_EXTENSION,
            output_path.display()
        )));
    }
    Ok(())
}

/// Combine a pitch track and onset segments into note events.
///
/// Each segment takes the note of the pitch point nearest its onset. Notes outside the
/// MIDI range are dropped with their segment. The same `velocity` is applied to every
/// note, and the result is sorted by onset time.
pub fn align_notes(
    pitches: &[PitchPoint],
    segments: &[OnsetSegment],
    output_path: &Path,
    velocity: i32,
) -> Result<Vec<NoteEvent>> {
    if pitches.is_empty() || segments.is_empty() {
        return Err(TranscribeError::InvalidInput(format!(
            "pitches or onsets list is empty ({} pitch points, {} onsets)",
            pitches.len(),
            segments.len()
        )));
    }
    validate_output_path(output_path)?;
    let velocity = validate_velocity(velocity)?;

    let mut events: Vec<NoteEvent> = Vec::with_capacity(segments.len());
    for segment in segments {
        let midi_note = nearest_pitch(pitches, segment.onset_time)
            .map(|point| point.midi_note)
            .unwrap_or(FALLBACK_NOTE);

        if midi_note > 127 {
            warn!(
                "Dropping out-of-range MIDI {} at {:.3}s..!",
                midi_note, segment.onset_time
            );
            continue;
        }

        events.push(NoteEvent {
            onset_time: segment.onset_time,
            duration: segment.duration,
            midi_note,
            velocity,
        });
    }

    events.sort_by(|a, b| a.onset_time.total_cmp(&b.onset_time));

    debug!(
        "Aligned {} note(s) from {} onsets and {} pitch points",
        events.len(),
        segments.len(),
        pitches.len()
    );

    Ok(events)
}

#[cfg(test)]
mod test {
    use super::*;

    fn point(time: f64, midi_note: u8) -> PitchPoint {
        PitchPoint { time, midi_note }
    }

    fn segment(onset_time: f64, duration: f64) -> OnsetSegment {
        OnsetSegment {
            onset_time,
            duration,
        }
    }

    #[test]
    fn picks_nearest_pitch_per_onset() {
        env_logger::try_init().unwrap_or(());

        let pitches = [point(0.0, 60), point(0.5, 64), point(1.0, 67)];
        let segments = [segment(0.1, 0.4), segment(0.45, 0.5), segment(0.95, 1.0)];

        let events = align_notes(&pitches, &segments, Path::new("out.mid"), 64).unwrap();
        assert_eq!(
            events.iter().map(|e| e.midi_note).collect::<Vec<_>>(),
            vec![60, 64, 67]
        );
        assert!(events.iter().all(|e| e.velocity == 64));
        assert_eq!(events[1].onset_time, 0.45);
        assert_eq!(events[1].duration, 0.5);
    }

    #[test]
    fn ties_go_to_the_earliest_point() {
        let pitches = [point(0.0, 60), point(1.0, 72)];
        assert_eq!(nearest_pitch(&pitches, 0.5).map(|p| p.midi_note), Some(60));

        let duplicates = [point(0.5, 61), point(0.5, 62)];
        assert_eq!(nearest_pitch(&duplicates, 0.5).map(|p| p.midi_note), Some(61));
        assert!(nearest_pitch(&[], 0.5).is_none());
    }

    #[test]
    fn output_is_sorted_and_never_longer_than_segments() {
        env_logger::try_init().unwrap_or(());

        let pitches = [point(0.0, 55), point(2.0, 57)];
        let segments = [segment(2.0, 0.5), segment(0.0, 1.0), segment(1.0, 1.0)];

        let events = align_notes(&pitches, &segments, Path::new("song.mid"), 100).unwrap();
        assert!(events.len() <= segments.len());
        assert!(events.windows(2).all(|w| w[0].onset_time < w[1].onset_time));

        let mut resorted = events.clone();
        resorted.sort_by(|a, b| a.onset_time.total_cmp(&b.onset_time));
        assert_eq!(resorted, events);
    }

    #[test]
    fn out_of_range_notes_are_dropped() {
        env_logger::try_init().unwrap_or(());

        let pitches = [point(0.0, 200), point(1.0, 62)];
        let segments = [segment(0.0, 1.0), segment(1.0, 1.0)];

        let events = align_notes(&pitches, &segments, Path::new("out.mid"), 64).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].midi_note, 62);
    }

    #[test]
    fn rejects_bad_velocity() {
        let pitches = [point(0.0, 69)];
        let segments = [segment(0.0, 2.0)];

        for velocity in [200, 128, -1] {
            assert!(matches!(
                align_notes(&pitches, &segments, Path::new("out.mid"), velocity),
                Err(TranscribeError::InvalidInput(_))
            ));
        }
        assert!(align_notes(&pitches, &segments, Path::new("out.mid"), 0).is_ok());
        assert!(align_notes(&pitches, &segments, Path::new("out.mid"), 127).is_ok());
    }

    #[test]
    fn rejects_wrong_extension() {
        let pitches = [point(0.0, 69)];
        let segments = [segment(0.0, 2.0)];

        for path in ["out.txt", "out", "out.midi"] {
            assert!(matches!(
                align_notes(&pitches, &segments, Path::new(path), 64),
                Err(TranscribeError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn rejects_empty_inputs() {
        let pitches = [point(0.0, 69)];
        let segments = [segment(0.0, 2.0)];

        assert!(matches!(
            align_notes(&[], &segments, Path::new("out.mid"), 64),
            Err(TranscribeError::InvalidInput(_))
        ));
        assert!(matches!(
            align_notes(&pitches, &[], Path::new("out.mid"), 64),
            Err(TranscribeError::InvalidInput(_))
        ));
    }
}
