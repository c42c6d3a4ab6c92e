use crate::error::{Result, TranscribeError};
use crate::model::note::NoteEvent;
use crate::util::ScratchFile;
use log::{debug, info, warn};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Fixed tick rate of the written stream, 1 tick = 2ms.
pub const TICKS_PER_SECOND: f64 = 500.0;

/// 250 ticks per quarter at 500_000us per quarter (120bpm) is exactly 500 ticks per second.
pub const TICKS_PER_QUARTER: u16 = 250;
pub const MICROS_PER_QUARTER: u32 = 500_000;

const MAX_DELTA_TICKS: u32 = (1 << 28) - 1;

/// A note-on with velocity 0 means note-off to every MIDI reader.
const MIN_NOTE_ON_VELOCITY: u8 = 1;
const DEFAULT_MPQN: u32 = 500_000;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub track_name: String,
    pub channel: u8,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            track_name: String::from("audio2midi"),
            channel: 0,
        }
    }
}

fn seconds_to_ticks(secs: f64) -> Result<u32> {
    let ticks = (secs * TICKS_PER_SECOND).round();

    if !ticks.is_finite() || ticks < 0.0 || ticks > MAX_DELTA_TICKS as f64 {
        return Err(TranscribeError::SerializationFailure(format!(
            "delta of {:.4}s cannot be encoded as a MIDI delta time",
            secs
        )));
    }

    Ok(ticks as u32)
}

fn note_message(on: bool, event: &NoteEvent) -> Result<MidiMessage> {
    if event.midi_note > 127 || event.velocity > 127 {
        return Err(TranscribeError::SerializationFailure(format!(
            "note {} / velocity {} is outside the MIDI range",
            event.midi_note, event.velocity
        )));
    }

    let key = u7::new(event.midi_note);
    Ok(if on {
        MidiMessage::NoteOn {
            key,
            vel: u7::new(event.velocity.max(MIN_NOTE_ON_VELOCITY)),
        }
    } else {
        MidiMessage::NoteOff {
            key,
            vel: u7::new(event.velocity),
        }
    })
}

/// Convert seconds-based notes into a delta-timed note-on/note-off stream.
///
/// Each note-on is delayed from the end of the previous note, each note-off from its own
/// note-on, both rounded to whole ticks. Silent notes (velocity 0) are struck at velocity 1
/// so they are not read back as note-offs; the note-off keeps the original velocity.
pub fn events_to_track<'a>(events: &[NoteEvent], channel: u8) -> Result<Vec<TrackEvent<'a>>> {
    if channel > 15 {
        return Err(TranscribeError::SerializationFailure(format!(
            "channel {} is outside 0..=15",
            channel
        )));
    }
    let channel = u4::new(channel);

    let mut ordered = events.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| a.onset_time.total_cmp(&b.onset_time));

    let mut track: Vec<TrackEvent<'a>> = Vec::with_capacity(ordered.len() * 2);
    let mut previous_time = 0.0f64;

    for event in ordered {
        let on_delta = seconds_to_ticks(event.onset_time - previous_time)?;
        let off_delta = seconds_to_ticks(event.duration)?;

        track.push(TrackEvent {
            delta: u28::new(on_delta),
            kind: TrackEventKind::Midi {
                channel,
                message: note_message(true, event)?,
            },
        });
        track.push(TrackEvent {
            delta: u28::new(off_delta),
            kind: TrackEventKind::Midi {
                channel,
                message: note_message(false, event)?,
            },
        });

        previous_time = event.onset_time + event.duration;
    }

    Ok(track)
}

/// Encode the notes as a single-track Standard MIDI File.
pub fn midi_bytes(events: &[NoteEvent], options: &ExportOptions) -> Result<Vec<u8>> {
    let notes = events_to_track(events, options.channel)?;

    let mut track: Vec<TrackEvent> = Vec::with_capacity(notes.len() + 3);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(options.track_name.as_bytes())),
    });
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(MICROS_PER_QUARTER))),
    });
    track.extend(notes);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
        ),
        tracks: vec![track],
    };

    let mut bytes: Vec<u8> = Vec::new();
    smf.write_std(&mut bytes)
        .map_err(|e| TranscribeError::SerializationFailure(format!("Failed to encode MIDI: {}", e)))?;

    Ok(bytes)
}

/// Write the notes to `path`. Nothing is left at `path` or beside it if any step fails.
pub fn write_midi<P: AsRef<Path>>(
    events: &[NoteEvent],
    path: P,
    options: &ExportOptions,
) -> Result<()> {
    let path = path.as_ref();
    let bytes = midi_bytes(events, options)?;

    let scratch = ScratchFile::beside(path);
    fs::write(scratch.path(), &bytes).map_err(|e| {
        TranscribeError::SerializationFailure(format!(
            "Failed to write MIDI file {}: {}",
            path.display(),
            e
        ))
    })?;
    scratch.persist(path).map_err(|e| {
        TranscribeError::SerializationFailure(format!(
            "Failed to move MIDI file into place at {}: {}",
            path.display(),
            e
        ))
    })?;

    info!(
        "Wrote {} note(s) ({} bytes) to {}",
        events.len(),
        bytes.len(),
        path.display()
    );

    Ok(())
}

#[derive(Debug, Clone)]
struct TempoSegment {
    mpqn: u32,
    start_tick: u64,
    secs_at_start: f64,
}

struct NoteInterval {
    midi: u8,
    start_tick: u64,
    end_tick: u64,
    velocity: u8,
}

/// Read note events back out of a MIDI file, honoring its time division and tempo map.
pub fn read_midi<P: AsRef<Path>>(path: P) -> Result<Vec<NoteEvent>> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        TranscribeError::SerializationFailure(format!(
            "Failed to read MIDI file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    midi_bytes_to_events(&bytes)
}

pub fn midi_bytes_to_events(bytes: &[u8]) -> Result<Vec<NoteEvent>> {
    let smf = Smf::parse(bytes)
        .map_err(|e| TranscribeError::SerializationFailure(format!("Failed to parse MIDI: {:?}", e)))?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u64,
        Timing::Timecode(_fps, _subframe) => {
            return Err(TranscribeError::SerializationFailure(
                "SMPTE timecode midi timing is not supported..!".into(),
            ));
        }
    };
    if ticks_per_quarter == 0 {
        return Err(TranscribeError::SerializationFailure(
            "MIDI header declares zero ticks per quarter note".into(),
        ));
    }

    let mut tempo_changes: Vec<(u64, u32)> = vec![(0, DEFAULT_MPQN)];
    let mut intervals: Vec<NoteInterval> = Vec::new();
    let mut open_notes: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
    let mut last_tick: u64 = 0;

    for track in smf.tracks.iter() {
        let mut abs_tick: u64 = 0;
        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);

            match &event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(micro)) => {
                    tempo_changes.push((abs_tick, micro.as_int()));
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open_notes
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push((abs_tick, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            close_note(&mut open_notes, &mut intervals, ch, key.as_int(), abs_tick);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        last_tick = last_tick.max(abs_tick);
    }

    for ((ch, key), stack) in open_notes.into_iter() {
        for (start_tick, velocity) in stack {
            warn!(
                "Unclosed NoteOn for {}, channel: {} at tick: {} auto-closing at: {}..!",
                key, ch, start_tick, last_tick
            );
            intervals.push(NoteInterval {
                midi: key,
                start_tick,
                end_tick: last_tick.max(start_tick),
                velocity,
            });
        }
    }

    // stable sort keeps the default tempo ahead of an explicit one at tick 0
    tempo_changes.sort_by_key(|(tick, _)| *tick);
    let mut segments: Vec<TempoSegment> = Vec::with_capacity(tempo_changes.len());
    let mut secs_accum = 0.0;
    let mut prev_tick = 0u64;
    let mut prev_mpqn = DEFAULT_MPQN;
    for (tick, mpqn) in tempo_changes {
        secs_accum += (tick - prev_tick) as f64 * prev_mpqn as f64 / ticks_per_quarter as f64 / 1e6;
        segments.push(TempoSegment {
            mpqn,
            start_tick: tick,
            secs_at_start: secs_accum,
        });
        prev_tick = tick;
        prev_mpqn = mpqn;
    }

    let ticks_to_secs = |tick: u64| -> f64 {
        let segment = segments
            .iter()
            .rfind(|seg| seg.start_tick <= tick)
            .unwrap_or(&segments[0]);
        segment.secs_at_start
            + (tick - segment.start_tick) as f64 * segment.mpqn as f64
                / ticks_per_quarter as f64
                / 1e6
    };

    let mut events = intervals
        .into_iter()
        .filter(|interval| interval.end_tick > interval.start_tick)
        .map(|interval| {
            let onset_time = ticks_to_secs(interval.start_tick);
            NoteEvent {
                onset_time,
                duration: ticks_to_secs(interval.end_tick) - onset_time,
                midi_note: interval.midi,
                velocity: interval.velocity,
            }
        })
        .collect::<Vec<_>>();

    events.sort_by(|a, b| a.onset_time.total_cmp(&b.onset_time));
    debug!("Read {} note(s) back from MIDI", events.len());

    Ok(events)
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), Vec<(u64, u8)>>,
    intervals: &mut Vec<NoteInterval>,
    ch: u8,
    midi: u8,
    abs_tick: u64,
) {
    if let Some((start_tick, velocity)) = open_notes.get_mut(&(ch, midi)).and_then(|stack| stack.pop()) {
        intervals.push(NoteInterval {
            midi,
            start_tick,
            end_tick: abs_tick,
            velocity,
        });
    } else {
        debug!("Orphaned NoteOff for {} ch{} at tick {}..!", midi, ch, abs_tick);
    }
}
