use anyhow::{Context, Result, bail};
use audio2midi::{
    AnalysisConfig, Args, export_options_for, read_midi, transcribe_file, write_midi,
};
use clap::Parser;
use log::{debug, info, warn};

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    if let Err(why) = run(&args) {
        println!("Error: {:#}", why);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = AnalysisConfig::from_args(args);
    let notes = transcribe_file(&args.input, &args.output, args.velocity, &config)
        .with_context(|| format!("Failed to transcribe {}", args.input.display()))?;
    debug!("Transcribed {} note(s)..!", notes.len());

    if args.dry_run {
        info!("Previewing at most {} notes..!", args.dry_run_max);
        for (i, note) in notes.iter().take(args.dry_run_max).enumerate() {
            info!(
                "Note {}: midi={} onset={:.3}s duration={:.3}s velocity={}",
                i, note.midi_note, note.onset_time, note.duration, note.velocity
            );
        }
        return Ok(());
    }

    info!("Generating MIDI file: {}", args.output.display());
    write_midi(&notes, &args.output, &export_options_for(&args.input))?;

    if args.verify {
        let written = read_midi(&args.output)
            .with_context(|| format!("Failed to re-read {}", args.output.display()))?;

        if written.len() != notes.len() {
            bail!(
                "Wrote {} notes but read back {}..!",
                notes.len(),
                written.len()
            );
        }

        let drift = notes
            .iter()
            .zip(&written)
            .map(|(a, b)| (a.onset_time - b.onset_time).abs())
            .fold(0.0f64, f64::max);
        if drift > 0.002 {
            warn!("Written onsets drift up to {:.4}s from the transcription..!", drift);
        }
        info!("Verified {} note(s) in {}", written.len(), args.output.display());
    }

    info!("MIDI file generated successfully at: {}", args.output.display());

    Ok(())
}
