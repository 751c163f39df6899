//! # pluck - live note onset detection
//!
//! Listens to an instrument (or replays a recording) and prints one line per
//! picked note. The analysis runs in `pluck-core`; this binary only wires
//! up the input, the configuration and the output.

mod output;
mod wav;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pluck_core::tuning::NoteTable;
use pluck_core::{Pipeline, PracticeConfig, SamplingLoop};

use output::PrintSink;
use wav::WavFrameSource;

/// Note onset detection for instrument practice
#[derive(Parser)]
#[command(name = "pluck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by the commands that run the pipeline.
#[derive(clap::Args)]
struct SessionArgs {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reference pitch for A4 in Hz
    #[arg(long)]
    reference: Option<f32>,

    /// notes.json file to quantize against instead of equal temperament
    #[arg(long)]
    notes: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

impl SessionArgs {
    fn load_config(&self) -> Result<PracticeConfig> {
        let mut config = match &self.config {
            Some(path) => PracticeConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PracticeConfig::default(),
        };
        if let Some(reference) = self.reference {
            config.reference_pitch = reference;
        }
        if let Some(notes) = &self.notes {
            config.note_table = Some(notes.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Listen to the default input device and print onsets
    Listen {
        #[command(flatten)]
        session: SessionArgs,

        /// Stop after this many seconds instead of waiting for Enter
        #[arg(short, long)]
        duration: Option<f64>,
    },
    /// Replay a WAV file through the pipeline
    File {
        /// Input audio file (WAV)
        input: PathBuf,

        #[command(flatten)]
        session: SessionArgs,
    },
    /// Print the note table
    Table {
        /// Reference pitch for A4 in Hz
        #[arg(long, default_value_t = 440.0)]
        reference: f32,

        /// notes.json file to print instead of equal temperament
        #[arg(long)]
        notes: Option<PathBuf>,
    },
    /// Show the default configuration
    ShowConfig,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Listen { session, duration } => listen(&session, duration),
        Commands::File { input, session } => replay(&input, &session),
        Commands::Table { reference, notes } => print_table(reference, notes),
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&PracticeConfig::default())?);
            Ok(())
        }
    }
}

fn replay(input: &Path, session: &SessionArgs) -> Result<()> {
    let config = session.load_config()?;
    let table = config.note_table().context("building note table")?;
    let source = WavFrameSource::open(input, config.frame_size, config.tick_interval())?;
    let estimator = config.estimator(source.sample_rate());
    let pipeline = Pipeline::with_config(&config, table, estimator)?;

    let mut sampling = SamplingLoop::new(source, pipeline, PrintSink::new(session.json));
    let stats = sampling.run_to_end();
    log::info!(
        "[FILE] {} frames, {} silent, {} unpitched, {} onsets",
        stats.frames,
        stats.silent,
        stats.unpitched,
        stats.onsets
    );
    Ok(())
}

#[cfg(feature = "mic")]
fn listen(session: &SessionArgs, duration: Option<f64>) -> Result<()> {
    use pluck_core::audio::AudioContext;
    use std::time::Duration;

    let config = session.load_config()?;
    let table = config.note_table().context("building note table")?;

    let (context, source) = AudioContext::open(config.frame_size)?;
    let estimator = config.estimator(context.sample_rate());
    let pipeline = Pipeline::with_config(&config, table, estimator)?;
    let handle = SamplingLoop::new(source, pipeline, PrintSink::new(session.json))
        .spawn(config.tick_interval())?;

    match duration {
        Some(seconds) => std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0))),
        None => {
            eprintln!("Listening on {}. Press Enter to stop.", context.device_name());
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
        }
    }

    if let Some(stopped) = handle.stop() {
        log::info!("[MAIN] Session finished: {:?}", stopped.stats());
    }
    context.close()?;
    Ok(())
}

#[cfg(not(feature = "mic"))]
fn listen(_session: &SessionArgs, _duration: Option<f64>) -> Result<()> {
    anyhow::bail!("this build has no microphone support; rebuild with `--features mic`")
}

fn print_table(reference: f32, notes: Option<PathBuf>) -> Result<()> {
    let table = match notes {
        Some(path) => NoteTable::load(&path, reference)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NoteTable::equal_temperament(reference)?,
    };
    for entry in table.entries() {
        println!("{:<4} {:>9.3} Hz", entry.note, entry.frequency);
    }
    Ok(())
}
