use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;

use vibration_sentry::config::{DetectionConfig, Sensitivity};
use vibration_sentry::data::load_file;
use vibration_sentry::detect::FineDetector;
use vibration_sentry::ingest::{spawn_ingest, IngestContext, READ_CHUNK};
use vibration_sentry::pipeline::{ClockSource, DetectionEvent, Pipeline, Verdict};
use vibration_sentry::protocol::{Frame, FrameDecoder, HostCommand};
use vibration_sentry::sink::{send_command, AlarmSink, CommandAlarm, JsonLinesSink, StatusCsvSink};

/// Vibration telemetry decoder and mining-activity detector.
#[derive(Parser)]
#[command(name = "vibration-sentry", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the detection pipeline over a byte stream and print events as JSON lines.
    Run(RunArgs),
    /// Classify recorded spectra (.json, .csv or .parquet).
    Classify(ClassifyArgs),
    /// Decode a capture and summarise each frame.
    Decode {
        /// Capture file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        input: String,
    },
    /// Write a single host command byte to the device.
    Send {
        /// Serial device node (or file) to write to.
        #[arg(long)]
        output: PathBuf,
        #[arg(value_enum)]
        command: CommandArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CommandArg {
    /// Start the remote alarm cycle.
    Alarm,
    /// Ask for a status reply.
    Status,
}

impl From<CommandArg> for HostCommand {
    fn from(arg: CommandArg) -> Self {
        match arg {
            CommandArg::Alarm => HostCommand::TriggerAlarm,
            CommandArg::Status => HostCommand::QueryStatus,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ClockArg {
    Wall,
    Device,
}

impl From<ClockArg> for ClockSource {
    fn from(arg: ClockArg) -> Self {
        match arg {
            ClockArg::Wall => ClockSource::Wall,
            ClockArg::Device => ClockSource::Device,
        }
    }
}

#[derive(clap::Args)]
struct RunArgs {
    /// Byte source (capture file or serial device node), or `-` for stdin.
    #[arg(long, default_value = "-")]
    input: String,

    /// JSON detection config; missing fields take defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Threshold preset applied on top of the config.
    #[arg(long)]
    sensitivity: Option<Sensitivity>,

    /// Classify every spectrum instead of only during coarse triggers.
    #[arg(long)]
    single_stage: bool,

    /// Time base for durations and cooldowns.
    #[arg(long, value_enum, default_value = "wall")]
    clock: ClockArg,

    /// Where to write the alarm command byte on confirmed mining.
    #[arg(long)]
    alarm_out: Option<PathBuf>,

    /// Keep the alarm output open but never send.
    #[arg(long)]
    no_alarm: bool,

    /// Write status records to this CSV file instead of stdout.
    #[arg(long)]
    status_csv: Option<PathBuf>,

    /// Emit a status record every N samples (0 disables).
    #[arg(long, default_value_t = 0)]
    status_every: u64,
}

#[derive(clap::Args)]
struct ClassifyArgs {
    file: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed the confidence jitter for reproducible output.
    #[arg(long)]
    seed: Option<u64>,

    /// Disable the confidence jitter entirely.
    #[arg(long)]
    no_jitter: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Classify(args) => classify(args),
        Command::Decode { input } => decode(&input),
        Command::Send { output, command } => send(&output, command.into()),
    }
}

fn open_input(input: &str) -> Result<Box<dyn Read + Send>> {
    if input == "-" {
        Ok(Box::new(io::stdin()))
    } else {
        let file = File::open(input).with_context(|| format!("opening {input}"))?;
        Ok(Box::new(file))
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectionConfig> {
    match path {
        Some(p) => DetectionConfig::from_json_file(p).context("loading detection config"),
        None => Ok(DetectionConfig::default()),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(preset) = args.sensitivity {
        info!("applying {preset} sensitivity preset");
        config.apply_sensitivity(preset);
    }
    if args.single_stage {
        config.two_stage = false;
    }
    let config = config.shared();

    let mut pipeline = Pipeline::new(config.clone(), args.clock.into())
        .context("invalid detection config")?
        .with_status_every(args.status_every);

    let mut alarm = match &args.alarm_out {
        Some(path) => {
            let out = File::create(path).with_context(|| format!("opening {}", path.display()))?;
            Some(CommandAlarm::new(out, !args.no_alarm))
        }
        None => None,
    };
    let mut status_csv = match &args.status_csv {
        Some(path) => {
            let out = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            Some(StatusCsvSink::new(BufWriter::new(out)))
        }
        None => None,
    };
    let mut events_out = JsonLinesSink::new(BufWriter::new(io::stdout().lock()));

    let ctx = IngestContext::new();
    let (tx, rx) = mpsc::channel::<Frame>();
    let ingest = spawn_ingest(open_input(&args.input)?, ctx.clone(), tx);

    for frame in rx {
        for event in pipeline.process(&frame) {
            match (&event, status_csv.as_mut()) {
                (DetectionEvent::Status(record), Some(csv)) => {
                    csv.write(record).context("writing status record")?;
                    continue;
                }
                (DetectionEvent::MiningConfirmed(_), _) => {
                    if let Some(alarm) = alarm.as_mut() {
                        alarm.raise();
                    }
                }
                _ => {}
            }
            events_out.write(&event).context("writing event")?;
        }
    }

    let decoder_stats = ingest
        .join()
        .map_err(|_| anyhow!("ingestion thread panicked"))?
        .context("reading input")?;
    events_out.flush().context("flushing events")?;
    if let Some(csv) = status_csv.as_mut() {
        csv.flush().context("flushing status CSV")?;
    }

    eprintln!(
        "{} frames ({} resync drops, {} bytes discarded)",
        decoder_stats.frames, decoder_stats.resync_drops, decoder_stats.discarded_bytes
    );
    let stats = pipeline.stats();
    eprintln!(
        "{} samples, {} spectra classified, {} gated, {} unavailable",
        stats.samples, stats.spectra_classified, stats.spectra_gated, stats.spectra_unavailable
    );
    let alarms = alarm.as_ref().map_or(0, |a| a.sent());
    eprintln!(
        "{} triggers, {} mining confirmations, {alarms} alarms sent",
        stats.triggers, stats.mining_confirmations
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ClassifiedRow<'a> {
    index: usize,
    timestamp: Option<u32>,
    tag: Option<&'a str>,
    verdict: Verdict,
}

fn classify(args: ClassifyArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if args.no_jitter {
        config.fine.confidence_jitter = 0.0;
    }
    let config = config.shared();
    let detector = match args.seed {
        Some(seed) => FineDetector::with_seed(config, seed),
        None => FineDetector::new(config),
    };

    let recording = load_file(&args.file)?;
    let mut out = JsonLinesSink::new(BufWriter::new(io::stdout().lock()));
    for (index, spectrum) in recording.iter().enumerate() {
        let verdict = match detector.classify(&spectrum.magnitudes, &spectrum.frequencies) {
            Ok(c) => Verdict::Classified(c),
            Err(e) => Verdict::Unavailable {
                reason: e.to_string(),
            },
        };
        out.write(&ClassifiedRow {
            index,
            timestamp: spectrum.timestamp,
            tag: spectrum.tag.as_deref(),
            verdict,
        })?;
    }
    out.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

fn decode(input: &str) -> Result<()> {
    let mut reader = open_input(input)?;
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    loop {
        let n = reader.read(&mut chunk).context("reading input")?;
        if n == 0 {
            break;
        }
        for frame in decoder.feed(&chunk[..n]) {
            writeln!(out, "{}", summarize(&frame))?;
        }
    }
    out.flush()?;

    let stats = decoder.stats();
    eprintln!(
        "{} frames, {} ignored, {} resync drops, {} bytes discarded, {} bytes pending",
        stats.frames,
        stats.ignored_frames,
        stats.resync_drops,
        stats.discarded_bytes,
        decoder.pending_len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// send
// ---------------------------------------------------------------------------

fn send(output: &Path, command: HostCommand) -> Result<()> {
    let mut out = File::create(output).with_context(|| format!("opening {}", output.display()))?;
    send_command(&mut out, command).context("writing command")?;
    info!("sent {command:?} to {}", output.display());
    Ok(())
}

fn summarize(frame: &Frame) -> String {
    match frame {
        Frame::RawAccel { timestamp, x, y, z } => {
            format!("[{timestamp:>10}] accel x={x:+.5} y={y:+.5} z={z:+.5}")
        }
        _ => {
            let (mags, freqs) = match (frame.magnitudes(), frame.frequencies()) {
                (Some(m), Some(f)) => (m, f),
                _ => return format!("[{:>10}] {:?}", frame.timestamp(), frame.command()),
            };
            let (mut peak_hz, mut peak) = (0.0f32, 0.0f32);
            for (&f, &m) in freqs.iter().zip(mags).skip(1) {
                if m > peak {
                    (peak_hz, peak) = (f, m);
                }
            }
            format!(
                "[{:>10}] {:?} {} bins, peak {peak:.5} at {peak_hz:.1} Hz",
                frame.timestamp(),
                frame.command(),
                mags.len()
            )
        }
    }
}
