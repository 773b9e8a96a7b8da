//! Writes a synthetic device capture for exercising the pipeline.
//!
//! RawAccel frames at 1 kHz with a Spectrum257 frame after every 256 samples:
//! first quiet background noise, then an impulsive low-frequency signature
//! like rock drilling or blasting. Optional garbage between frames exercises
//! the decoder's resynchronisation.
//!
//! Usage:
//!   cargo run --bin generate_capture -- --output capture.bin --mining-secs 40

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use vibration_sentry::protocol::{encode, Frame, SpectrumKind};

const SAMPLE_RATE_HZ: f32 = 1000.0;
const FFT_LEN: usize = 512;
const SPECTRUM_EVERY: usize = 256;
const GRAVITY_G: f32 = 1.0;

/// Pulse repetition rate, on a spectrum bin so the harmonics do not leak.
const PULSE_HZ: f32 = 4.0 * 1000.0 / 512.0;

/// Sharpness of the raised-cosine pulse; higher is more impulsive.
const PULSE_POWER: i32 = 6;

#[derive(Parser)]
#[command(name = "generate_capture", about = "Write a synthetic vibration sensor capture")]
struct Cli {
    #[arg(long)]
    output: PathBuf,

    /// Seconds of background noise before the signature starts.
    #[arg(long, default_value_t = 10.0)]
    normal_secs: f32,

    /// Seconds of mining signature.
    #[arg(long, default_value_t = 40.0)]
    mining_secs: f32,

    /// Background noise RMS (g).
    #[arg(long, default_value_t = 0.002)]
    noise_g: f32,

    /// Signature RMS (g).
    #[arg(long, default_value_t = 0.05)]
    mining_g: f32,

    /// Device timestamp of the first sample (ms).
    #[arg(long, default_value_t = 0)]
    start_ms: u32,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Insert junk bytes after every N frames (0 disables).
    #[arg(long, default_value_t = 0)]
    garbage_every: usize,
}

/// Zero-mean pulse train with unit RMS.
struct PulseTrain {
    mean: f32,
    rms: f32,
}

impl PulseTrain {
    fn new() -> Self {
        let n = 4096;
        let raw: Vec<f32> = (0..n).map(|i| Self::raw(i as f32 / n as f32)).collect();
        let mean = raw.iter().sum::<f32>() / n as f32;
        let power = raw.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n as f32;
        Self {
            mean,
            rms: power.sqrt(),
        }
    }

    fn raw(phase: f32) -> f32 {
        (0.5 + 0.5 * (2.0 * PI * phase).cos()).powi(PULSE_POWER)
    }

    fn at(&self, t: f32) -> f32 {
        (Self::raw((PULSE_HZ * t).fract()) - self.mean) / self.rms
    }
}

/// Single-sided magnitudes of the most recent `FFT_LEN` samples.
fn spectrum(fft: &dyn Fft<f32>, history: &VecDeque<f32>) -> Box<[f32; 257]> {
    let mut buffer: Vec<Complex<f32>> = history.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fft.process(&mut buffer);

    let n = history.len() as f32;
    let mut out = Box::new([0.0f32; 257]);
    for (k, (bin, c)) in out.iter_mut().zip(&buffer).enumerate() {
        let scale = if k == 0 || k == 256 { 1.0 } else { 2.0 };
        *bin = scale * c.norm() / n;
    }
    out
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let axis_sigma = cli.noise_g / 3f32.sqrt();
    let noise = Normal::new(0.0f32, axis_sigma).context("invalid noise level")?;
    let pulses = PulseTrain::new();

    let normal_samples = (cli.normal_secs * SAMPLE_RATE_HZ) as usize;
    let total = normal_samples + (cli.mining_secs * SAMPLE_RATE_HZ) as usize;

    let path = &cli.output;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let fft = FftPlanner::<f32>::new().plan_fft_forward(FFT_LEN);
    let mut history: VecDeque<f32> = VecDeque::with_capacity(FFT_LEN);
    let mut frames = 0usize;
    let mut spectra = 0usize;
    let mut garbage = 0usize;

    for i in 0..total {
        let t = i as f32 / SAMPLE_RATE_HZ;
        let signature = if i >= normal_samples {
            cli.mining_g * pulses.at(t - cli.normal_secs)
        } else {
            0.0
        };
        let timestamp = cli.start_ms.wrapping_add(i as u32);
        let x = noise.sample(&mut rng) + 0.3 * signature;
        let y = noise.sample(&mut rng);
        let z = GRAVITY_G + noise.sample(&mut rng) + signature;

        let mut batch = vec![Frame::RawAccel { timestamp, x, y, z }];

        if history.len() == FFT_LEN {
            history.pop_front();
        }
        history.push_back(z);
        if (i + 1) % SPECTRUM_EVERY == 0 && history.len() == FFT_LEN {
            batch.push(Frame::Spectrum257 {
                timestamp,
                magnitudes: spectrum(fft.as_ref(), &history),
            });
            spectra += 1;
        }

        for frame in batch {
            out.write_all(&encode(&frame))?;
            frames += 1;
            if cli.garbage_every > 0 && frames % cli.garbage_every == 0 {
                if rng.gen_bool(0.5) {
                    out.write_all(b"ALARM_TRIGGERED\r\n")?;
                    garbage += 17;
                } else {
                    let len = rng.gen_range(1..32);
                    let junk: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                    out.write_all(&junk)?;
                    garbage += len;
                }
            }
        }
    }
    out.flush()?;

    println!(
        "Wrote {frames} frames ({spectra} spectra of {} bins, {garbage} junk bytes) to {}",
        SpectrumKind::Bins257.bin_count(),
        cli.output.display()
    );
    Ok(())
}
