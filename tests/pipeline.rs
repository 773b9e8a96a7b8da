use std::io::Cursor;
use std::sync::mpsc;

use vibration_sentry::config::DetectionConfig;
use vibration_sentry::detect::Label;
use vibration_sentry::ingest::{spawn_ingest, IngestContext};
use vibration_sentry::pipeline::{ClockSource, DetectionEvent, MiningEvent, Pipeline, Verdict};
use vibration_sentry::protocol::{encode, Frame, FrameDecoder, SpectrumKind};

const QUIET_MS: u32 = 10_000;
const TOTAL_MS: u32 = 30_000;
const SPECTRUM_EVERY: u32 = 256;

/// Zero-mean impulsive pattern with RMS `level`: nine samples at `-c`, then
/// one spike at `9c`. The spike comes first so the onset is abrupt.
fn impulsive(j: u32, level: f32) -> f32 {
    let c = level / 3.0;
    if j % 10 == 0 { 9.0 * c } else { -c }
}

fn spectrum(mining: bool) -> Box<[f32; 257]> {
    let freqs = SpectrumKind::Bins257.frequencies();
    let mut magnitudes = Box::new([0.0f32; 257]);
    for (m, f) in magnitudes.iter_mut().zip(freqs) {
        *m = 0.00002 * (1.0 + 0.1 * f / 500.0);
    }
    if mining {
        magnitudes[4] += 0.05; // 7.8 Hz
        magnitudes[8] += 0.03; // 15.6 Hz
        magnitudes[12] += 0.01; // 23.4 Hz
    }
    magnitudes
}

/// 10 s of 2 mg background, then 20 s of 50 mg impulsive vibration, with a
/// spectrum after every 256 samples and device text replies mixed in.
fn capture() -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut frames = 0;
    for ts in 0..TOTAL_MS {
        let mining = ts >= QUIET_MS;
        let level = if mining { 0.05 } else { 0.002 };
        let v = impulsive(if mining { ts - QUIET_MS } else { ts }, level);
        let mut batch = vec![Frame::RawAccel {
            timestamp: ts,
            x: 0.2 * v,
            y: 0.0,
            z: 1.0 + v,
        }];
        if (ts + 1) % SPECTRUM_EVERY == 0 {
            batch.push(Frame::Spectrum257 {
                timestamp: ts,
                magnitudes: spectrum(mining),
            });
        }
        for frame in batch {
            bytes.extend(encode(&frame));
            frames += 1;
            if frames % 100 == 0 {
                bytes.extend_from_slice(b"ALARM_TRIGGERED\r\n");
            }
        }
    }
    bytes
}

fn deterministic_config() -> DetectionConfig {
    let mut config = DetectionConfig::default();
    config.fine.confidence_jitter = 0.0;
    config
}

fn device_pipeline() -> Pipeline {
    Pipeline::new(deterministic_config().shared(), ClockSource::Device).unwrap()
}

fn run(pipeline: &mut Pipeline, bytes: &[u8]) -> Vec<DetectionEvent> {
    let mut decoder = FrameDecoder::new();
    let mut events = Vec::new();
    for chunk in bytes.chunks(1000) {
        for frame in decoder.feed(chunk) {
            events.extend(pipeline.process(&frame));
        }
    }
    events
}

fn labels(events: &[DetectionEvent]) -> Vec<Label> {
    events
        .iter()
        .filter_map(|e| match e {
            DetectionEvent::Classification(c) => match &c.verdict {
                Verdict::Classified(classification) => Some(classification.label),
                Verdict::Unavailable { .. } => None,
            },
            _ => None,
        })
        .collect()
}

fn confirmations(events: &[DetectionEvent]) -> Vec<&MiningEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            DetectionEvent::MiningConfirmed(m) => Some(m),
            _ => None,
        })
        .collect()
}

#[test]
fn two_stage_confirms_mining_once() {
    let mut pipeline = device_pipeline();
    let events = run(&mut pipeline, &capture());

    let triggers: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DetectionEvent::Trigger(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(triggers.len(), 1);
    let at = triggers[0].timestamp;
    assert!((QUIET_MS + 5000..QUIET_MS + 5010).contains(&at));
    assert!(triggers[0].held_sec >= 5.0);

    // Fine detection only ran while the coarse trigger was active.
    let labels = labels(&events);
    assert_eq!(labels.len(), 19);
    assert!(labels.iter().all(|l| *l == Label::Mining));

    let confirmations = confirmations(&events);
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].confidence, 0.95);
    assert_eq!(confirmations[0].trigger.as_ref(), Some(triggers[0]));

    let stats = pipeline.stats();
    assert_eq!(stats.samples, u64::from(TOTAL_MS));
    assert_eq!(stats.spectra_classified, 19);
    assert_eq!(stats.spectra_gated, 117 - 19);
}

#[test]
fn single_stage_classifies_every_spectrum() {
    let mut config = deterministic_config();
    config.two_stage = false;
    let mut pipeline = Pipeline::new(config.shared(), ClockSource::Device).unwrap();
    let events = run(&mut pipeline, &capture());

    let labels = labels(&events);
    assert_eq!(labels.len(), 117);
    assert!(labels[..39].iter().all(|l| *l == Label::Normal));
    assert!(labels[39..].iter().all(|l| *l == Label::Mining));

    let confirmations = confirmations(&events);
    assert_eq!(confirmations.len(), 78);
    assert!(confirmations.iter().all(|m| m.trigger.is_none()));
}

#[test]
fn reset_replays_identically() {
    let bytes = capture();
    let mut pipeline = Pipeline::new(deterministic_config().shared(), ClockSource::Device)
        .unwrap()
        .with_status_every(500);

    let first = run(&mut pipeline, &bytes);
    pipeline.reset();
    let second = run(&mut pipeline, &bytes);

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn ingestion_thread_feeds_processing_loop() {
    let (tx, rx) = mpsc::channel();
    let handle = spawn_ingest(Cursor::new(capture()), IngestContext::new(), tx);

    let mut pipeline = device_pipeline();
    let mut triggers = 0;
    for frame in rx {
        for event in pipeline.process(&frame) {
            if matches!(event, DetectionEvent::Trigger(_)) {
                triggers += 1;
            }
        }
    }
    let stats = handle.join().unwrap().unwrap();

    assert_eq!(triggers, 1);
    assert_eq!(stats.frames, u64::from(TOTAL_MS) + 117);
    assert_eq!(stats.resync_drops, 0);
}

#[test]
fn events_serialize_as_json_lines() {
    let mut pipeline = device_pipeline();
    let events = run(&mut pipeline, &capture());
    let mining = events
        .iter()
        .find(|e| matches!(e, DetectionEvent::MiningConfirmed(_)))
        .unwrap();

    let json = serde_json::to_value(mining).unwrap();
    assert_eq!(json["event"], "mining_confirmed");
    assert_eq!(json["trigger"]["timestamp"], json["timestamp"]);
    assert!(json["features"]["low_band_ratio"].as_f64().unwrap() > 0.3);
}
