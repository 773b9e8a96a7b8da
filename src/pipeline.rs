use std::time::{Duration, Instant};

use log::{debug, info};
use serde::Serialize;

use crate::config::SharedConfig;
use crate::detect::{
    Classification, CoarseDetector, CoarseStatus, FeatureVector, FineDetector, Label,
};
use crate::dsp::StreamingFilter;
use crate::error::ConfigError;
use crate::protocol::Frame;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time base for the coarse detector's duration and cooldown windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// Wall-clock time at which each sample is processed.
    #[default]
    Wall,
    /// The device's millisecond timestamps. Lets a capture be replayed
    /// faster than real time with identical timing decisions.
    Device,
}

#[derive(Debug, Clone)]
enum Clock {
    Wall(Instant),
    Device { last: Option<u32>, total: Duration },
}

impl Clock {
    fn new(source: ClockSource) -> Self {
        match source {
            ClockSource::Wall => Clock::Wall(Instant::now()),
            ClockSource::Device => Clock::Device {
                last: None,
                total: Duration::ZERO,
            },
        }
    }

    fn source(&self) -> ClockSource {
        match self {
            Clock::Wall(_) => ClockSource::Wall,
            Clock::Device { .. } => ClockSource::Device,
        }
    }

    /// Offset of the sample stamped `timestamp_ms`. Device time survives the
    /// `u32` wrap; a step backwards counts as no time passing.
    fn at(&mut self, timestamp_ms: u32) -> Duration {
        match self {
            Clock::Wall(origin) => origin.elapsed(),
            Clock::Device { last, total } => {
                if let Some(prev) = *last {
                    let delta = timestamp_ms.wrapping_sub(prev);
                    if delta <= u32::MAX / 2 {
                        *total += Duration::from_millis(u64::from(delta));
                    }
                }
                *last = Some(timestamp_ms);
                *total
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub timestamp: u32,
    /// How long the condition held before confirmation.
    pub held_sec: f32,
    pub rms: f32,
    pub baseline_rms: f32,
    pub threshold: f32,
    pub peak_factor: f32,
}

/// Result of running the fine detector on one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Verdict {
    Classified(Classification),
    /// Features could not be extracted; not the same as `normal`.
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationEvent {
    pub timestamp: u32,
    pub bins: usize,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiningEvent {
    pub timestamp: u32,
    pub confidence: f32,
    pub features: FeatureVector,
    /// Present when the confirmation came from a coarse trigger.
    pub trigger: Option<TriggerEvent>,
}

/// Flat snapshot of detector state, one row per record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub timestamp: u32,
    pub rms: f32,
    pub baseline_rms: f32,
    pub threshold: f32,
    pub peak_factor: f32,
    pub triggering: bool,
    pub in_cooldown: bool,
    pub trigger_duration_sec: f32,
    pub filter_passthrough: bool,
    pub last_label: Option<Label>,
    pub last_confidence: Option<f32>,
    pub last_dominant_freq_hz: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DetectionEvent {
    Trigger(TriggerEvent),
    Classification(ClassificationEvent),
    MiningConfirmed(MiningEvent),
    Status(StatusRecord),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub samples: u64,
    pub spectra_classified: u64,
    pub spectra_unavailable: u64,
    pub spectra_gated: u64,
    pub triggers: u64,
    pub mining_confirmations: u64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Processing-loop side of the detector: owns the filter and both detectors
/// and turns decoded frames into events.
pub struct Pipeline {
    config: SharedConfig,
    filter: StreamingFilter,
    coarse: CoarseDetector,
    fine: FineDetector,
    clock: Clock,
    status_every: u64,
    /// Best `mining` classification seen during the current coarse episode.
    episode_best: Option<(f32, FeatureVector)>,
    last_classification: Option<Classification>,
    stats: PipelineStats,
}

impl Pipeline {
    /// Fails if the current configuration cannot be honoured.
    pub fn new(config: SharedConfig, clock: ClockSource) -> Result<Self, ConfigError> {
        let filter = {
            let current = config.read();
            current.validate()?;
            StreamingFilter::new(&current.filter)?
        };
        Ok(Self {
            coarse: CoarseDetector::new(config.clone()),
            fine: FineDetector::new(config.clone()),
            config,
            filter,
            clock: Clock::new(clock),
            status_every: 0,
            episode_best: None,
            last_classification: None,
            stats: PipelineStats::default(),
        })
    }

    /// Emit a status record every `n` coarse evaluations (0 disables).
    pub fn with_status_every(mut self, n: u64) -> Self {
        self.status_every = n;
        self
    }

    pub fn with_fine_detector(mut self, fine: FineDetector) -> Self {
        self.fine = fine;
        self
    }

    pub fn process(&mut self, frame: &Frame) -> Vec<DetectionEvent> {
        let timestamp = frame.timestamp();
        match (frame.accel(), frame.magnitudes()) {
            (Some(sample), _) => self.process_sample(timestamp, sample),
            (None, Some(magnitudes)) => {
                self.process_spectrum(timestamp, magnitudes, frame.frequencies())
            }
            (None, None) => Vec::new(),
        }
    }

    fn process_sample(&mut self, timestamp: u32, sample: [f32; 3]) -> Vec<DetectionEvent> {
        self.sync_filter();
        let filtered = self.filter.filter_sample(sample);
        let now = self.clock.at(timestamp);
        let triggered = self.coarse.push_at(filtered, now);
        self.stats.samples += 1;

        let mut events = Vec::new();
        if triggered {
            let status = self.coarse.status();
            let trigger = TriggerEvent {
                timestamp,
                held_sec: self.coarse.last_episode().as_secs_f32(),
                rms: status.rms,
                baseline_rms: status.baseline_rms,
                threshold: status.threshold,
                peak_factor: status.peak_factor,
            };
            self.stats.triggers += 1;
            events.push(DetectionEvent::Trigger(trigger.clone()));

            if let Some((confidence, features)) = self.episode_best.take() {
                info!("mining confirmed at {timestamp} ms (confidence {confidence:.2})");
                self.stats.mining_confirmations += 1;
                events.push(DetectionEvent::MiningConfirmed(MiningEvent {
                    timestamp,
                    confidence,
                    features,
                    trigger: Some(trigger),
                }));
            }
        } else if !self.coarse.is_triggering() {
            self.episode_best = None;
        }

        if self.status_every > 0 && self.stats.samples % self.status_every == 0 {
            events.push(DetectionEvent::Status(self.status_record(timestamp)));
        }
        events
    }

    fn process_spectrum(
        &mut self,
        timestamp: u32,
        magnitudes: &[f32],
        frequencies: Option<&'static [f32]>,
    ) -> Vec<DetectionEvent> {
        let two_stage = self.config.read().two_stage;
        if two_stage && !self.coarse.is_triggering() {
            self.stats.spectra_gated += 1;
            return Vec::new();
        }
        let Some(frequencies) = frequencies else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let verdict = match self.fine.classify(magnitudes, frequencies) {
            Ok(classification) => {
                self.stats.spectra_classified += 1;
                if classification.label == Label::Mining {
                    let confidence = classification.confidence;
                    let features = classification.features;
                    if two_stage {
                        let better = match self.episode_best {
                            Some((best, _)) => confidence > best,
                            None => true,
                        };
                        if better {
                            self.episode_best = Some((confidence, features));
                        }
                    } else {
                        info!("mining classified at {timestamp} ms (confidence {confidence:.2})");
                        self.stats.mining_confirmations += 1;
                        events.push(DetectionEvent::MiningConfirmed(MiningEvent {
                            timestamp,
                            confidence,
                            features,
                            trigger: None,
                        }));
                    }
                }
                self.last_classification = Some(classification.clone());
                Verdict::Classified(classification)
            }
            Err(e) => {
                self.stats.spectra_unavailable += 1;
                Verdict::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        let classified = DetectionEvent::Classification(ClassificationEvent {
            timestamp,
            bins: magnitudes.len(),
            verdict,
        });
        events.insert(0, classified);
        events
    }

    /// Rebuild the filter if its parameters changed in the shared config.
    fn sync_filter(&mut self) {
        let params = self.config.read().filter.clone();
        if params != *self.filter.params() {
            info!(
                "rebuilding high-pass filter: {:?} order {} cutoff {} Hz",
                params.family, params.order, params.cutoff_hz
            );
            self.filter = StreamingFilter::new_or_passthrough(&params);
        }
    }

    pub fn status_record(&self, timestamp: u32) -> StatusRecord {
        let status = self.coarse.status();
        let last = self.last_classification.as_ref();
        StatusRecord {
            timestamp,
            rms: status.rms,
            baseline_rms: status.baseline_rms,
            threshold: status.threshold,
            peak_factor: status.peak_factor,
            triggering: status.triggering,
            in_cooldown: status.in_cooldown,
            trigger_duration_sec: status.trigger_duration_sec,
            filter_passthrough: self.filter.is_passthrough(),
            last_label: last.map(|c| c.label),
            last_confidence: last.map(|c| c.confidence),
            last_dominant_freq_hz: last.map(|c| c.features.dominant_freq_hz),
        }
    }

    pub fn coarse_status(&self) -> CoarseStatus {
        self.coarse.status()
    }

    /// The trigger-active flag gating fine detection.
    pub fn is_triggering(&self) -> bool {
        self.coarse.is_triggering()
    }

    /// True while the filter is passing raw samples through.
    pub fn is_degraded(&self) -> bool {
        self.filter.is_passthrough()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Restart detection from scratch, as for a new stream.
    pub fn reset(&mut self) {
        debug!("pipeline reset");
        self.filter.reset();
        self.coarse.reset();
        self.fine.reset();
        self.clock = Clock::new(self.clock.source());
        self.episode_best = None;
        self.last_classification = None;
        self.stats = PipelineStats::default();
    }
}
