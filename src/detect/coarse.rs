//! Time-domain trigger with an adaptive baseline.
//!
//! Each filtered sample lands in a bounded window. RMS and peak factor over
//! the most recent samples are compared against a threshold scaled from the
//! baseline RMS. The condition must hold continuously for the configured
//! duration before a trigger is confirmed, after which a cooldown suppresses
//! further triggers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, info, trace};
use serde::Serialize;

use crate::config::{CoarseParams, SharedConfig};

/// Samples retained, independent of sampling rate.
pub const WINDOW_CAPACITY: usize = 2000;

/// Samples that must have been seen before anything is evaluated.
pub const MIN_HISTORY: usize = 50;

/// Most recent samples used for RMS and peak factor.
pub const FEATURE_WINDOW: usize = 200;

/// Lowest baseline RMS (g), so the threshold is never degenerate.
pub const BASELINE_FLOOR: f32 = 0.002;

/// Baseline used until the first nonzero RMS arrives (g).
pub const INITIAL_BASELINE: f32 = 0.005;

/// RMS at or above this multiple of the baseline never feeds the baseline.
const BASELINE_GUARD: f32 = 3.0;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Trigger state machine. Times are offsets on the detector's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Triggering { since: Duration },
    Cooldown { until: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub rms: f32,
    pub initialized: bool,
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            rms: INITIAL_BASELINE,
            initialized: false,
        }
    }
}

/// RMS and peak factor over the feature window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowFeatures {
    pub rms: f32,
    pub peak: f32,
    pub peak_factor: f32,
}

impl WindowFeatures {
    fn compute<'a>(samples: impl Iterator<Item = &'a [f32; 3]>) -> Self {
        let mut count = 0usize;
        let mut sum_sq = 0.0f64;
        let mut peak = 0.0f32;
        for s in samples {
            let magnitude = (s[0] * s[0] + s[1] * s[1] + s[2] * s[2]).sqrt();
            sum_sq += f64::from(magnitude) * f64::from(magnitude);
            peak = peak.max(magnitude.abs());
            count += 1;
        }
        if count == 0 {
            return Self::default();
        }
        let rms = (sum_sq / count as f64).sqrt() as f32;
        let peak_factor = if rms > 0.0 { peak / rms } else { 0.0 };
        Self {
            rms,
            peak,
            peak_factor,
        }
    }
}

/// Read-only snapshot for status displays and logs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoarseStatus {
    pub rms: f32,
    pub baseline_rms: f32,
    pub threshold: f32,
    pub peak_factor: f32,
    pub triggering: bool,
    pub in_cooldown: bool,
    /// Seconds the current episode has been triggering.
    pub trigger_duration_sec: f32,
}

// ---------------------------------------------------------------------------
// CoarseDetector
// ---------------------------------------------------------------------------

pub struct CoarseDetector {
    config: SharedConfig,
    window: VecDeque<[f32; 3]>,
    seen: u64,
    baseline: Baseline,
    state: TriggerState,
    features: WindowFeatures,
    threshold: f32,
    last_eval: Duration,
    last_episode: Duration,
    origin: Instant,
}

impl CoarseDetector {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            seen: 0,
            baseline: Baseline::default(),
            state: TriggerState::Idle,
            features: WindowFeatures::default(),
            threshold: 0.0,
            last_eval: Duration::ZERO,
            last_episode: Duration::ZERO,
            origin: Instant::now(),
        }
    }

    /// Push a filtered sample, timed against the wall clock.
    pub fn push(&mut self, sample: [f32; 3]) -> bool {
        let now = self.origin.elapsed();
        self.push_at(sample, now)
    }

    /// Push a filtered sample taken at `now` (offset on any monotonic clock).
    /// Returns `true` exactly when a trigger is confirmed.
    pub fn push_at(&mut self, sample: [f32; 3], now: Duration) -> bool {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        self.seen += 1;
        if self.seen < MIN_HISTORY as u64 {
            return false;
        }

        let skip = self.window.len().saturating_sub(FEATURE_WINDOW);
        self.features = WindowFeatures::compute(self.window.iter().skip(skip));
        self.last_eval = now;

        let params = self.config.read().coarse.clone();

        if !self.is_triggering() {
            self.update_baseline(self.features.rms, &params);
        }

        if let TriggerState::Cooldown { until } = self.state {
            if now < until {
                return false;
            }
            debug!("coarse cooldown elapsed");
            self.state = TriggerState::Idle;
        }

        self.threshold = self.baseline.rms * params.rms_threshold_multiplier;
        let rms_exceeded = self.features.rms > self.threshold;
        let peaky = self.features.peak_factor > params.peak_factor_threshold;
        trace!(
            "coarse rms {:.6} (threshold {:.6}) peak factor {:.3}",
            self.features.rms,
            self.threshold,
            self.features.peak_factor
        );

        if !(rms_exceeded && peaky) {
            if self.is_triggering() {
                debug!("coarse episode abandoned before confirmation");
            }
            self.state = TriggerState::Idle;
            return false;
        }

        let since = match self.state {
            TriggerState::Triggering { since } => since,
            _ => {
                debug!("coarse episode started (rms {:.6})", self.features.rms);
                self.state = TriggerState::Triggering { since: now };
                now
            }
        };

        let held = now.saturating_sub(since);
        if held.as_secs_f32() >= params.duration_threshold_sec {
            info!(
                "coarse trigger confirmed after {:.1}s: rms {:.6} > {:.6}, peak factor {:.3}",
                held.as_secs_f32(),
                self.features.rms,
                self.threshold,
                self.features.peak_factor
            );
            let until = now + seconds(params.cooldown_time_sec);
            self.state = TriggerState::Cooldown { until };
            self.last_episode = held;
            return true;
        }
        false
    }

    fn update_baseline(&mut self, rms: f32, params: &CoarseParams) {
        if rms <= 0.0 {
            return;
        }
        if !self.baseline.initialized {
            self.baseline.rms = rms.max(BASELINE_FLOOR);
            self.baseline.initialized = true;
            debug!("baseline initialised at {:.6} g", self.baseline.rms);
        } else if params.adaptive_enabled && rms < self.baseline.rms * BASELINE_GUARD {
            let rate = params.baseline_update_rate;
            self.baseline.rms = (1.0 - rate) * self.baseline.rms + rate * rms;
        }
    }

    /// The trigger-active flag used to gate fine detection.
    pub fn is_triggering(&self) -> bool {
        matches!(self.state, TriggerState::Triggering { .. })
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn baseline(&self) -> Baseline {
        self.baseline
    }

    /// How long the most recently confirmed episode held before confirming.
    pub fn last_episode(&self) -> Duration {
        self.last_episode
    }

    pub fn samples_seen(&self) -> u64 {
        self.seen
    }

    pub fn status(&self) -> CoarseStatus {
        let trigger_duration_sec = match self.state {
            TriggerState::Triggering { since } => {
                self.last_eval.saturating_sub(since).as_secs_f32()
            }
            _ => 0.0,
        };
        CoarseStatus {
            rms: self.features.rms,
            baseline_rms: self.baseline.rms,
            threshold: self.threshold,
            peak_factor: self.features.peak_factor,
            triggering: self.is_triggering(),
            in_cooldown: matches!(self.state, TriggerState::Cooldown { .. }),
            trigger_duration_sec,
        }
    }

    /// Forget history, baseline and trigger state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.seen = 0;
        self.baseline = Baseline::default();
        self.state = TriggerState::Idle;
        self.features = WindowFeatures::default();
        self.threshold = 0.0;
        self.last_eval = Duration::ZERO;
        self.last_episode = Duration::ZERO;
        self.origin = Instant::now();
    }
}

/// Negative, NaN or overflowing values map to zero.
fn seconds(value: f32) -> Duration {
    match Duration::try_from_secs_f32(value) {
        Ok(duration) => duration,
        Err(_) => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;

    const DT: Duration = Duration::from_millis(1);

    /// Impulsive triaxial pattern: nine quiet samples then one spike, giving
    /// a window RMS of about `level` and a peak factor of about 2.5.
    fn impulsive(i: usize, level: f32) -> [f32; 3] {
        let a = if i % 10 == 9 {
            2.53 * level
        } else {
            0.632 * level
        };
        let axis = a / 3f32.sqrt();
        [axis, -axis, axis]
    }

    fn fixed_baseline_config() -> DetectionConfig {
        let mut config = DetectionConfig::default();
        config.coarse.adaptive_enabled = false;
        config
    }

    #[test]
    fn zero_signal_never_triggers() {
        let mut detector = CoarseDetector::new(DetectionConfig::default().shared());
        for i in 0..20_000u32 {
            assert!(!detector.push_at([0.0; 3], DT * i));
        }
        assert!(!detector.baseline().initialized);
        assert_eq!(detector.state(), TriggerState::Idle);
    }

    #[test]
    fn insufficient_history_is_not_evaluated() {
        let mut detector = CoarseDetector::new(DetectionConfig::default().shared());
        for i in 0..(MIN_HISTORY as u32 - 1) {
            assert!(!detector.push_at([1.0, 1.0, 1.0], DT * i));
        }
        assert_eq!(detector.status().rms, 0.0);
        assert!(!detector.baseline().initialized);
    }

    #[test]
    fn step_to_sustained_vibration_triggers_once_per_cooldown() {
        let mut detector = CoarseDetector::new(fixed_baseline_config().shared());
        let mut t = Duration::ZERO;
        let mut i = 0usize;
        let mut triggers = Vec::new();

        // 10 s of 2 mg background.
        while t < Duration::from_secs(10) {
            assert!(!detector.push_at(impulsive(i, 0.002), t));
            t += DT;
            i += 1;
        }
        assert!(detector.baseline().initialized);
        assert!(detector.baseline().rms >= BASELINE_FLOOR);

        // 50 mg for 25 s: longer than duration threshold, shorter than
        // duration + cooldown after the first confirmation.
        let onset = t;
        while t < onset + Duration::from_secs(25) {
            if detector.push_at(impulsive(i, 0.05), t) {
                triggers.push(t);
            }
            t += DT;
            i += 1;
        }
        assert_eq!(triggers.len(), 1);
        let held = triggers[0] - onset;
        assert!(
            held >= Duration::from_secs(5) && held < Duration::from_secs(6),
            "{held:?}"
        );
        assert!(matches!(detector.state(), TriggerState::Cooldown { .. }));

        // Keep vibrating: cooldown expires 30 s after the first trigger, and
        // a fresh episode needs another 5 s.
        while t < onset + Duration::from_secs(60) {
            if detector.push_at(impulsive(i, 0.05), t) {
                triggers.push(t);
            }
            t += DT;
            i += 1;
        }
        assert_eq!(triggers.len(), 2);
        assert!(triggers[1] - triggers[0] >= Duration::from_secs(35));
    }

    #[test]
    fn adaptive_baseline_absorbs_gradual_onset() {
        let mut detector = CoarseDetector::new(DetectionConfig::default().shared());
        let mut t = Duration::ZERO;
        for i in 0..10_000 {
            assert!(!detector.push_at(impulsive(i, 0.002), t));
            t += DT;
        }

        // The onset leads with quiet samples, so the window RMS climbs a
        // little per sample and the baseline follows it up to 50 mg.
        let mut peak_ratio = 0.0f32;
        for i in 10_000..50_000 {
            assert!(!detector.push_at(impulsive(i, 0.05), t));
            let status = detector.status();
            peak_ratio = peak_ratio.max(status.rms / status.baseline_rms);
            t += DT;
        }
        assert!(peak_ratio < 2.5, "rms reached {peak_ratio} x baseline");
        assert!((detector.baseline().rms - 0.05).abs() < 0.005);
        assert_eq!(detector.state(), TriggerState::Idle);
    }

    #[test]
    fn abrupt_onset_triggers_with_default_config() {
        let mut detector = CoarseDetector::new(DetectionConfig::default().shared());
        let mut t = Duration::ZERO;
        for i in 0..10_000 {
            detector.push_at(impulsive(i, 0.002), t);
            t += DT;
        }
        let quiet_baseline = detector.baseline().rms;

        // Spike first: the first loud window is already above the guard, so
        // the baseline freezes and the episode starts at once.
        let onset = t;
        let mut triggers = Vec::new();
        for i in 0..10_000 {
            if detector.push_at(impulsive(i + 9, 0.05), t) {
                triggers.push(t - onset);
            }
            t += DT;
        }
        assert_eq!(triggers.len(), 1);
        assert!(triggers[0] >= Duration::from_secs(5));
        assert!(triggers[0] < Duration::from_millis(5010));
        assert_eq!(detector.baseline().rms, quiet_baseline);
    }

    #[test]
    fn interruption_abandons_episode() {
        let mut detector = CoarseDetector::new(fixed_baseline_config().shared());
        let mut t = Duration::ZERO;
        for i in 0..2000 {
            detector.push_at(impulsive(i, 0.002), t);
            t += DT;
        }
        for i in 0..3000 {
            assert!(!detector.push_at(impulsive(i, 0.05), t));
            t += DT;
        }
        assert!(detector.is_triggering());
        assert!(detector.status().trigger_duration_sec > 2.5);

        // Silence long enough to flush the feature window.
        for _ in 0..FEATURE_WINDOW {
            detector.push_at([0.0; 3], t);
            t += DT;
        }
        assert_eq!(detector.state(), TriggerState::Idle);
        assert_eq!(detector.status().trigger_duration_sec, 0.0);
    }

    #[test]
    fn baseline_freezes_while_triggering_and_ignores_outliers() {
        let config = DetectionConfig::default().shared();
        let mut detector = CoarseDetector::new(config.clone());
        let mut t = Duration::ZERO;
        for i in 0..500 {
            detector.push_at(impulsive(i, 0.004), t);
            t += DT;
        }
        let settled = detector.baseline().rms;
        assert!((settled - 0.004).abs() < 0.001, "baseline {settled}");

        // A sudden jump far above the baseline never reaches it.
        for i in 0..FEATURE_WINDOW {
            detector.push_at(impulsive(i, 1.0), t);
            t += DT;
        }
        assert!(detector.is_triggering());
        assert_eq!(detector.baseline().rms, settled);
    }

    #[test]
    fn config_changes_apply_on_next_sample() {
        let config = fixed_baseline_config().shared();
        config.write().coarse.duration_threshold_sec = 0.0;
        let mut detector = CoarseDetector::new(config.clone());
        let mut t = Duration::ZERO;
        for i in 0..1000 {
            detector.push_at(impulsive(i, 0.002), t);
            t += DT;
        }

        config.write().coarse.rms_threshold_multiplier = 1000.0;
        for i in 0..500 {
            assert!(!detector.push_at(impulsive(i, 0.05), t));
            t += DT;
        }

        config.write().coarse.rms_threshold_multiplier = 2.5;
        assert!(detector.push_at(impulsive(500, 0.05), t));
    }

    #[test]
    fn reset_clears_everything() {
        let mut detector = CoarseDetector::new(DetectionConfig::default().shared());
        for i in 0..300 {
            detector.push_at(impulsive(i, 0.01), DT * i as u32);
        }
        detector.reset();
        assert_eq!(detector.samples_seen(), 0);
        assert_eq!(detector.baseline(), Baseline::default());
        assert_eq!(detector.state(), TriggerState::Idle);
    }
}
