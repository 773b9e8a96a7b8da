use std::fmt;

use log::{debug, trace};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::{FineParams, SharedConfig};
use crate::error::ClassifyError;

/// Qualifying energy at or below this is treated as silence.
const MIN_ENERGY: f64 = 1e-12;

/// Bins used for the harmonic-strength RMS.
const HARMONIC_BINS: usize = 10;

/// Highest reportable confidence.
const MAX_CONFIDENCE: f32 = 0.95;

/// Confidence below this is `normal` rather than `uncertain`.
const UNCERTAIN_FLOOR: f32 = 0.3;

/// Cap on the energy-ratio contribution to confidence.
const RATIO_BONUS_CAP: f32 = 0.2;

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Frequency-domain features of one spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FeatureVector {
    pub low_band_ratio: f32,
    pub mid_band_ratio: f32,
    pub high_band_ratio: f32,
    pub ultra_band_ratio: f32,
    pub dominant_freq_hz: f32,
    pub spectral_centroid_hz: f32,
    pub harmonic_strength: f32,
    pub spectral_flatness: f32,
}

impl FeatureVector {
    /// `[low, mid, high, ultra, dominant, centroid, harmonic, flatness]`
    pub fn to_array(&self) -> [f32; 8] {
        [
            self.low_band_ratio,
            self.mid_band_ratio,
            self.high_band_ratio,
            self.ultra_band_ratio,
            self.dominant_freq_hz,
            self.spectral_centroid_hz,
            self.harmonic_strength,
            self.spectral_flatness,
        ]
    }

    pub fn energy_ratios(&self) -> [f32; 4] {
        [
            self.low_band_ratio,
            self.mid_band_ratio,
            self.high_band_ratio,
            self.ultra_band_ratio,
        ]
    }

    fn sanitized(self) -> Self {
        let clean = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self {
            low_band_ratio: clean(self.low_band_ratio),
            mid_band_ratio: clean(self.mid_band_ratio),
            high_band_ratio: clean(self.high_band_ratio),
            ultra_band_ratio: clean(self.ultra_band_ratio),
            dominant_freq_hz: clean(self.dominant_freq_hz),
            spectral_centroid_hz: clean(self.spectral_centroid_hz),
            harmonic_strength: clean(self.harmonic_strength),
            spectral_flatness: clean(self.spectral_flatness),
        }
    }
}

/// Compute features over the bins at or above `params.min_frequency_hz`.
pub fn extract_features(
    params: &FineParams,
    magnitudes: &[f32],
    frequencies: &[f32],
) -> Result<FeatureVector, ClassifyError> {
    if magnitudes.len() != frequencies.len() {
        return Err(ClassifyError::LengthMismatch {
            magnitudes: magnitudes.len(),
            frequencies: frequencies.len(),
        });
    }

    let mut bins: Vec<(f32, f32)> = frequencies
        .iter()
        .zip(magnitudes)
        .filter(|(f, _)| **f >= params.min_frequency_hz)
        .map(|(&f, &m)| (f, m))
        .collect();
    // Recorded spectra may list their bins in any order.
    bins.sort_by(|a, b| a.0.total_cmp(&b.0));
    if bins.is_empty() {
        return Err(ClassifyError::NoQualifyingBins {
            min_hz: params.min_frequency_hz,
        });
    }

    let energy = |m: f32| f64::from(m) * f64::from(m);
    let total: f64 = bins.iter().map(|&(_, m)| energy(m)).sum();
    if !(total > MIN_ENERGY) {
        return Err(ClassifyError::ZeroEnergy);
    }

    // Four bands between five edges; the top edge is inclusive so a bin at
    // exactly the last edge is counted.
    let edges = &params.frequency_bands;
    let mut band_energy = [0.0f64; 4];
    for &(f, m) in &bins {
        for band in 0..4 {
            let (lo, hi) = (edges[band], edges[band + 1]);
            let inside = f >= lo && (f < hi || (band == 3 && f == hi));
            if inside {
                band_energy[band] += energy(m);
                break;
            }
        }
    }
    let ratio = |e: f64| (e / total) as f32;

    let mut dominant = (0.0f32, f32::NEG_INFINITY);
    for &(f, m) in &bins {
        if m > dominant.1 {
            dominant = (f, m);
        }
    }
    let dominant_freq_hz = dominant.0;

    let magnitude_sum: f64 = bins.iter().map(|&(_, m)| f64::from(m)).sum();
    let weighted_sum: f64 = bins.iter().map(|&(f, m)| f64::from(f * m)).sum();
    let spectral_centroid_hz = if magnitude_sum > 0.0 {
        (weighted_sum / magnitude_sum) as f32
    } else {
        0.0
    };

    // Lowest qualifying bins.
    let head = &bins[..bins.len().min(HARMONIC_BINS)];
    let head_energy: f64 = head.iter().map(|&(_, m)| energy(m)).sum();
    let harmonic_strength = (head_energy / head.len() as f64).sqrt() as f32;

    let spectral_flatness = if bins.iter().all(|&(_, m)| m > 0.0) {
        let n = bins.len() as f64;
        let log_sum: f64 = bins.iter().map(|&(_, m)| f64::from(m).ln()).sum();
        ((log_sum / n).exp() / (magnitude_sum / n)) as f32
    } else {
        0.0
    };

    Ok(FeatureVector {
        low_band_ratio: ratio(band_energy[0]),
        mid_band_ratio: ratio(band_energy[1]),
        high_band_ratio: ratio(band_energy[2]),
        ultra_band_ratio: ratio(band_energy[3]),
        dominant_freq_hz,
        spectral_centroid_hz,
        harmonic_strength,
        spectral_flatness,
    }
    .sanitized())
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Mining,
    Uncertain,
    Normal,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Label::Mining => "mining",
            Label::Uncertain => "uncertain",
            Label::Normal => "normal",
        };
        write!(f, "{name}")
    }
}

/// Outcome of each mining rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleHits {
    pub low_band: bool,
    pub mid_band: bool,
    pub dominant_freq: bool,
    pub centroid: bool,
    pub harmonic: bool,
}

impl RuleHits {
    fn evaluate(params: &FineParams, features: &FeatureVector) -> Self {
        Self {
            low_band: features.low_band_ratio > params.low_band_ratio_min,
            mid_band: features.mid_band_ratio > params.mid_band_ratio_min,
            dominant_freq: features.dominant_freq_hz < params.dominant_freq_max,
            centroid: features.spectral_centroid_hz < params.spectral_centroid_max,
            harmonic: features.harmonic_strength > params.harmonic_strength_min,
        }
    }

    pub fn score(&self) -> u8 {
        let hits = [
            self.low_band,
            self.mid_band,
            self.dominant_freq,
            self.centroid,
            self.harmonic,
        ];
        hits.iter().filter(|hit| **hit).count() as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: Label,
    pub confidence: f32,
    pub rule_score: u8,
    pub rules: RuleHits,
    pub features: FeatureVector,
}

/// Rule-based spectrum classifier.
///
/// Holds no per-spectrum state. The only mutable part is the random source
/// for the confidence jitter, which sits behind a lock so `classify` works
/// through a shared reference.
pub struct FineDetector {
    config: SharedConfig,
    seed: Option<u64>,
    rng: Mutex<StdRng>,
}

impl FineDetector {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            seed: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible jitter sequence.
    pub fn with_seed(config: SharedConfig, seed: u64) -> Self {
        Self {
            config,
            seed: Some(seed),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Restart the jitter sequence: from the seed if there is one, otherwise
    /// from fresh entropy.
    pub fn reset(&self) {
        *self.rng.lock() = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
    }

    /// Features, or `None` when classification is unavailable.
    pub fn extract(&self, magnitudes: &[f32], frequencies: &[f32]) -> Option<FeatureVector> {
        self.try_extract(magnitudes, frequencies).ok()
    }

    pub fn try_extract(
        &self,
        magnitudes: &[f32],
        frequencies: &[f32],
    ) -> Result<FeatureVector, ClassifyError> {
        let params = self.config.read().fine.clone();
        extract_features(&params, magnitudes, frequencies)
    }

    pub fn classify(
        &self,
        magnitudes: &[f32],
        frequencies: &[f32],
    ) -> Result<Classification, ClassifyError> {
        let params = self.config.read().fine.clone();
        let features = match extract_features(&params, magnitudes, frequencies) {
            Ok(features) => features,
            Err(e) => {
                debug!("fine classification unavailable: {e}");
                return Err(e);
            }
        };

        let rules = RuleHits::evaluate(&params, &features);
        let rule_score = rules.score();
        let ratios = features.energy_ratios();
        let mean_ratio = ratios.iter().sum::<f32>() / ratios.len() as f32;
        let ratio_bonus = (mean_ratio * 2.0).min(RATIO_BONUS_CAP);
        let jitter = self.jitter(params.confidence_jitter);
        let raw = f32::from(rule_score) / 5.0 + ratio_bonus + jitter;
        let confidence = raw.clamp(0.0, MAX_CONFIDENCE);

        let label = if confidence >= params.confidence_threshold {
            Label::Mining
        } else if confidence >= UNCERTAIN_FLOOR {
            Label::Uncertain
        } else {
            Label::Normal
        };
        trace!(
            "fine: score {rule_score}/5 confidence {confidence:.3} dominant {:.1} Hz -> {label}",
            features.dominant_freq_hz
        );

        Ok(Classification {
            label,
            confidence,
            rule_score,
            rules,
            features,
        })
    }

    fn jitter(&self, half_width: f32) -> f32 {
        if half_width > 0.0 {
            self.rng.lock().gen_range(-half_width..=half_width)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::protocol::SpectrumKind;
    use approx::assert_abs_diff_eq;

    fn deterministic() -> FineDetector {
        let mut config = DetectionConfig::default();
        config.fine.confidence_jitter = 0.0;
        FineDetector::new(config.shared())
    }

    fn mining_spectrum() -> (Vec<f32>, &'static [f32]) {
        let freqs = SpectrumKind::Bins257.frequencies();
        let mut mags = vec![0.0f32; freqs.len()];
        mags[4] = 0.05; // 7.8 Hz
        mags[10] = 0.03; // 19.5 Hz
        (mags, freqs)
    }

    fn flat_spectrum() -> (Vec<f32>, &'static [f32]) {
        let freqs = SpectrumKind::Bins257.frequencies();
        let mags = freqs.iter().map(|f| 0.001 + 2e-7 * f).collect();
        (mags, freqs)
    }

    #[test]
    fn low_frequency_energy_is_mining() {
        let detector = deterministic();
        let (mags, freqs) = mining_spectrum();
        let result = detector.classify(&mags, freqs).unwrap();

        assert_eq!(result.rule_score, 5);
        assert_eq!(result.label, Label::Mining);
        assert_abs_diff_eq!(result.confidence, MAX_CONFIDENCE);
        assert_abs_diff_eq!(result.features.dominant_freq_hz, 7.8125);
        assert!(result.features.spectral_centroid_hz < 30.0);
        assert_eq!(result.features.spectral_flatness, 0.0);
    }

    #[test]
    fn flat_noise_is_normal() {
        let detector = deterministic();
        let (mags, freqs) = flat_spectrum();
        let result = detector.classify(&mags, freqs).unwrap();

        assert_eq!(result.rule_score, 0);
        assert_eq!(result.rules, RuleHits::default());
        assert_eq!(result.label, Label::Normal);
        assert_abs_diff_eq!(result.confidence, 0.2, epsilon = 1e-6);
        assert!(result.features.spectral_flatness > 0.99);
    }

    #[test]
    fn energy_ratios_sum_to_one() {
        let params = FineParams::default();
        for (mags, freqs) in [mining_spectrum(), flat_spectrum()] {
            let features = extract_features(&params, &mags, freqs).unwrap();
            let sum: f32 = features.energy_ratios().iter().sum();
            assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
        }

        let freqs = SpectrumKind::Bins21.frequencies();
        let mut mags = vec![0.0f32; freqs.len()];
        for (i, m) in mags.iter_mut().enumerate() {
            *m = (i as f32 * 0.37).sin().abs();
        }
        let features = extract_features(&params, &mags, freqs).unwrap();
        let sum: f32 = features.energy_ratios().iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn energy_below_cutoff_is_ignored() {
        let freqs = SpectrumKind::Bins257.frequencies();
        let mut mags = vec![0.0f32; freqs.len()];
        mags[0] = 10.0; // DC
        mags[2] = 10.0; // 3.9 Hz
        let detector = deterministic();
        assert_eq!(
            detector.try_extract(&mags, freqs),
            Err(ClassifyError::ZeroEnergy)
        );
        assert!(detector.extract(&mags, freqs).is_none());
        assert_eq!(
            detector.classify(&mags, freqs),
            Err(ClassifyError::ZeroEnergy)
        );
    }

    #[test]
    fn no_qualifying_bins() {
        let detector = deterministic();
        assert_eq!(
            detector.classify(&[1.0, 2.0], &[0.0, 2.5]),
            Err(ClassifyError::NoQualifyingBins { min_hz: 5.0 })
        );
        assert_eq!(
            detector.classify(&[1.0, 2.0], &[10.0]),
            Err(ClassifyError::LengthMismatch {
                magnitudes: 2,
                frequencies: 1,
            })
        );
    }

    #[test]
    fn non_finite_features_become_zero() {
        let freqs = SpectrumKind::Bins21.frequencies();
        let mut mags = vec![0.01f32; freqs.len()];
        mags[3] = f32::INFINITY;
        let features = extract_features(&FineParams::default(), &mags, freqs).unwrap();
        assert!(features.to_array().iter().all(|v| v.is_finite()));
        assert_eq!(features.dominant_freq_hz, 75.0);
    }

    #[test]
    fn jitter_is_bounded_and_seedable() {
        let config = DetectionConfig::default().shared();
        let a = FineDetector::with_seed(config.clone(), 7);
        let b = FineDetector::with_seed(config, 7);
        let (mags, freqs) = flat_spectrum();
        for _ in 0..100 {
            let ra = a.classify(&mags, freqs).unwrap();
            let rb = b.classify(&mags, freqs).unwrap();
            assert_eq!(ra.confidence, rb.confidence);
            assert!((0.15..=0.25).contains(&ra.confidence));
        }
    }

    #[test]
    fn reset_restarts_seeded_jitter() {
        let detector = FineDetector::with_seed(DetectionConfig::default().shared(), 7);
        let (mags, freqs) = flat_spectrum();
        let run = || -> Vec<f32> {
            (0..20)
                .map(|_| detector.classify(&mags, freqs).unwrap().confidence)
                .collect()
        };
        let first = run();
        detector.reset();
        let second = run();
        assert_eq!(first, second);
        assert!(first.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn bin_order_does_not_matter() {
        let (mags, freqs) = mining_spectrum();
        let mut rev_freqs = freqs.to_vec();
        let mut rev_mags = mags.clone();
        rev_freqs.reverse();
        rev_mags.reverse();

        let params = FineParams::default();
        let forward = extract_features(&params, &mags, freqs).unwrap();
        let reversed = extract_features(&params, &rev_mags, &rev_freqs).unwrap();
        assert_eq!(forward.harmonic_strength, reversed.harmonic_strength);
        assert_eq!(forward.dominant_freq_hz, reversed.dominant_freq_hz);
        assert_abs_diff_eq!(forward.low_band_ratio, reversed.low_band_ratio);
    }

    #[test]
    fn threshold_change_relabels() {
        let mut config = DetectionConfig::default();
        config.fine.confidence_jitter = 0.0;
        let shared = config.shared();
        let detector = FineDetector::new(shared.clone());

        // Only the centroid and harmonic rules hold.
        let freqs = SpectrumKind::Bins257.frequencies();
        let mut mags = vec![0.0f32; freqs.len()];
        mags[40] = 0.05; // 78 Hz, high band
        mags[3] = 0.02;
        let result = detector.classify(&mags, freqs).unwrap();
        assert_eq!(result.rule_score, 2);
        assert!(result.rules.centroid && result.rules.harmonic);
        assert_abs_diff_eq!(result.confidence, 0.6, epsilon = 1e-6);
        assert_eq!(result.label, Label::Uncertain);

        shared.write().fine.confidence_threshold = 0.5;
        assert_eq!(detector.classify(&mags, freqs).unwrap().label, Label::Mining);
    }
}
