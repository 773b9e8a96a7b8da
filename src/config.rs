use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Detection parameters shared between the owner (parameter store, CLI) and
/// the detectors, which re-read them on every evaluation.
pub type SharedConfig = Arc<RwLock<DetectionConfig>>;

// ---------------------------------------------------------------------------
// DetectionConfig
// ---------------------------------------------------------------------------

/// Complete set of user-tunable detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub coarse: CoarseParams,
    pub fine: FineParams,
    pub filter: FilterParams,
    /// Gate fine classification on the coarse trigger-active flag.
    pub two_stage: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            coarse: CoarseParams::default(),
            fine: FineParams::default(),
            filter: FilterParams::default(),
            two_stage: true,
        }
    }
}

impl DetectionConfig {
    /// Read a JSON config document. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast checks for a misconfigured deployment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coarse.validate()?;
        self.fine.validate()?;
        self.filter.validate()
    }

    /// Overwrite thresholds with one of the named presets.
    pub fn apply_sensitivity(&mut self, preset: Sensitivity) {
        let (multiplier, peak, duration, confidence) = match preset {
            Sensitivity::High => (2.0, 1.5, 3.0, 0.6),
            Sensitivity::Medium => (2.5, 1.8, 5.0, 0.7),
            Sensitivity::Low => (3.5, 2.2, 8.0, 0.8),
        };
        self.coarse.rms_threshold_multiplier = multiplier;
        self.coarse.peak_factor_threshold = peak;
        self.coarse.duration_threshold_sec = duration;
        self.fine.confidence_threshold = confidence;
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

// ---------------------------------------------------------------------------
// Coarse (time-domain) parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseParams {
    /// Trigger threshold as a multiple of the baseline RMS.
    pub rms_threshold_multiplier: f32,
    pub peak_factor_threshold: f32,
    /// Seconds the trigger condition must hold before it is confirmed.
    pub duration_threshold_sec: f32,
    /// Quiet period after a confirmed trigger.
    pub cooldown_time_sec: f32,
    pub adaptive_enabled: bool,
    /// Exponential blend factor applied per evaluation.
    pub baseline_update_rate: f32,
}

impl Default for CoarseParams {
    fn default() -> Self {
        Self {
            rms_threshold_multiplier: 2.5,
            peak_factor_threshold: 1.8,
            duration_threshold_sec: 5.0,
            cooldown_time_sec: 30.0,
            adaptive_enabled: true,
            baseline_update_rate: 0.1,
        }
    }
}

impl CoarseParams {
    fn validate(&self) -> Result<(), ConfigError> {
        let scalars = [
            ("rms_threshold_multiplier", self.rms_threshold_multiplier),
            ("peak_factor_threshold", self.peak_factor_threshold),
            ("duration_threshold_sec", self.duration_threshold_sec),
            ("cooldown_time_sec", self.cooldown_time_sec),
            ("baseline_update_rate", self.baseline_update_rate),
        ];
        for (name, value) in scalars {
            ConfigError::check_non_negative(name, value.into())?;
        }
        if self.baseline_update_rate > 1.0 {
            return Err(ConfigError::InvalidParameter {
                name: "baseline_update_rate",
                value: self.baseline_update_rate.into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fine (frequency-domain) parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FineParams {
    /// Five ascending edges delimiting the low, mid, high and ultra bands.
    pub frequency_bands: [f32; 5],
    /// Bins below this frequency are excluded from every feature.
    pub min_frequency_hz: f32,
    pub low_band_ratio_min: f32,
    pub mid_band_ratio_min: f32,
    pub dominant_freq_max: f32,
    pub spectral_centroid_max: f32,
    pub harmonic_strength_min: f32,
    /// Confidence at or above which a spectrum is labelled `mining`.
    pub confidence_threshold: f32,
    /// Half-width of the symmetric random term added to the confidence.
    /// Zero makes classification deterministic.
    pub confidence_jitter: f32,
}

impl Default for FineParams {
    fn default() -> Self {
        Self {
            frequency_bands: [5.0, 15.0, 30.0, 100.0, 500.0],
            min_frequency_hz: 5.0,
            low_band_ratio_min: 0.3,
            mid_band_ratio_min: 0.15,
            dominant_freq_max: 30.0,
            spectral_centroid_max: 80.0,
            harmonic_strength_min: 0.005,
            confidence_threshold: 0.7,
            confidence_jitter: 0.05,
        }
    }
}

impl FineParams {
    fn validate(&self) -> Result<(), ConfigError> {
        let edges = &self.frequency_bands;
        let ascending = edges.windows(2).all(|w| w[0] < w[1]);
        if !ascending || edges.iter().any(|e| !e.is_finite()) {
            return Err(ConfigError::BandEdges(edges.to_vec()));
        }
        let scalars = [
            ("min_frequency_hz", self.min_frequency_hz),
            ("confidence_threshold", self.confidence_threshold),
            ("confidence_jitter", self.confidence_jitter),
            ("harmonic_strength_min", self.harmonic_strength_min),
        ];
        for (name, value) in scalars {
            ConfigError::check_non_negative(name, value.into())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Filter parameters
// ---------------------------------------------------------------------------

/// Supported filter families. Only one shape is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterFamily {
    #[default]
    Butterworth,
}

impl FromStr for FilterFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "butterworth" => Ok(FilterFamily::Butterworth),
            other => Err(ConfigError::UnknownFilterFamily(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub family: FilterFamily,
    pub cutoff_hz: f64,
    pub order: usize,
    pub sample_rate_hz: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            family: FilterFamily::Butterworth,
            cutoff_hz: 5.0,
            order: 4,
            sample_rate_hz: 1000.0,
        }
    }
}

impl FilterParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate_hz));
        }
        let nyquist_hz = self.sample_rate_hz / 2.0;
        if !(self.cutoff_hz > 0.0 && self.cutoff_hz < nyquist_hz) {
            return Err(ConfigError::CutoffOutOfRange {
                cutoff_hz: self.cutoff_hz,
                nyquist_hz,
            });
        }
        if self.order == 0 || self.order > crate::dsp::MAX_ORDER {
            return Err(ConfigError::UnsupportedOrder(self.order));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sensitivity presets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    High,
    Medium,
    Low,
}

impl FromStr for Sensitivity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Sensitivity::High),
            "medium" => Ok(Sensitivity::Medium),
            "low" => Ok(Sensitivity::Low),
            other => Err(ConfigError::UnknownSensitivity(other.to_string())),
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sensitivity::High => "high",
            Sensitivity::Medium => "medium",
            Sensitivity::Low => "low",
        };
        write!(f, "{name}")
    }
}
