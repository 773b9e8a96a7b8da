use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// A misconfigured deployment. Raised at construction time so the pipeline
/// never starts with parameters it cannot honour.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// High-pass cutoff must lie strictly between 0 and the Nyquist frequency.
    #[error("filter cutoff {cutoff_hz} Hz is outside (0, {nyquist_hz}) Hz")]
    CutoffOutOfRange { cutoff_hz: f64, nyquist_hz: f64 },

    #[error("filter order {0} is not supported (expected 1..={max})", max = crate::dsp::MAX_ORDER)]
    UnsupportedOrder(usize),

    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),

    #[error("unknown filter family '{0}' (expected 'butterworth')")]
    UnknownFilterFamily(String),

    #[error("unknown sensitivity preset '{0}' (expected high, medium or low)")]
    UnknownSensitivity(String),

    /// A scalar threshold is negative, NaN or infinite.
    #[error("parameter '{name}' has invalid value {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("frequency band edges must be strictly ascending: {0:?}")]
    BandEdges(Vec<f32>),

    #[error("reading config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Reject `value` unless it is finite and non-negative.
    pub fn check_non_negative(name: &'static str, value: f64) -> Result<(), Self> {
        if value.is_finite() && value >= 0.0 {
            Ok(())
        } else {
            Err(Self::InvalidParameter { name, value })
        }
    }
}

// ---------------------------------------------------------------------------
// Classification errors
// ---------------------------------------------------------------------------

/// Frequency-domain features could not be computed, so no classification is
/// available for this spectrum. Distinct from a `normal` verdict.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifyError {
    #[error("spectrum has no bins at or above {min_hz} Hz")]
    NoQualifyingBins { min_hz: f32 },

    #[error("qualifying spectral energy is zero")]
    ZeroEnergy,

    #[error("magnitude/frequency length mismatch: {magnitudes} vs {frequencies}")]
    LengthMismatch {
        magnitudes: usize,
        frequencies: usize,
    },
}
