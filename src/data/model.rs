use serde::{Deserialize, Serialize};

use crate::protocol::{Frame, SpectrumKind};

// ---------------------------------------------------------------------------
// RecordedSpectrum – one stored spectrum
// ---------------------------------------------------------------------------

/// A spectrum read back from disk rather than off the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSpectrum {
    /// Device timestamp (ms), if the recording kept it.
    pub timestamp: Option<u32>,
    /// Ascending frequency axis (Hz) – same length as `magnitudes`.
    pub frequencies: Vec<f32>,
    pub magnitudes: Vec<f32>,
    /// Free-form annotation, e.g. the site or the known condition.
    pub tag: Option<String>,
}

impl RecordedSpectrum {
    /// Spectrum of a decoded frame; `None` for raw acceleration.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        Some(Self {
            timestamp: Some(frame.timestamp()),
            frequencies: frame.frequencies()?.to_vec(),
            magnitudes: frame.magnitudes()?.to_vec(),
            tag: None,
        })
    }
}

/// Frequency axis of a device spectrum with `bins` bins, if it is one.
pub fn infer_frequencies(bins: usize) -> Option<Vec<f32>> {
    let kind = SpectrumKind::from_bin_count(bins)?;
    Some(kind.frequencies().to_vec())
}

// ---------------------------------------------------------------------------
// SpectrumRecording – a loaded file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumRecording {
    pub spectra: Vec<RecordedSpectrum>,
}

impl SpectrumRecording {
    pub fn from_spectra(spectra: Vec<RecordedSpectrum>) -> Self {
        Self { spectra }
    }

    /// Keep the spectrum frames of a decoded capture.
    pub fn from_frames<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> Self {
        let mut spectra = Vec::new();
        for frame in frames {
            spectra.extend(RecordedSpectrum::from_frame(frame));
        }
        Self::from_spectra(spectra)
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordedSpectrum> {
        self.spectra.iter()
    }
}
