/// Data layer: recorded spectra and their loaders.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader  │  parse file → SpectrumRecording
///   └──────────┘
///        │
///        ▼
///   ┌───────────────────┐
///   │ SpectrumRecording │  Vec<RecordedSpectrum> (frequencies, magnitudes)
///   └───────────────────┘
///        │
///        ▼
///   FineDetector::classify
/// ```

pub mod loader;
pub mod model;

pub use loader::load_file;
pub use model::{RecordedSpectrum, SpectrumRecording};
