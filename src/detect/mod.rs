/// Two-stage anomaly detection.
///
/// ```text
///  filtered [x, y, z] ──► CoarseDetector ──► confirmed trigger (bool)
///                              │
///                              └─ trigger-active flag
///                                        │ (gates, in two-stage mode)
///                                        ▼
///  spectrum (magnitudes, frequencies) ──► FineDetector ──► Classification
/// ```
pub mod coarse;
pub mod fine;

pub use coarse::{CoarseDetector, CoarseStatus, TriggerState};
pub use fine::{Classification, FeatureVector, FineDetector, Label};
