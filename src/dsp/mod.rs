/// Signal conditioning ahead of the coarse detector.
///
/// ```text
///  FilterParams ──► butterworth::highpass ──► SosCascade (coefficients)
///                                               │
///  [x, y, z] ──► StreamingFilter (one state per axis) ──► [x', y', z']
/// ```
pub mod butterworth;
pub mod filter;

pub use butterworth::{Biquad, SosCascade};
pub use filter::{Axis, StreamingFilter};

/// Highest filter order accepted by the designer.
pub const MAX_ORDER: usize = 8;
