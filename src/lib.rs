//! Streaming vibration telemetry decoder and two-stage mining-activity
//! detector.
//!
//! ```text
//!  bytes ──► protocol::FrameDecoder ──► Frame
//!                                         │
//!            ┌────────────────────────────┴──────────────────┐
//!            ▼ RawAccel                                       ▼ Spectrum21 / Spectrum257
//!   dsp::StreamingFilter ──► detect::CoarseDetector ──gate──► detect::FineDetector
//!                                   │                                   │
//!                                   └────────► pipeline::DetectionEvent ◄┘
//! ```

pub mod config;
pub mod data;
pub mod detect;
pub mod dsp;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod protocol;
pub mod sink;

pub use config::{DetectionConfig, SharedConfig};
pub use error::{ClassifyError, ConfigError};
pub use pipeline::{ClockSource, DetectionEvent, Pipeline};
