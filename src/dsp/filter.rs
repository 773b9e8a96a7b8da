use log::warn;

use super::butterworth::SosCascade;
use crate::config::FilterParams;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Axis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Per-axis state
// ---------------------------------------------------------------------------

/// Section states of one axis. After a reset the axis is unprimed: its first
/// sample seeds the steady-state condition scaled to that sample.
#[derive(Debug, Clone)]
struct AxisState {
    sections: Vec<[f64; 2]>,
    primed: bool,
}

impl AxisState {
    fn new(sections: usize) -> Self {
        Self {
            sections: vec![[0.0; 2]; sections],
            primed: false,
        }
    }

    #[inline]
    fn step(&mut self, cascade: &SosCascade, zi: &[[f64; 2]], x: f32) -> f32 {
        let x = f64::from(x);
        if !self.primed {
            for (state, seed) in self.sections.iter_mut().zip(zi) {
                *state = [seed[0] * x, seed[1] * x];
            }
            self.primed = true;
        }
        cascade.process(x, &mut self.sections) as f32
    }
}

#[derive(Debug, Clone)]
enum Mode {
    Active {
        cascade: SosCascade,
        zi: Vec<[f64; 2]>,
        axes: [AxisState; 3],
    },
    /// Construction failed; samples are returned untouched.
    Passthrough,
}

// ---------------------------------------------------------------------------
// StreamingFilter
// ---------------------------------------------------------------------------

/// Triaxial high-pass filter whose state persists across calls.
///
/// Single samples and batches go through the same per-sample recursion, so
/// splitting a stream differently never changes the output.
#[derive(Debug, Clone)]
pub struct StreamingFilter {
    params: FilterParams,
    mode: Mode,
}

impl StreamingFilter {
    pub fn new(params: &FilterParams) -> Result<Self, ConfigError> {
        let cascade = SosCascade::design(params)?;
        let zi = cascade.steady_state();
        let sections = cascade.sections().len();
        Ok(Self {
            params: params.clone(),
            mode: Mode::Active {
                cascade,
                zi,
                axes: std::array::from_fn(|_| AxisState::new(sections)),
            },
        })
    }

    /// Like [`StreamingFilter::new`], but degrades to passthrough instead of
    /// failing. Callers should check [`StreamingFilter::is_passthrough`].
    pub fn new_or_passthrough(params: &FilterParams) -> Self {
        Self::new(params).unwrap_or_else(|e| {
            warn!("high-pass filter unavailable, passing raw samples through: {e}");
            Self::passthrough(params)
        })
    }

    pub fn passthrough(params: &FilterParams) -> Self {
        Self {
            params: params.clone(),
            mode: Mode::Passthrough,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.mode, Mode::Passthrough)
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Filter one value on one axis.
    pub fn filter_axis(&mut self, axis: Axis, value: f32) -> f32 {
        match &mut self.mode {
            Mode::Active { cascade, zi, axes } => axes[axis.index()].step(cascade, zi, value),
            Mode::Passthrough => value,
        }
    }

    /// Filter one triaxial sample.
    pub fn filter_sample(&mut self, sample: [f32; 3]) -> [f32; 3] {
        let mut out = sample;
        for axis in Axis::ALL {
            out[axis.index()] = self.filter_axis(axis, sample[axis.index()]);
        }
        out
    }

    /// Filter a contiguous block, one axis at a time.
    pub fn filter_batch(&mut self, samples: &[[f32; 3]]) -> Vec<[f32; 3]> {
        let mut out = samples.to_vec();
        if let Mode::Active { cascade, zi, axes } = &mut self.mode {
            for axis in Axis::ALL {
                let i = axis.index();
                let state = &mut axes[i];
                for sample in out.iter_mut() {
                    sample[i] = state.step(cascade, zi, sample[i]);
                }
            }
        }
        out
    }

    /// Return every axis to the steady-state initial condition.
    pub fn reset(&mut self) {
        if let Mode::Active { axes, .. } = &mut self.mode {
            for axis in axes.iter_mut() {
                axis.primed = false;
            }
        }
    }
}
