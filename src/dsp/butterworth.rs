use std::f64::consts::PI;

use crate::config::{FilterFamily, FilterParams};
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Biquad – one second-order section
// ---------------------------------------------------------------------------

/// Normalised second-order section (`a0 == 1`), run in transposed direct
/// form II.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    /// Numerator `b0, b1, b2`.
    pub b: [f64; 3],
    /// Denominator `a1, a2`.
    pub a: [f64; 2],
}

impl Biquad {
    /// Second-order high-pass, bilinear transform prewarped at the cutoff.
    pub fn highpass(cutoff_hz: f64, sample_rate_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate_hz;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a0 = 1.0 + alpha;

        let edge = (1.0 + cos_w0) / 2.0 / a0;
        Self {
            b: [edge, -2.0 * edge, edge],
            a: [-2.0 * cos_w0 / a0, (1.0 - alpha) / a0],
        }
    }

    /// First-order high-pass stored as a degenerate biquad.
    pub fn first_order_highpass(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        let k = (PI * cutoff_hz / sample_rate_hz).tan();
        let norm = 1.0 / (1.0 + k);
        Self {
            b: [norm, -norm, 0.0],
            a: [(k - 1.0) * norm, 0.0],
        }
    }

    #[inline]
    pub fn process(&self, x: f64, z: &mut [f64; 2]) -> f64 {
        let y = self.b[0] * x + z[0];
        z[0] = self.b[1] * x - self.a[0] * y + z[1];
        z[1] = self.b[2] * x - self.a[1] * y;
        y
    }

    /// Gain at 0 Hz.
    pub fn dc_gain(&self) -> f64 {
        let num: f64 = self.b.iter().sum();
        num / (1.0 + self.a[0] + self.a[1])
    }

    /// State this section settles into under a constant unit input.
    pub fn step_state(&self) -> [f64; 2] {
        let y = self.dc_gain();
        let z1 = self.b[2] - self.a[1] * y;
        let z0 = self.b[1] - self.a[0] * y + z1;
        [z0, z1]
    }

    /// Magnitude response at `freq_hz`.
    pub fn gain_at(&self, freq_hz: f64, sample_rate_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / sample_rate_hz;
        let eval = |c0: f64, c1: f64, c2: f64| {
            let re = c0 + c1 * w.cos() + c2 * (2.0 * w).cos();
            let im = -(c1 * w.sin() + c2 * (2.0 * w).sin());
            re.hypot(im)
        };
        eval(self.b[0], self.b[1], self.b[2]) / eval(1.0, self.a[0], self.a[1])
    }
}

// ---------------------------------------------------------------------------
// SosCascade – a full filter as cascaded sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SosCascade {
    sections: Vec<Biquad>,
}

impl SosCascade {
    /// Design the high-pass described by `params`.
    pub fn design(params: &FilterParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let cascade = match params.family {
            FilterFamily::Butterworth => Self::butterworth_highpass(params),
        };
        Ok(cascade)
    }

    /// Butterworth high-pass of the given order. Pole pairs become biquads
    /// with `Q = 1 / (2 cos ψ)`; an odd order adds one first-order section.
    fn butterworth_highpass(params: &FilterParams) -> Self {
        let FilterParams {
            order,
            cutoff_hz,
            sample_rate_hz,
            ..
        } = *params;
        let n = order as f64;
        let mut sections: Vec<Biquad> = (1..=order / 2)
            .map(|k| {
                let psi = PI * (n + 1.0 - 2.0 * k as f64) / (2.0 * n);
                Biquad::highpass(cutoff_hz, sample_rate_hz, 1.0 / (2.0 * psi.cos()))
            })
            .collect();
        if order % 2 == 1 {
            sections.push(Biquad::first_order_highpass(cutoff_hz, sample_rate_hz));
        }
        Self { sections }
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Per-section state for a cascade settled under a constant unit input;
    /// multiply by the first sample to start a stream without a transient.
    pub fn steady_state(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|s| {
                let [z0, z1] = s.step_state();
                let zi = [z0 * scale, z1 * scale];
                scale *= s.dc_gain();
                zi
            })
            .collect()
    }

    #[inline]
    pub fn process(&self, x: f64, state: &mut [[f64; 2]]) -> f64 {
        self.sections
            .iter()
            .zip(state.iter_mut())
            .fold(x, |acc, (section, z)| section.process(acc, z))
    }

    pub fn gain_at(&self, freq_hz: f64, sample_rate_hz: f64) -> f64 {
        self.sections
            .iter()
            .map(|s| s.gain_at(freq_hz, sample_rate_hz))
            .product()
    }
}
