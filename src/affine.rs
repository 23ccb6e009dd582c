use cv_core::nalgebra::Vector2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Affine brightness parameters of a frame, mapping the global (reference) photometric space
/// into the frame's local one:
///
/// `I_frame = exp(a) * exposure * I_global + b`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct AffineLight {
    pub a: f64,
    pub b: f64,
}

impl AffineLight {
    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    pub fn vec(self) -> Vector2<f64> {
        Vector2::new(self.a, self.b)
    }

    /// Computes the multiplicative and additive terms `(a, b)` that take an intensity from the
    /// photometric space of frame `F` into the photometric space of frame `T`.
    ///
    /// If either exposure is unknown (zero) both are treated as `1.0`.
    pub fn from_to_exposure(
        exposure_from: f64,
        exposure_to: f64,
        g2f: AffineLight,
        g2t: AffineLight,
    ) -> Vector2<f64> {
        let (exposure_from, exposure_to) = if exposure_from == 0.0 || exposure_to == 0.0 {
            (1.0, 1.0)
        } else {
            (exposure_from, exposure_to)
        };
        let a = (g2t.a - g2f.a).exp() * exposure_to / exposure_from;
        let b = g2t.b - a * g2f.b;
        Vector2::new(a, b)
    }
}

/// Composes two affine mappings already in multiplicative form (`XtoWorld`), producing the
/// mapping from the photometric space of `from` into that of `to`.
pub fn aff_from_to(from: Vector2<f64>, to: Vector2<f64>) -> Vector2<f64> {
    Vector2::new(from[0] / to[0], (from[1] - to[1]) / to[0])
}
