//! # Rust CV Direct
//!
//! This crate holds the state that a sliding-window direct sparse odometry backend optimizes:
//! keyframe poses with affine brightness parameters ([`FrameState`]), inverse-depth points hosted
//! by those keyframes ([`PointState`]), the camera intrinsics and photometric response
//! ([`CalibrationState`]) and the per frame pair quantities that residual evaluation reads
//! ([`PairPrecalc`]). Everything is stored in a [`Window`], an arena addressed by stable keys.
//!
//! The crate does not compute residuals or solve the normal equations. An external optimizer
//! reads the scaled values stored here, accumulates its Hessian, and writes updated raw state
//! back through the setters.
//!
//! ## Scaled and raw state
//!
//! Every optimized variable exists twice: the raw value the solver steps in, and the scaled
//! (physical) value used by residual evaluation. The two are related by fixed per-component
//! factors so that a unit step in any raw component has a comparable effect on the photometric
//! error:
//!
//! ```text
//! scaled = SCALE ⊙ raw        raw = SCALE⁻¹ ⊙ scaled
//! ```
//!
//! Every setter recomputes both views, so neither is ever observable out of sync with the other.
//!
//! ## Linearization point
//!
//! A frame keeps a fixed evaluation pose `evalPT` and the state `state_zero` it had when that
//! pose was set. Information that has already been folded into the optimizer's marginalization
//! prior was linearized there, so these only move when the frame is explicitly re-anchored with
//! [`FrameState::set_evaluation_point`] or [`FrameState::set_evaluation_point_scaled`]. The
//! current pose is always derived from them:
//!
//! ```text
//! worldToCam = exp(ξ) ∘ evalPT
//! ```

mod affine;
mod calibration;
mod error;
mod frame;
mod point;
mod precalc;
pub mod se3;
mod settings;
mod window;

pub use affine::*;
pub use calibration::*;
pub use cv_core;
pub use error::*;
pub use frame::*;
pub use point::*;
pub use precalc::*;
pub use settings::*;
pub use window::*;

use cv_core::nalgebra::{VectorN, U10};

/// The 10 component frame state.
///
/// * `0..3` translation part of the left perturbation of the world-to-camera pose
/// * `3..6` rotation part of the left perturbation of the world-to-camera pose
/// * `6..8` affine brightness `a` and `b` of the frame
/// * `8..10` reference affine brightness `a` and `b` used by the prior
pub type StateVector = VectorN<f64, U10>;

/// Scales the internal inverse depth to the physical inverse depth.
pub const SCALE_IDEPTH: f64 = 1.0;
pub const SCALE_XI_ROT: f64 = 1.0;
pub const SCALE_XI_TRANS: f64 = 0.5;
/// Focal length scale.
pub const SCALE_F: f64 = 50.0;
/// Principal point scale.
pub const SCALE_C: f64 = 50.0;
pub const SCALE_A: f64 = 10.0;
pub const SCALE_B: f64 = 1000.0;

/// The maximum number of samples in a point's intensity pattern.
pub const MAX_RES_PER_POINT: usize = 8;

/// Per-component factors taking a raw [`StateVector`] to the scaled one.
pub fn frame_state_scale() -> StateVector {
    StateVector::from_column_slice(&[
        SCALE_XI_TRANS,
        SCALE_XI_TRANS,
        SCALE_XI_TRANS,
        SCALE_XI_ROT,
        SCALE_XI_ROT,
        SCALE_XI_ROT,
        SCALE_A,
        SCALE_B,
        SCALE_A,
        SCALE_B,
    ])
}

/// Per-component factors taking a scaled [`StateVector`] back to the raw one.
pub fn frame_state_scale_inverse() -> StateVector {
    frame_state_scale().map(|s| 1.0 / s)
}
