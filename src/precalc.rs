use crate::{AffineLight, CalibrationState, FrameKey, FrameState};
use cv_core::nalgebra::{Matrix3, Vector2, Vector3};
use cv_core::Pose;

/// Quantities of an ordered (host, target) frame pair that residual evaluation needs for every
/// pixel, computed once per pass.
///
/// Every value is a function of the two frames and the calibration at the time of
/// [`PairPrecalc::set`]; it must be recomputed when any of them changes.
#[derive(Debug, Clone)]
pub struct PairPrecalc {
    pub host: FrameKey,
    pub target: FrameKey,

    /// Host-to-target rotation at the current state.
    pub rotation: Matrix3<f32>,
    /// `K R K⁻¹`
    pub krki: Matrix3<f32>,
    /// `R K⁻¹`
    pub rki: Matrix3<f32>,
    /// Host-to-target rotation at the linearization point.
    pub rotation_zero: Matrix3<f32>,

    /// Host-to-target affine brightness `(a, b)` at the current state.
    pub aff_mode: Vector2<f32>,
    /// Affine `b` of the host at its linearization point.
    pub b0_mode: f32,

    /// Host-to-target translation at the current state.
    pub translation: Vector3<f32>,
    /// `K t`
    pub kt: Vector3<f32>,
    /// Host-to-target translation at the linearization point.
    pub translation_zero: Vector3<f32>,

    /// The distance between the two optical centers.
    pub distance: f32,
}

impl PairPrecalc {
    pub fn new(
        host_key: FrameKey,
        host: &FrameState,
        target_key: FrameKey,
        target: &FrameState,
        calibration: &CalibrationState,
    ) -> Self {
        let mut precalc = Self {
            host: host_key,
            target: target_key,
            rotation: Matrix3::identity(),
            krki: Matrix3::identity(),
            rki: Matrix3::identity(),
            rotation_zero: Matrix3::identity(),
            aff_mode: Vector2::new(1.0, 0.0),
            b0_mode: 0.0,
            translation: Vector3::zeros(),
            kt: Vector3::zeros(),
            translation_zero: Vector3::zeros(),
            distance: 0.0,
        };
        precalc.set(host, target, calibration);
        precalc
    }

    /// Recomputes every value from the current state of `host`, `target` and `calibration`.
    pub fn set(&mut self, host: &FrameState, target: &FrameState, calibration: &CalibrationState) {
        let left_to_left_0 =
            target.evaluation_point().isometry() * host.evaluation_point().isometry().inverse();
        self.rotation_zero = left_to_left_0.rotation.matrix().map(|v| v as f32);
        self.translation_zero = left_to_left_0.translation.vector.map(|v| v as f32);

        let left_to_left = target.world_to_cam().isometry() * host.cam_to_world().isometry();
        self.rotation = left_to_left.rotation.matrix().map(|v| v as f32);
        self.translation = left_to_left.translation.vector.map(|v| v as f32);
        self.distance = left_to_left.translation.vector.norm() as f32;

        let k = calibration.k();
        let k_inverse = calibration.k_inverse();
        self.krki = k * self.rotation * k_inverse;
        self.rki = self.rotation * k_inverse;
        self.kt = k * self.translation;

        self.aff_mode = AffineLight::from_to_exposure(
            host.exposure(),
            target.exposure(),
            host.aff_g2l(),
            target.aff_g2l(),
        )
        .map(|v| v as f32);
        self.b0_mode = host.aff_g2l_0().b as f32;
    }
}
