use crate::{SCALE_C, SCALE_F};
use cv_core::nalgebra::{Matrix3, Vector4};

/// The number of entries in the photometric response lookup tables.
pub const RESPONSE_TABLE_SIZE: usize = 256;

/// The lowest table index that gradients are evaluated at.
const RESPONSE_GRADIENT_MIN: usize = 5;
/// The highest table index that gradients are evaluated at.
const RESPONSE_GRADIENT_MAX: usize = 250;

/// Camera intrinsics `[fx, fy, cx, cy]` and photometric response of the optimized camera.
///
/// The raw vector is what the solver steps in. The scaled vector holds the physical intrinsics,
/// and is mirrored as `f32` together with the inverse intrinsics `[1/fx, 1/fy, -cx/fx, -cy/fy]`
/// for residual evaluation. Every setter recomputes all of them.
#[derive(Debug, Clone)]
pub struct CalibrationState {
    width: usize,
    height: usize,
    value_zero: Vector4<f64>,
    value: Vector4<f64>,
    value_scaled: Vector4<f64>,
    value_scaledf: Vector4<f32>,
    value_scaledi: Vector4<f32>,
    value_minus_value_zero: Vector4<f64>,
    step: Vector4<f64>,
    step_backup: Vector4<f64>,
    value_backup: Vector4<f64>,
    /// Response function `B`, maps irradiance to image intensity.
    b: [f32; RESPONSE_TABLE_SIZE],
    /// Inverse response function, maps image intensity to irradiance.
    b_inv: [f32; RESPONSE_TABLE_SIZE],
}

/// The raw-to-scaled factors of `[fx, fy, cx, cy]`.
fn calibration_scale() -> Vector4<f64> {
    Vector4::new(SCALE_F, SCALE_F, SCALE_C, SCALE_C)
}

fn identity_response() -> [f32; RESPONSE_TABLE_SIZE] {
    let mut table = [0.0; RESPONSE_TABLE_SIZE];
    for (i, v) in table.iter_mut().enumerate() {
        *v = i as f32;
    }
    table
}

impl CalibrationState {
    /// Creates the calibration of a `width` by `height` camera from its physical intrinsics.
    ///
    /// The given intrinsics become the zero value and the response is the identity.
    pub fn new(width: usize, height: usize, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        let mut calibration = Self {
            width,
            height,
            value_zero: Vector4::zeros(),
            value: Vector4::zeros(),
            value_scaled: Vector4::zeros(),
            value_scaledf: Vector4::zeros(),
            value_scaledi: Vector4::zeros(),
            value_minus_value_zero: Vector4::zeros(),
            step: Vector4::zeros(),
            step_backup: Vector4::zeros(),
            value_backup: Vector4::zeros(),
            b: identity_response(),
            b_inv: identity_response(),
        };
        calibration.set_scaled(Vector4::new(fx, fy, cx, cy));
        calibration.value_zero = calibration.value;
        calibration.value_minus_value_zero = Vector4::zeros();
        calibration
    }

    /// Sets the raw intrinsics and derives every other representation.
    pub fn set_raw(&mut self, value: Vector4<f64>) {
        self.value = value;
        self.value_scaled = value.component_mul(&calibration_scale());
        self.update_derived();
    }

    /// Sets the physical intrinsics and derives every other representation.
    pub fn set_scaled(&mut self, value_scaled: Vector4<f64>) {
        self.value_scaled = value_scaled;
        self.value = value_scaled.component_div(&calibration_scale());
        self.update_derived();
    }

    fn update_derived(&mut self) {
        self.value_scaledf = self.value_scaled.map(|v| v as f32);
        let f = self.value_scaledf;
        self.value_scaledi = Vector4::new(1.0 / f[0], 1.0 / f[1], -f[2] / f[0], -f[3] / f[1]);
        self.value_minus_value_zero = self.value - self.value_zero;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn raw(&self) -> Vector4<f64> {
        self.value
    }

    pub fn scaled(&self) -> Vector4<f64> {
        self.value_scaled
    }

    pub fn raw_zero(&self) -> Vector4<f64> {
        self.value_zero
    }

    /// The raw intrinsics relative to the linearization point.
    pub fn raw_minus_zero(&self) -> Vector4<f64> {
        self.value_minus_value_zero
    }

    pub fn scaled_f32(&self) -> Vector4<f32> {
        self.value_scaledf
    }

    /// Returns `[1/fx, 1/fy, -cx/fx, -cy/fy]`.
    pub fn inverse_scaled_f32(&self) -> Vector4<f32> {
        self.value_scaledi
    }

    #[inline(always)]
    pub fn fx(&self) -> f32 {
        self.value_scaledf[0]
    }

    #[inline(always)]
    pub fn fy(&self) -> f32 {
        self.value_scaledf[1]
    }

    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.value_scaledf[2]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.value_scaledf[3]
    }

    #[inline(always)]
    pub fn fx_inv(&self) -> f32 {
        self.value_scaledi[0]
    }

    #[inline(always)]
    pub fn fy_inv(&self) -> f32 {
        self.value_scaledi[1]
    }

    #[inline(always)]
    pub fn cx_inv(&self) -> f32 {
        self.value_scaledi[2]
    }

    #[inline(always)]
    pub fn cy_inv(&self) -> f32 {
        self.value_scaledi[3]
    }

    /// The intrinsic matrix `K`.
    #[rustfmt::skip]
    pub fn k(&self) -> Matrix3<f32> {
        Matrix3::new(
            self.fx(), 0.0,       self.cx(),
            0.0,       self.fy(), self.cy(),
            0.0,       0.0,       1.0,
        )
    }

    /// The inverse intrinsic matrix `K⁻¹`, built from the inverse view without a matrix inversion.
    #[rustfmt::skip]
    pub fn k_inverse(&self) -> Matrix3<f32> {
        Matrix3::new(
            self.fx_inv(), 0.0,           self.cx_inv(),
            0.0,           self.fy_inv(), self.cy_inv(),
            0.0,           0.0,           1.0,
        )
    }

    pub fn step(&self) -> Vector4<f64> {
        self.step
    }

    pub fn set_step(&mut self, step: Vector4<f64>) {
        self.step = step;
    }

    /// Remembers the current value and step so a rejected update can be undone.
    pub fn backup_state(&mut self) {
        self.step_backup = self.step;
        self.value_backup = self.value;
    }

    /// Returns to the value saved by [`CalibrationState::backup_state`].
    pub fn restore_backup(&mut self) {
        self.step = self.step_backup;
        self.set_raw(self.value_backup);
    }

    /// Sets the value to the backed up value advanced by `factor` times the current step.
    pub fn step_from_backup(&mut self, factor: f64) {
        self.set_raw(self.value_backup + self.step * factor);
    }

    pub fn response(&self) -> &[f32; RESPONSE_TABLE_SIZE] {
        &self.b
    }

    pub fn inverse_response(&self) -> &[f32; RESPONSE_TABLE_SIZE] {
        &self.b_inv
    }

    /// Installs the inverse response function and derives the forward response by inverting it.
    ///
    /// The inverse must be monotonically increasing. Intensities it cannot invert keep their
    /// previous forward value; the endpoints are pinned to `0` and `255`.
    pub fn set_inverse_response(&mut self, b_inv: &[f32; RESPONSE_TABLE_SIZE]) {
        self.b_inv = *b_inv;
        for i in 1..RESPONSE_TABLE_SIZE - 1 {
            let target = i as f32;
            if let Some(s) =
                (1..RESPONSE_TABLE_SIZE - 1).find(|&s| b_inv[s] <= target && b_inv[s + 1] >= target)
            {
                let span = b_inv[s + 1] - b_inv[s];
                // A flat run maps onto its first sample.
                self.b[i] = if span > 0.0 {
                    s as f32 + (target - b_inv[s]) / span
                } else {
                    s as f32
                };
            }
        }
        self.b[0] = 0.0;
        self.b[RESPONSE_TABLE_SIZE - 1] = (RESPONSE_TABLE_SIZE - 1) as f32;
    }

    /// The local slope of the response function at `intensity`.
    ///
    /// The intensity is rounded and clamped to `[5, 250]`, so this never fails.
    #[inline(always)]
    pub fn response_gradient(&self, intensity: f32) -> f32 {
        let c = gradient_index(intensity);
        self.b[c + 1] - self.b[c]
    }

    /// The local slope of the inverse response function at `intensity`.
    ///
    /// The intensity is rounded and clamped to `[5, 250]`, so this never fails.
    #[inline(always)]
    pub fn inverse_response_gradient(&self, intensity: f32) -> f32 {
        let c = gradient_index(intensity);
        self.b_inv[c + 1] - self.b_inv[c]
    }
}

/// Rounds and clamps an intensity into the table range that gradients are evaluated on.
///
/// NaN maps to the lower bound.
#[inline(always)]
fn gradient_index(intensity: f32) -> usize {
    let c = (intensity + 0.5) as i32;
    c.clamp(RESPONSE_GRADIENT_MIN as i32, RESPONSE_GRADIENT_MAX as i32) as usize
}
