//! Exponential and logarithm maps between se(3) 6-vectors and rigid transforms.
//!
//! Vectors use the same layout as [`cv_core::Pose::se3`]: translation components first,
//! followed by the so(3) rotation components. Unlike `Pose::from_se3`, the translational part
//! here is the tangent-space velocity `υ`, coupled to the rotation through the left Jacobian
//! `V(ω)`, so that `exp` and `log` are true inverses on the group.

use cv_core::nalgebra::{IsometryMatrix3, Matrix3, Rotation3, Translation3, Vector3, Vector6};
use cv_core::Skew3;

/// Below this squared angle the series expansions of `V` and `V⁻¹` are used.
const SMALL_ANGLE_SQUARED: f64 = 1e-10;

/// Computes `V(ω) = I + (1 - cos θ)/θ² [ω]× + (θ - sin θ)/θ³ [ω]×²`.
fn left_jacobian(omega: Vector3<f64>) -> Matrix3<f64> {
    let theta2 = omega.norm_squared();
    let hat = omega.cross_matrix();
    let hat2 = hat * hat;
    let (b, c) = if theta2 <= SMALL_ANGLE_SQUARED {
        (0.5, 1.0 / 6.0)
    } else {
        let theta = theta2.sqrt();
        (
            (1.0 - theta.cos()) / theta2,
            (theta - theta.sin()) / (theta2 * theta),
        )
    };
    Matrix3::identity() + hat * b + hat2 * c
}

/// Computes `V(ω)⁻¹` in closed form.
fn left_jacobian_inverse(omega: Vector3<f64>) -> Matrix3<f64> {
    let theta2 = omega.norm_squared();
    let hat = omega.cross_matrix();
    let hat2 = hat * hat;
    let c = if theta2 <= SMALL_ANGLE_SQUARED {
        1.0 / 12.0
    } else {
        let theta = theta2.sqrt();
        (1.0 - theta * theta.sin() / (2.0 * (1.0 - theta.cos()))) / theta2
    };
    Matrix3::identity() - hat * 0.5 + hat2 * c
}

/// Maps a tangent vector `[υ, ω]` onto SE(3).
pub fn exp(xi: Vector6<f64>) -> IsometryMatrix3<f64> {
    let upsilon = Vector3::new(xi[0], xi[1], xi[2]);
    let omega = Vector3::new(xi[3], xi[4], xi[5]);
    let rotation: Rotation3<f64> = Skew3(omega).into();
    let translation = left_jacobian(omega) * upsilon;
    IsometryMatrix3::from_parts(Translation3::from(translation), rotation)
}

/// Maps a rigid transform back to its tangent vector `[υ, ω]`.
pub fn log(isometry: IsometryMatrix3<f64>) -> Vector6<f64> {
    let omega: Skew3 = isometry.rotation.into();
    let omega = omega.0;
    let upsilon = left_jacobian_inverse(omega) * isometry.translation.vector;
    Vector6::new(upsilon.x, upsilon.y, upsilon.z, omega.x, omega.y, omega.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exp_of_zero_is_identity() {
        let iso = exp(Vector6::zeros());
        assert_relative_eq!(*iso.rotation.matrix(), Matrix3::identity(), epsilon = 1e-15);
        assert_relative_eq!(iso.translation.vector, Vector3::zeros(), epsilon = 1e-15);
    }

    #[test]
    fn log_inverts_exp() {
        for xi in [
            Vector6::new(0.1, -0.2, 0.3, 0.05, 0.4, -0.3),
            Vector6::new(1.5, 0.0, -2.0, 0.0, 0.0, 1e-7),
            Vector6::new(-0.3, 0.7, 0.1, 1.2, -0.9, 0.4),
        ] {
            assert_relative_eq!(log(exp(xi)), xi, epsilon = 1e-9);
        }
    }

    #[test]
    fn pure_translation_is_unchanged() {
        let iso = exp(Vector6::new(1.0, 2.0, 3.0, 0.0, 0.0, 0.0));
        assert_relative_eq!(iso.translation.vector, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn jacobians_are_inverse() {
        let omega = Vector3::new(0.3, -0.1, 0.7);
        assert_relative_eq!(
            left_jacobian(omega) * left_jacobian_inverse(omega),
            Matrix3::identity(),
            epsilon = 1e-12
        );
    }
}
