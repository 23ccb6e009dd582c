use crate::{
    frame_state_scale, frame_state_scale_inverse, se3, AffineLight, AffineMode, ImmaturePoint,
    OptimizerLink, PairPrecalc, PointKey, StateVector, WindowError, WindowSettings, SCALE_A,
    SCALE_B,
};
use cv_core::nalgebra::{Matrix4x2, Matrix6, Vector3, Vector6, U6};
use cv_core::{CameraToWorld, Pose, WorldToCamera};
use log::*;

/// Finite difference step used for the pose null space.
const NULLSPACE_POSE_EPS: f64 = 1e-3;
/// Relative translation change used for the scale null space.
const NULLSPACE_SCALE_FACTOR: f64 = 1.00001;

/// One level of the image pyramid of a frame.
#[derive(Debug, Clone, Default)]
pub struct PyramidLevel {
    pub width: usize,
    pub height: usize,
    /// Per pixel `(intensity, dx, dy)`.
    pub gradients: Vec<Vector3<f32>>,
    /// Per pixel `dx² + dy²`, used for pixel selection.
    pub abs_squared_grad: Vec<f32>,
}

/// The image pyramid buffers of a keyframe, produced externally and owned by the frame.
#[derive(Debug, Clone, Default)]
pub struct FrameImages {
    levels: Vec<PyramidLevel>,
}

impl FrameImages {
    /// Takes ownership of the pyramid levels, checking every buffer covers its level exactly.
    pub fn new(levels: Vec<PyramidLevel>) -> Result<Self, WindowError> {
        for (level, buffers) in levels.iter().enumerate() {
            let expected = buffers.width * buffers.height;
            for actual in [buffers.gradients.len(), buffers.abs_squared_grad.len()] {
                if actual != expected {
                    return Err(WindowError::LevelSize {
                        level,
                        expected,
                        actual,
                    });
                }
            }
        }
        Ok(Self { levels })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &PyramidLevel {
        &self.levels[level]
    }

    /// The full resolution `(intensity, dx, dy)` buffer.
    pub fn di(&self) -> &[Vector3<f32>] {
        &self.levels[0].gradients
    }

    pub fn dip(&self, level: usize) -> &[Vector3<f32>] {
        &self.levels[level].gradients
    }

    pub fn abs_squared_grad(&self, level: usize) -> &[f32] {
        &self.levels[level].abs_squared_grad
    }
}

/// The optimized state of one keyframe in the window.
///
/// The pose is parameterized as a left perturbation `ξ` of a fixed world-to-camera evaluation
/// pose, so that `worldToCam = exp(ξ) ∘ evalPT`. See the crate documentation for the relation
/// between raw and scaled state.
#[derive(Debug, Clone)]
pub struct FrameState {
    /// The node of the external optimizer which references this frame.
    optimizer_link: Option<OptimizerLink>,
    /// Sequential id, only counting keyframes.
    frame_id: usize,
    /// Position of the frame in the window.
    idx: usize,
    frame_energy_th: f32,
    ab_exposure: f64,
    flagged_for_marginalization: bool,

    /// Points with status `Active`.
    pub(crate) active_points: Vec<PointKey>,
    /// Points which have been absorbed into the marginalization prior.
    pub(crate) marginalized_points: Vec<PointKey>,
    /// Points which were discarded.
    pub(crate) outlier_points: Vec<PointKey>,
    /// Points with status `Inactive`.
    pub(crate) potential_points: Vec<PointKey>,
    pub(crate) immature_points: Vec<ImmaturePoint>,

    nullspaces_pose: Matrix6<f64>,
    nullspaces_affine: Matrix4x2<f64>,
    nullspaces_scale: Vector6<f64>,

    world_to_cam_eval_pt: WorldToCamera,
    state_zero: StateVector,
    state_scaled: StateVector,
    state: StateVector,
    step: StateVector,
    step_backup: StateVector,
    state_backup: StateVector,

    world_to_cam: WorldToCamera,
    cam_to_world: CameraToWorld,

    pub(crate) target_precalc: Vec<PairPrecalc>,
    images: FrameImages,
}

impl FrameState {
    /// Creates a keyframe anchored at the identity pose with neutral brightness.
    ///
    /// The energy threshold starts at `8·8·pattern_num`. Use
    /// [`FrameState::set_evaluation_point_scaled`] to anchor the frame at its tracked pose.
    pub fn new(frame_id: usize, exposure: f64, images: FrameImages, pattern_num: usize) -> Self {
        let mut frame = Self {
            optimizer_link: None,
            frame_id,
            idx: 0,
            frame_energy_th: (8 * 8 * pattern_num) as f32,
            ab_exposure: exposure,
            flagged_for_marginalization: false,
            active_points: vec![],
            marginalized_points: vec![],
            outlier_points: vec![],
            potential_points: vec![],
            immature_points: vec![],
            nullspaces_pose: Matrix6::zeros(),
            nullspaces_affine: Matrix4x2::zeros(),
            nullspaces_scale: Vector6::zeros(),
            world_to_cam_eval_pt: WorldToCamera::identity(),
            state_zero: StateVector::zeros(),
            state_scaled: StateVector::zeros(),
            state: StateVector::zeros(),
            step: StateVector::zeros(),
            step_backup: StateVector::zeros(),
            state_backup: StateVector::zeros(),
            world_to_cam: WorldToCamera::identity(),
            cam_to_world: CameraToWorld::identity(),
            target_precalc: vec![],
            images,
        };
        frame.set_evaluation_point_scaled(WorldToCamera::identity(), AffineLight::default());
        frame
    }

    /// Sets the raw state, deriving the scaled state and the current pose.
    pub fn set_raw(&mut self, state: StateVector) {
        self.state = state;
        self.state_scaled = state.component_mul(&frame_state_scale());
        self.update_pose();
    }

    /// Sets the scaled state, deriving the raw state and the current pose.
    pub fn set_scaled(&mut self, state_scaled: StateVector) {
        self.state_scaled = state_scaled;
        self.state = state_scaled.component_mul(&frame_state_scale_inverse());
        self.update_pose();
    }

    fn update_pose(&mut self) {
        self.world_to_cam = WorldToCamera(se3::exp(self.w2c_left_eps()) * self.world_to_cam_eval_pt.0);
        self.cam_to_world = self.world_to_cam.inverse();
    }

    /// Re-anchors the linearization point at `world_to_cam_eval_pt` with the raw `state`.
    ///
    /// The pose part of `state` must be zero, since the evaluation pose already holds it.
    pub fn set_evaluation_point(&mut self, world_to_cam_eval_pt: WorldToCamera, state: StateVector) {
        self.world_to_cam_eval_pt = world_to_cam_eval_pt;
        self.set_raw(state);
        self.set_state_zero(state);
    }

    /// Re-anchors the linearization point at `world_to_cam_eval_pt` with the given scaled
    /// affine brightness and a zero reference brightness.
    pub fn set_evaluation_point_scaled(
        &mut self,
        world_to_cam_eval_pt: WorldToCamera,
        aff_g2l: AffineLight,
    ) {
        let mut initial_state = StateVector::zeros();
        initial_state[6] = aff_g2l.a;
        initial_state[7] = aff_g2l.b;
        self.world_to_cam_eval_pt = world_to_cam_eval_pt;
        self.set_scaled(initial_state);
        self.set_state_zero(self.state);
    }

    fn set_state_zero(&mut self, state_zero: StateVector) {
        assert!(
            state_zero.fixed_rows::<U6>(0).norm_squared() < 1e-20,
            "the evaluation point must not contain a pose perturbation"
        );
        self.state_zero = state_zero;

        let eval = self.world_to_cam_eval_pt.0;
        let eval_inverse = eval.inverse();
        for i in 0..6 {
            let mut eps = Vector6::zeros();
            eps[i] = NULLSPACE_POSE_EPS;
            let plus = eval * se3::exp(eps) * eval_inverse;
            let minus = eval * se3::exp(-eps) * eval_inverse;
            self.nullspaces_pose.set_column(
                i,
                &((se3::log(plus) - se3::log(minus)) / (2.0 * NULLSPACE_POSE_EPS)),
            );
        }

        let mut plus = eval;
        plus.translation.vector *= NULLSPACE_SCALE_FACTOR;
        let mut minus = eval;
        minus.translation.vector /= NULLSPACE_SCALE_FACTOR;
        self.nullspaces_scale =
            (se3::log(plus * eval_inverse) - se3::log(minus * eval_inverse)) / 2e-3;

        self.nullspaces_affine = Matrix4x2::zeros();
        self.nullspaces_affine[(0, 0)] = 1.0;
        self.nullspaces_affine[(1, 1)] = self.aff_g2l_0().a.exp() * self.known_exposure();
    }

    /// The exposure, or `1.0` if it is unknown.
    fn known_exposure(&self) -> f64 {
        if self.ab_exposure > 0.0 {
            self.ab_exposure
        } else {
            1.0
        }
    }

    pub fn state(&self) -> StateVector {
        self.state
    }

    pub fn state_scaled(&self) -> StateVector {
        self.state_scaled
    }

    pub fn state_zero(&self) -> StateVector {
        self.state_zero
    }

    pub fn state_minus_state_zero(&self) -> StateVector {
        self.state - self.state_zero
    }

    pub fn evaluation_point(&self) -> WorldToCamera {
        self.world_to_cam_eval_pt
    }

    pub fn world_to_cam(&self) -> WorldToCamera {
        self.world_to_cam
    }

    pub fn cam_to_world(&self) -> CameraToWorld {
        self.cam_to_world
    }

    /// The scaled left perturbation `ξ` of the world-to-camera pose.
    pub fn w2c_left_eps(&self) -> Vector6<f64> {
        self.state_scaled.fixed_rows::<U6>(0).into_owned()
    }

    /// The current scaled affine brightness.
    pub fn aff_g2l(&self) -> AffineLight {
        AffineLight::new(self.state_scaled[6], self.state_scaled[7])
    }

    /// The scaled affine brightness at the linearization point.
    pub fn aff_g2l_0(&self) -> AffineLight {
        AffineLight::new(self.state_zero[6] * SCALE_A, self.state_zero[7] * SCALE_B)
    }

    pub fn nullspaces_pose(&self) -> &Matrix6<f64> {
        &self.nullspaces_pose
    }

    pub fn nullspaces_affine(&self) -> &Matrix4x2<f64> {
        &self.nullspaces_affine
    }

    pub fn nullspaces_scale(&self) -> &Vector6<f64> {
        &self.nullspaces_scale
    }

    /// The prior precision on each component of the raw state.
    ///
    /// The first keyframe of a session is anchored in pose and brightness, which removes the
    /// global gauge freedom. Later keyframes are only anchored photometrically.
    pub fn prior(&self, settings: &WindowSettings) -> StateVector {
        let mut p = StateVector::zeros();
        if self.frame_id == 0 {
            if !settings.remove_pose_prior {
                for i in 0..3 {
                    p[i] = settings.initial_trans_prior;
                    p[i + 3] = settings.initial_rot_prior;
                }
            }
            p[6] = settings.initial_aff_a_prior;
            p[7] = settings.initial_aff_b_prior;
        } else {
            p[6] = match settings.affine_mode_a {
                AffineMode::Fixed => settings.initial_aff_a_prior,
                AffineMode::Optimize(weight) => weight,
            };
            p[7] = match settings.affine_mode_b {
                AffineMode::Fixed => settings.initial_aff_b_prior,
                AffineMode::Optimize(weight) => weight,
            };
        }
        p[8] = settings.initial_aff_a_prior;
        p[9] = settings.initial_aff_b_prior;
        p
    }

    /// The prior mean, relative to the linearization point.
    pub fn prior_zero(&self) -> StateVector {
        StateVector::zeros()
    }

    pub fn step(&self) -> StateVector {
        self.step
    }

    pub fn set_step(&mut self, step: StateVector) {
        self.step = step;
    }

    /// Remembers the current state and step so a rejected update can be undone.
    pub fn backup_state(&mut self) {
        self.step_backup = self.step;
        self.state_backup = self.state;
    }

    /// Returns to the state saved by [`FrameState::backup_state`].
    pub fn restore_backup(&mut self) {
        self.step = self.step_backup;
        self.set_raw(self.state_backup);
    }

    /// Sets the state to the backed up state advanced by `factor` times the current step.
    pub fn step_from_backup(&mut self, factor: f64) {
        self.set_raw(self.state_backup + self.step * factor);
    }

    pub fn frame_id(&self) -> usize {
        self.frame_id
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub(crate) fn set_idx(&mut self, idx: usize) {
        self.idx = idx;
    }

    pub fn exposure(&self) -> f64 {
        self.ab_exposure
    }

    pub fn frame_energy_th(&self) -> f32 {
        self.frame_energy_th
    }

    /// Sets the energy threshold, which is adapted to the tracking residual.
    pub fn set_frame_energy_th(&mut self, frame_energy_th: f32) {
        self.frame_energy_th = frame_energy_th;
    }

    pub fn is_flagged_for_marginalization(&self) -> bool {
        self.flagged_for_marginalization
    }

    pub fn flag_for_marginalization(&mut self) {
        if !self.flagged_for_marginalization {
            debug!("frame {} flagged for marginalization", self.frame_id);
        }
        self.flagged_for_marginalization = true;
    }

    pub fn optimizer_link(&self) -> Option<OptimizerLink> {
        self.optimizer_link
    }

    pub fn link_optimizer(&mut self, link: OptimizerLink) {
        self.optimizer_link = Some(link);
    }

    /// Clears the optimizer link, which must happen before the frame is removed.
    pub fn unlink_optimizer(&mut self) -> Option<OptimizerLink> {
        self.optimizer_link.take()
    }

    pub fn active_points(&self) -> &[PointKey] {
        &self.active_points
    }

    pub fn marginalized_points(&self) -> &[PointKey] {
        &self.marginalized_points
    }

    pub fn outlier_points(&self) -> &[PointKey] {
        &self.outlier_points
    }

    pub fn potential_points(&self) -> &[PointKey] {
        &self.potential_points
    }

    pub fn immature_points(&self) -> &[ImmaturePoint] {
        &self.immature_points
    }

    /// All owned point keys, regardless of status.
    pub fn owned_points(&self) -> impl Iterator<Item = PointKey> + '_ {
        self.active_points
            .iter()
            .chain(&self.marginalized_points)
            .chain(&self.outlier_points)
            .chain(&self.potential_points)
            .copied()
    }

    /// Drops `point` from every point collection of the frame.
    pub(crate) fn forget_point(&mut self, point: PointKey) {
        for points in [
            &mut self.active_points,
            &mut self.marginalized_points,
            &mut self.outlier_points,
            &mut self.potential_points,
        ] {
            points.retain(|&p| p != point);
        }
    }

    /// The precalculated values of this frame as host towards every frame in the window.
    pub fn target_precalc(&self) -> &[PairPrecalc] {
        &self.target_precalc
    }

    pub fn images(&self) -> &FrameImages {
        &self.images
    }
}
