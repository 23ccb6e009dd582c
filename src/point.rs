use crate::{
    CalibrationState, FrameKey, OptimizerLink, WindowError, WindowSettings, MAX_RES_PER_POINT,
    SCALE_IDEPTH,
};
use arrayvec::ArrayVec;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The relative depth change used to compute the inverse depth null space scale.
const NULLSPACE_DEPTH_FACTOR: f64 = 1.001;

/// The lifecycle status of a point.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PointStatus {
    /// The point is an optimized variable.
    Active,
    Inactive,
    /// The residuals of the point were consistently bad and it was discarded.
    Outlier,
    /// The point is no longer observed by enough frames to stay in the window.
    OutOfBounds,
    /// The point has been absorbed into the marginalization prior.
    Marginalized,
}

/// The classification the optimizer reports for a residual after a pass.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResidualState {
    /// Visible and good.
    In,
    /// Visible, but the observation geometry is degenerate.
    BadCondition,
    Outlier,
    /// Projected outside of the target image.
    Oob,
}

/// A residual of a point towards a target frame, as reported by the optimizer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PointResidual {
    pub target: FrameKey,
    pub state: ResidualState,
}

/// An entry in the record of the latest residual outcomes.
///
/// The target is cleared when the residual is detached, but the outcome is kept.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LastResidual {
    pub target: Option<FrameKey>,
    pub state: ResidualState,
}

/// A candidate point whose depth is still being refined by the frontend.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmaturePoint {
    pub host: FrameKey,
    pub u: f32,
    pub v: f32,
    /// Intensities of the pattern samples in the host frame.
    pub color: ArrayVec<f32, MAX_RES_PER_POINT>,
    /// Host weights of the pattern samples.
    pub weights: ArrayVec<f32, MAX_RES_PER_POINT>,
    pub idepth_min: f32,
    pub idepth_max: f32,
    pub energy_th: f32,
    /// The selection category of the pixel.
    pub kind: f32,
}

impl ImmaturePoint {
    /// Creates a candidate with an unbounded depth interval.
    pub fn new(
        host: FrameKey,
        u: f32,
        v: f32,
        color: &[f32],
        weights: &[f32],
        energy_th: f32,
    ) -> Result<Self, WindowError> {
        if color.len() > MAX_RES_PER_POINT || weights.len() > MAX_RES_PER_POINT {
            return Err(WindowError::PatternTooLong(color.len().max(weights.len())));
        }
        if color.len() != weights.len() {
            return Err(WindowError::PatternMismatch {
                colors: color.len(),
                weights: weights.len(),
            });
        }
        Ok(Self {
            host,
            u,
            v,
            color: color.iter().copied().collect(),
            weights: weights.iter().copied().collect(),
            idepth_min: 0.0,
            idepth_max: f32::NAN,
            energy_th,
            kind: 1.0,
        })
    }

    /// Narrows the inverse depth interval of the candidate.
    #[must_use]
    pub fn with_idepth_range(self, idepth_min: f32, idepth_max: f32) -> Self {
        Self {
            idepth_min,
            idepth_max,
            ..self
        }
    }
}

/// The optimized inverse depth of a point and its lifecycle state.
#[derive(Debug, Clone)]
pub struct PointState {
    /// The node of the external optimizer which references this point.
    optimizer_link: Option<OptimizerLink>,
    host: FrameKey,
    u: f32,
    v: f32,
    color: ArrayVec<f32, MAX_RES_PER_POINT>,
    weights: ArrayVec<f32, MAX_RES_PER_POINT>,
    energy_th: f32,
    kind: f32,
    has_depth_prior: bool,

    idepth_scaled: f32,
    idepth_zero_scaled: f32,
    idepth_zero: f32,
    idepth: f32,
    step: f32,
    step_backup: f32,
    idepth_backup: f32,

    nullspace_scale: f32,
    idepth_hessian: f32,
    max_rel_baseline: f32,
    num_good_residuals: usize,

    residuals: Vec<PointResidual>,
    /// The latest residual outcomes, newest first.
    last_residuals: ArrayVec<LastResidual, 2>,
    status: PointStatus,
}

impl PointState {
    /// Promotes a candidate, starting at the center of its inverse depth interval.
    ///
    /// The candidate must have a finite upper inverse depth bound.
    pub fn from_immature(candidate: &ImmaturePoint, calibration: &CalibrationState) -> Self {
        assert!(
            candidate.idepth_max.is_finite(),
            "candidate at ({}, {}) has no finite inverse depth bound",
            candidate.u,
            candidate.v
        );
        debug_assert!(
            candidate.u >= 0.0
                && candidate.v >= 0.0
                && (candidate.u as usize) < calibration.width()
                && (candidate.v as usize) < calibration.height(),
            "candidate lies outside the image"
        );
        let idepth = (candidate.idepth_max + candidate.idepth_min) * 0.5;
        let mut point = Self {
            optimizer_link: None,
            host: candidate.host,
            u: candidate.u,
            v: candidate.v,
            color: candidate.color.clone(),
            weights: candidate.weights.clone(),
            energy_th: candidate.energy_th,
            kind: candidate.kind,
            has_depth_prior: false,
            idepth_scaled: 0.0,
            idepth_zero_scaled: 0.0,
            idepth_zero: 0.0,
            idepth: 0.0,
            step: 0.0,
            step_backup: 0.0,
            idepth_backup: 0.0,
            nullspace_scale: 0.0,
            idepth_hessian: 0.0,
            max_rel_baseline: 0.0,
            num_good_residuals: 0,
            residuals: vec![],
            last_residuals: ArrayVec::new(),
            status: PointStatus::Active,
        };
        point.set_idepth_scaled(idepth);
        point.set_idepth_zero(point.idepth);
        point
    }

    pub fn set_idepth(&mut self, idepth: f32) {
        self.idepth = idepth;
        self.idepth_scaled = (SCALE_IDEPTH * idepth as f64) as f32;
    }

    pub fn set_idepth_scaled(&mut self, idepth_scaled: f32) {
        self.idepth = (idepth_scaled as f64 / SCALE_IDEPTH) as f32;
        self.idepth_scaled = idepth_scaled;
    }

    /// Freezes the linearization point of the inverse depth and computes the null space scale,
    /// the change of inverse depth under a ±0.1% change of depth.
    pub fn set_idepth_zero(&mut self, idepth: f32) {
        self.idepth_zero = idepth;
        self.idepth_zero_scaled = (SCALE_IDEPTH * idepth as f64) as f32;
        let idepth = idepth as f64;
        self.nullspace_scale =
            (-(idepth * NULLSPACE_DEPTH_FACTOR - idepth / NULLSPACE_DEPTH_FACTOR) * 500.0) as f32;
    }

    pub fn idepth(&self) -> f32 {
        self.idepth
    }

    pub fn idepth_scaled(&self) -> f32 {
        self.idepth_scaled
    }

    pub fn idepth_zero(&self) -> f32 {
        self.idepth_zero
    }

    pub fn idepth_zero_scaled(&self) -> f32 {
        self.idepth_zero_scaled
    }

    pub fn nullspace_scale(&self) -> f32 {
        self.nullspace_scale
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn set_step(&mut self, step: f32) {
        self.step = step;
    }

    /// Remembers the current inverse depth and step so a rejected update can be undone.
    pub fn backup_state(&mut self) {
        self.step_backup = self.step;
        self.idepth_backup = self.idepth;
    }

    /// Returns to the inverse depth saved by [`PointState::backup_state`].
    pub fn restore_backup(&mut self) {
        self.step = self.step_backup;
        self.set_idepth(self.idepth_backup);
    }

    /// Sets the inverse depth to the backed up value advanced by `factor` times the current step.
    pub fn step_from_backup(&mut self, factor: f32) {
        self.set_idepth(self.idepth_backup + factor * self.step);
    }

    pub fn host(&self) -> FrameKey {
        self.host
    }

    pub fn u(&self) -> f32 {
        self.u
    }

    pub fn v(&self) -> f32 {
        self.v
    }

    /// Host intensities of the pattern samples.
    pub fn color(&self) -> &[f32] {
        &self.color
    }

    /// Host weights of the pattern samples.
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn energy_th(&self) -> f32 {
        self.energy_th
    }

    pub fn kind(&self) -> f32 {
        self.kind
    }

    pub fn has_depth_prior(&self) -> bool {
        self.has_depth_prior
    }

    pub fn set_depth_prior(&mut self, has_depth_prior: bool) {
        self.has_depth_prior = has_depth_prior;
    }

    pub fn idepth_hessian(&self) -> f32 {
        self.idepth_hessian
    }

    pub fn set_idepth_hessian(&mut self, idepth_hessian: f32) {
        self.idepth_hessian = idepth_hessian;
    }

    pub fn max_rel_baseline(&self) -> f32 {
        self.max_rel_baseline
    }

    pub fn set_max_rel_baseline(&mut self, max_rel_baseline: f32) {
        self.max_rel_baseline = max_rel_baseline;
    }

    pub fn status(&self) -> PointStatus {
        self.status
    }

    /// Sets the status without moving the point between its host's collections, which is
    /// left to [`crate::Window::set_point_status`].
    pub(crate) fn set_status(&mut self, status: PointStatus) {
        self.status = status;
    }

    pub fn num_good_residuals(&self) -> usize {
        self.num_good_residuals
    }

    pub fn set_num_good_residuals(&mut self, num_good_residuals: usize) {
        self.num_good_residuals = num_good_residuals;
    }

    pub fn residuals(&self) -> &[PointResidual] {
        &self.residuals
    }

    /// The latest residual outcomes, newest first.
    pub fn last_residuals(&self) -> &[LastResidual] {
        &self.last_residuals
    }

    /// Attaches a residual towards `target`, making it the newest entry of the outcome record.
    ///
    /// A point has at most one residual per target: if one is already attached, its
    /// classification is replaced. An `In` residual counts towards the historically good
    /// residuals.
    pub fn add_residual(&mut self, target: FrameKey, state: ResidualState) {
        let previous = match self.residuals.iter_mut().find(|r| r.target == target) {
            Some(residual) => Some(std::mem::replace(&mut residual.state, state)),
            None => {
                self.residuals.push(PointResidual { target, state });
                None
            }
        };
        if self.last_residuals.is_full() {
            self.last_residuals.pop();
        }
        self.last_residuals.insert(
            0,
            LastResidual {
                target: Some(target),
                state,
            },
        );
        if state == ResidualState::In && previous != Some(ResidualState::In) {
            self.num_good_residuals += 1;
        }
    }

    /// Updates the classification of the residual towards `target` after an optimization pass.
    ///
    /// Returns `false` if no residual towards `target` is attached.
    pub fn set_residual_state(&mut self, target: FrameKey, state: ResidualState) -> bool {
        let residual = match self.residuals.iter_mut().find(|r| r.target == target) {
            Some(residual) => residual,
            None => return false,
        };
        if state == ResidualState::In && residual.state != ResidualState::In {
            self.num_good_residuals += 1;
        }
        residual.state = state;
        for last in &mut self.last_residuals {
            if last.target == Some(target) {
                last.state = state;
            }
        }
        true
    }

    /// Detaches the residual towards `target`, returning it if it existed.
    pub fn remove_residual(&mut self, target: FrameKey) -> Option<PointResidual> {
        let position = self.residuals.iter().position(|r| r.target == target)?;
        for last in &mut self.last_residuals {
            if last.target == Some(target) {
                last.target = None;
            }
        }
        Some(self.residuals.swap_remove(position))
    }

    /// Decides if the point has left the window and must not be carried into the next one.
    ///
    /// `to_marg` contains the frames about to be marginalized. The point is out of bounds if
    /// marginalizing those frames would leave it with too few good residuals although it has
    /// been well observed, if its newest residual is out of bounds, or if its two newest
    /// residuals were both outliers.
    pub fn is_oob(&self, to_marg: &[FrameKey], settings: &WindowSettings) -> bool {
        let vis_in_to_marg = self
            .residuals
            .iter()
            .filter(|r| r.state == ResidualState::In && to_marg.contains(&r.target))
            .count();
        if self.residuals.len() >= settings.min_good_active_res_for_marg
            && self.num_good_residuals > settings.min_good_res_for_marg + 10
            && self.residuals.len() - vis_in_to_marg < settings.min_good_active_res_for_marg
        {
            return true;
        }

        if self
            .last_residuals
            .first()
            .map_or(false, |last| last.state == ResidualState::Oob)
        {
            return true;
        }
        if self.residuals.len() < 2 {
            return false;
        }
        matches!(
            self.last_residuals.as_slice(),
            [newest, previous]
                if newest.state == ResidualState::Outlier && previous.state == ResidualState::Outlier
        )
    }

    /// Decides if the point has been observed well enough to be kept as an optimized variable.
    pub fn is_inlier_new(&self, settings: &WindowSettings) -> bool {
        self.residuals.len() >= settings.min_good_active_res_for_marg
            && self.num_good_residuals >= settings.min_good_res_for_marg
    }

    pub fn optimizer_link(&self) -> Option<OptimizerLink> {
        self.optimizer_link
    }

    pub fn link_optimizer(&mut self, link: OptimizerLink) {
        self.optimizer_link = Some(link);
    }

    /// Clears the optimizer link, which must happen before the point is removed.
    pub fn unlink_optimizer(&mut self) -> Option<OptimizerLink> {
        self.optimizer_link.take()
    }
}
