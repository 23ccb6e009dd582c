#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// How an affine brightness parameter of a non-initial frame is constrained.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AffineMode {
    /// The parameter is pinned with the initial affine prior.
    Fixed,
    /// The parameter is optimized with the given prior weight (zero for no prior).
    Optimize(f64),
}

/// The settings for a sliding optimization window.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone)]
pub struct WindowSettings {
    /// The number of samples in the intensity pattern of each point
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_pattern_num"))]
    pub pattern_num: usize,
    /// The minimum number of residuals a point must have to be marginalized rather than dropped
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_good_active_res_for_marg")
    )]
    pub min_good_active_res_for_marg: usize,
    /// The minimum number of historically good residuals for a point to be marginalized rather than dropped
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_good_res_for_marg")
    )]
    pub min_good_res_for_marg: usize,
    /// The prior placed on the translation of the first frame
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_initial_trans_prior")
    )]
    pub initial_trans_prior: f64,
    /// The prior placed on the rotation of the first frame
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_initial_rot_prior")
    )]
    pub initial_rot_prior: f64,
    /// The prior placed on affine `a` of the first frame and on every reference `a`
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_initial_aff_a_prior")
    )]
    pub initial_aff_a_prior: f64,
    /// The prior placed on affine `b` of the first frame and on every reference `b`
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_initial_aff_b_prior")
    )]
    pub initial_aff_b_prior: f64,
    /// How affine `a` of later frames is constrained
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_affine_mode_a"))]
    pub affine_mode_a: AffineMode,
    /// How affine `b` of later frames is constrained
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_affine_mode_b"))]
    pub affine_mode_b: AffineMode,
    /// Removes the pose prior of the first frame, leaving the gauge to the solver
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub remove_pose_prior: bool,
    /// The maximum number of keyframes kept in the window
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_frames"))]
    pub max_frames: usize,
    /// The number of keyframes below which no frame is marginalized for losing its points
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_frames"))]
    pub min_frames: usize,
    /// The number of newest keyframes that are never chosen for marginalization
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_frame_age"))]
    pub min_frame_age: usize,
    /// The fraction of a frame's points that must remain in the window for it to be kept
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_points_remaining")
    )]
    pub min_points_remaining: f64,
    /// The largest absolute log brightness ratio to the newest frame for a frame to be kept
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_log_aff_fac_in_window")
    )]
    pub max_log_aff_fac_in_window: f64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            pattern_num: default_pattern_num(),
            min_good_active_res_for_marg: default_min_good_active_res_for_marg(),
            min_good_res_for_marg: default_min_good_res_for_marg(),
            initial_trans_prior: default_initial_trans_prior(),
            initial_rot_prior: default_initial_rot_prior(),
            initial_aff_a_prior: default_initial_aff_a_prior(),
            initial_aff_b_prior: default_initial_aff_b_prior(),
            affine_mode_a: default_affine_mode_a(),
            affine_mode_b: default_affine_mode_b(),
            remove_pose_prior: false,
            max_frames: default_max_frames(),
            min_frames: default_min_frames(),
            min_frame_age: default_min_frame_age(),
            min_points_remaining: default_min_points_remaining(),
            max_log_aff_fac_in_window: default_max_log_aff_fac_in_window(),
        }
    }
}

fn default_pattern_num() -> usize {
    8
}

fn default_min_good_active_res_for_marg() -> usize {
    3
}

fn default_min_good_res_for_marg() -> usize {
    4
}

fn default_initial_trans_prior() -> f64 {
    1e10
}

fn default_initial_rot_prior() -> f64 {
    1e11
}

fn default_initial_aff_a_prior() -> f64 {
    1e14
}

fn default_initial_aff_b_prior() -> f64 {
    1e14
}

fn default_affine_mode_a() -> AffineMode {
    AffineMode::Optimize(1e12)
}

fn default_affine_mode_b() -> AffineMode {
    AffineMode::Optimize(1e8)
}

fn default_max_frames() -> usize {
    7
}

fn default_min_frames() -> usize {
    5
}

fn default_min_frame_age() -> usize {
    1
}

fn default_min_points_remaining() -> f64 {
    0.05
}

fn default_max_log_aff_fac_in_window() -> f64 {
    0.7
}
