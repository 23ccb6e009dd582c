use crate::{
    AffineLight, CalibrationState, FrameImages, FrameState, ImmaturePoint, PairPrecalc,
    PointState, PointStatus, StateVector, WindowError, WindowSettings,
};
use cv_core::WorldToCamera;
use derive_more::{From, Into};
use log::*;
use slotmap::{new_key_type, DenseSlotMap};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

new_key_type! {
    pub struct FrameKey;
    pub struct PointKey;
}

/// A handle to the node that the external optimizer keeps for a frame or point.
///
/// While a frame or point holds a link it may not be removed from the window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct OptimizerLink(pub usize);

/// Counts of the frames and points allocated by a window over its lifetime.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AllocationRegistry {
    frames_created: usize,
    frames_released: usize,
    points_created: usize,
    points_released: usize,
}

impl AllocationRegistry {
    pub fn frames_created(&self) -> usize {
        self.frames_created
    }

    pub fn frames_released(&self) -> usize {
        self.frames_released
    }

    pub fn live_frames(&self) -> usize {
        self.frames_created - self.frames_released
    }

    pub fn points_created(&self) -> usize {
        self.points_created
    }

    pub fn points_released(&self) -> usize {
        self.points_released
    }

    pub fn live_points(&self) -> usize {
        self.points_created - self.points_released
    }
}

/// What [`Window::flag_points_for_removal`] did to the active points.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RemovalSummary {
    /// Points moved into the marginalization prior.
    pub marginalized: usize,
    /// Out of bounds points without enough good residuals to be marginalized.
    pub out_of_bounds: usize,
    /// Points with a negative inverse depth or no residuals left.
    pub outliers: usize,
}

/// The keyframes, points and calibration of a sliding optimization window.
///
/// Frames and points live in arenas and refer to each other through keys. A frame owns the
/// points it hosts: removing the frame releases them. Frames and points linked to an
/// optimizer node cannot be removed.
pub struct Window {
    settings: WindowSettings,
    calibration: CalibrationState,
    frames: DenseSlotMap<FrameKey, FrameState>,
    points: DenseSlotMap<PointKey, PointState>,
    /// The frames of the window from oldest to newest.
    order: Vec<FrameKey>,
    registry: AllocationRegistry,
    next_frame_id: usize,
}

impl Window {
    pub fn new(calibration: CalibrationState, settings: WindowSettings) -> Self {
        Self {
            settings,
            calibration,
            frames: Default::default(),
            points: Default::default(),
            order: vec![],
            registry: Default::default(),
            next_frame_id: 0,
        }
    }

    pub fn settings(&self) -> &WindowSettings {
        &self.settings
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationState {
        &mut self.calibration
    }

    pub fn registry(&self) -> AllocationRegistry {
        self.registry
    }

    /// Adds a new keyframe as the newest frame of the window, anchored at its tracked pose and
    /// brightness.
    pub fn insert_frame(
        &mut self,
        world_to_cam: WorldToCamera,
        aff_g2l: AffineLight,
        exposure: f64,
        images: FrameImages,
    ) -> FrameKey {
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;

        let mut frame = FrameState::new(frame_id, exposure, images, self.settings.pattern_num);
        frame.set_evaluation_point_scaled(world_to_cam, aff_g2l);
        frame.set_idx(self.order.len());

        let key = self.frames.insert(frame);
        self.order.push(key);
        self.registry.frames_created += 1;
        info!(
            "inserted keyframe {} as frame {} of the window",
            frame_id,
            self.order.len()
        );
        key
    }

    pub fn contains_frame(&self, frame: FrameKey) -> bool {
        self.frames.contains_key(frame)
    }

    pub fn frame(&self, frame: FrameKey) -> &FrameState {
        &self.frames[frame]
    }

    pub fn frame_mut(&mut self, frame: FrameKey) -> &mut FrameState {
        &mut self.frames[frame]
    }

    /// The frames of the window from oldest to newest.
    pub fn frame_keys(&self) -> &[FrameKey] {
        &self.order
    }

    pub fn frames(&self) -> impl Iterator<Item = (FrameKey, &FrameState)> + '_ {
        self.order.iter().map(move |&key| (key, &self.frames[key]))
    }

    pub fn num_frames(&self) -> usize {
        self.order.len()
    }

    /// The prior precision of a frame's raw state under the window settings.
    pub fn frame_prior(&self, frame: FrameKey) -> StateVector {
        self.frames[frame].prior(&self.settings)
    }

    pub fn contains_point(&self, point: PointKey) -> bool {
        self.points.contains_key(point)
    }

    pub fn point(&self, point: PointKey) -> &PointState {
        &self.points[point]
    }

    pub fn point_mut(&mut self, point: PointKey) -> &mut PointState {
        &mut self.points[point]
    }

    pub fn points(&self) -> impl Iterator<Item = (PointKey, &PointState)> + '_ {
        self.points.iter()
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Hands a candidate point to its host frame.
    pub fn add_immature_point(&mut self, candidate: ImmaturePoint) -> Result<(), WindowError> {
        self.check_pattern(&candidate)?;
        let host = self
            .frames
            .get_mut(candidate.host)
            .ok_or(WindowError::UnknownFrame(candidate.host))?;
        host.immature_points.push(candidate);
        Ok(())
    }

    /// Removes the candidate at `index` from `frame` and promotes it to an active point.
    pub fn activate_immature_point(&mut self, frame: FrameKey, index: usize) -> PointKey {
        let candidate = self.frames[frame].immature_points.swap_remove(index);
        self.insert_point(&candidate)
    }

    /// Promotes a candidate to an active point owned by its host frame.
    pub fn promote_point(&mut self, candidate: &ImmaturePoint) -> Result<PointKey, WindowError> {
        if !self.frames.contains_key(candidate.host) {
            return Err(WindowError::UnknownFrame(candidate.host));
        }
        self.check_pattern(candidate)?;
        Ok(self.insert_point(candidate))
    }

    fn check_pattern(&self, candidate: &ImmaturePoint) -> Result<(), WindowError> {
        if candidate.color.len() != self.settings.pattern_num {
            return Err(WindowError::PatternLength {
                expected: self.settings.pattern_num,
                actual: candidate.color.len(),
            });
        }
        Ok(())
    }

    fn insert_point(&mut self, candidate: &ImmaturePoint) -> PointKey {
        let point = PointState::from_immature(candidate, &self.calibration);
        let key = self.points.insert(point);
        self.frames[candidate.host].active_points.push(key);
        self.registry.points_created += 1;
        trace!(
            "promoted point at ({}, {}) of frame {:?}",
            candidate.u,
            candidate.v,
            candidate.host
        );
        key
    }

    /// Changes the status of a point and moves it into the matching collection of its host.
    pub fn set_point_status(&mut self, point: PointKey, status: PointStatus) {
        let previous = self.points[point].status();
        if previous == status {
            return;
        }
        let host = self.points[point].host();
        let host = &mut self.frames[host];
        status_collection(host, previous).retain(|&p| p != point);
        status_collection(host, status).push(point);
        self.points[point].set_status(status);
    }

    /// Recomputes the pair precalculations of every frame as host towards every frame in the
    /// window, itself included.
    pub fn set_precalc_values(&mut self) {
        for &host in &self.order {
            let precalc = self
                .order
                .iter()
                .map(|&target| {
                    PairPrecalc::new(
                        host,
                        &self.frames[host],
                        target,
                        &self.frames[target],
                        &self.calibration,
                    )
                })
                .collect();
            self.frames[host].target_precalc = precalc;
        }
    }

    /// Retrieves the precalculation of a (host, target) pair computed by the last
    /// [`Window::set_precalc_values`].
    pub fn pair_precalc(&self, host: FrameKey, target: FrameKey) -> Option<&PairPrecalc> {
        self.frames
            .get(host)?
            .target_precalc
            .iter()
            .find(|p| p.target == target)
    }

    /// The frames currently flagged for marginalization, from oldest to newest.
    pub fn frames_to_marginalize(&self) -> Vec<FrameKey> {
        self.order
            .iter()
            .copied()
            .filter(|&key| self.frames[key].is_flagged_for_marginalization())
            .collect()
    }

    /// Flags the frames which should leave the window.
    ///
    /// Frames which lost most of their points or whose brightness drifted too far from the
    /// newest frame are flagged while enough frames remain. If the window is still full after
    /// that, the frame which is closest to the others and furthest from the newest frame is
    /// flagged as well.
    pub fn flag_frames_for_marginalization(&mut self) -> Vec<FrameKey> {
        let latest = match self.order.last() {
            Some(&latest) => latest,
            None => return vec![],
        };
        self.set_precalc_values();

        let mut flagged = 0;
        for &key in &self.order {
            let frame = &self.frames[key];
            let inside = frame.active_points.len() + frame.immature_points.len();
            let outside = frame.marginalized_points.len() + frame.outlier_points.len();
            let ref_to_frame = AffineLight::from_to_exposure(
                self.frames[latest].exposure(),
                frame.exposure(),
                self.frames[latest].aff_g2l(),
                frame.aff_g2l(),
            );
            let lost_points =
                (inside as f64) < self.settings.min_points_remaining * (inside + outside) as f64;
            let drifted = ref_to_frame[0].ln().abs() > self.settings.max_log_aff_fac_in_window;
            if (lost_points || drifted) && self.order.len() - flagged > self.settings.min_frames {
                self.frames[key].flag_for_marginalization();
                flagged += 1;
            }
        }

        if self.order.len() - flagged >= self.settings.max_frames {
            let latest_id = self.frames[latest].frame_id();
            let min_frame_age = self.settings.min_frame_age;
            let mut smallest_score = 1.0;
            let mut to_marginalize = None;
            for &key in &self.order {
                let frame = &self.frames[key];
                if frame.frame_id() + min_frame_age > latest_id || frame.frame_id() == 0 {
                    continue;
                }
                let mut dist_score = 0.0;
                for precalc in frame.target_precalc() {
                    let target_id = self.frames[precalc.target].frame_id();
                    if target_id + min_frame_age > latest_id + 1 || precalc.target == precalc.host
                    {
                        continue;
                    }
                    dist_score += 1.0 / (1e-5 + precalc.distance as f64);
                }
                let newest_distance = frame
                    .target_precalc()
                    .last()
                    .map_or(0.0, |precalc| precalc.distance as f64);
                dist_score *= -newest_distance.sqrt();
                if dist_score < smallest_score {
                    smallest_score = dist_score;
                    to_marginalize = Some(key);
                }
            }
            if let Some(key) = to_marginalize {
                self.frames[key].flag_for_marginalization();
            }
        }

        let frames = self.frames_to_marginalize();
        debug!("{} frames flagged for marginalization", frames.len());
        frames
    }

    /// Decides the fate of every active point before the flagged frames are marginalized.
    ///
    /// Points with a negative inverse depth or without residuals become outliers. Points which
    /// are out of bounds, or whose host is leaving the window, are marginalized if they were
    /// observed well enough and are otherwise marked out of bounds.
    pub fn flag_points_for_removal(&mut self) -> RemovalSummary {
        let to_marg = self.frames_to_marginalize();
        let mut summary = RemovalSummary::default();
        let mut transitions = vec![];
        for &key in &self.order {
            let host_leaving = self.frames[key].is_flagged_for_marginalization();
            for &point in self.frames[key].active_points() {
                let state = &self.points[point];
                if state.idepth_scaled() < 0.0 || state.residuals().is_empty() {
                    summary.outliers += 1;
                    transitions.push((point, PointStatus::Outlier));
                } else if host_leaving || state.is_oob(&to_marg, &self.settings) {
                    if state.is_inlier_new(&self.settings) {
                        summary.marginalized += 1;
                        transitions.push((point, PointStatus::Marginalized));
                    } else {
                        summary.out_of_bounds += 1;
                        transitions.push((point, PointStatus::OutOfBounds));
                    }
                }
            }
        }
        for (point, status) in transitions {
            self.set_point_status(point, status);
        }
        debug!(
            "flagged points for removal: {} marginalized, {} out of bounds, {} outliers",
            summary.marginalized, summary.out_of_bounds, summary.outliers
        );
        summary
    }

    /// Checks that a point may be removed from the window.
    pub fn check_point_removal(&self, point: PointKey) -> Result<(), WindowError> {
        let state = self
            .points
            .get(point)
            .ok_or(WindowError::UnknownPoint(point))?;
        match state.optimizer_link() {
            Some(link) => Err(WindowError::PointLinked { point, link }),
            None => Ok(()),
        }
    }

    /// Removes a point from the window and its host.
    ///
    /// Panics if the point is still linked to an optimizer node.
    pub fn remove_point(&mut self, point: PointKey) -> PointState {
        if let Err(e) = self.check_point_removal(point) {
            panic!("cannot remove point: {}", e);
        }
        let state = self.points.remove(point).expect("point was checked to exist");
        if let Some(host) = self.frames.get_mut(state.host()) {
            host.forget_point(point);
        }
        self.registry.points_released += 1;
        state
    }

    /// Checks that a frame may be removed from the window, along with every point it owns.
    pub fn check_frame_removal(&self, frame: FrameKey) -> Result<(), WindowError> {
        let state = self
            .frames
            .get(frame)
            .ok_or(WindowError::UnknownFrame(frame))?;
        if let Some(link) = state.optimizer_link() {
            return Err(WindowError::FrameLinked { frame, link });
        }
        for point in state.owned_points() {
            if let Some(link) = self.points.get(point).and_then(PointState::optimizer_link) {
                return Err(WindowError::OwnedPointLinked { frame, point, link });
            }
        }
        Ok(())
    }

    /// Removes a frame from the window, releasing every point it owns and detaching every
    /// residual and precalculation which targets it.
    ///
    /// Panics if the frame or one of its points is still linked to an optimizer node.
    pub fn remove_frame(&mut self, frame: FrameKey) -> FrameState {
        if let Err(e) = self.check_frame_removal(frame) {
            panic!("cannot remove frame: {}", e);
        }
        let state = self.frames.remove(frame).expect("frame was checked to exist");
        let mut released = 0;
        for point in state.owned_points() {
            if self.points.remove(point).is_some() {
                released += 1;
            }
        }
        self.registry.points_released += released;
        self.registry.frames_released += 1;

        self.order.retain(|&key| key != frame);
        for (idx, &key) in self.order.iter().enumerate() {
            self.frames[key].set_idx(idx);
        }
        for (_, other) in self.frames.iter_mut() {
            other.target_precalc.retain(|precalc| precalc.target != frame);
        }
        for (_, point) in self.points.iter_mut() {
            point.remove_residual(frame);
        }
        info!(
            "removed keyframe {} and released {} points",
            state.frame_id(),
            released
        );
        state
    }

    /// Checks that every key stored in the window refers to a live frame or point, and that
    /// every point is stored in the collection of its host matching its status.
    /// Returns `true` if no inconsistency was found.
    pub fn sanity_check(&self) -> bool {
        info!("SANITY CHECK: checking window consistency");
        let mut sane = true;
        if self.order.len() != self.frames.len() {
            error!(
                "SANITY CHECK FAILURE: window order has {} frames but {} exist",
                self.order.len(),
                self.frames.len()
            );
            sane = false;
        }
        for (idx, &key) in self.order.iter().enumerate() {
            match self.frames.get(key) {
                Some(frame) if frame.idx() != idx => {
                    error!(
                        "SANITY CHECK FAILURE: frame {:?} at position {} has idx {}",
                        key,
                        idx,
                        frame.idx()
                    );
                    sane = false;
                }
                None => {
                    error!("SANITY CHECK FAILURE: frame {:?} in window order does not exist", key);
                    sane = false;
                }
                _ => {}
            }
        }
        for (key, point) in self.points.iter() {
            match self.frames.get(point.host()) {
                Some(host) => {
                    let stored = match point.status() {
                        PointStatus::Active => host.active_points(),
                        PointStatus::Inactive => host.potential_points(),
                        PointStatus::Marginalized => host.marginalized_points(),
                        PointStatus::Outlier | PointStatus::OutOfBounds => host.outlier_points(),
                    };
                    if !stored.contains(&key) {
                        error!(
                            "SANITY CHECK FAILURE: point {:?} with status {:?} is missing from its host {:?}",
                            key,
                            point.status(),
                            point.host()
                        );
                        sane = false;
                    }
                }
                None => {
                    error!(
                        "SANITY CHECK FAILURE: host {:?} of point {:?} does not exist",
                        point.host(),
                        key
                    );
                    sane = false;
                }
            }
            for residual in point.residuals() {
                if !self.frames.contains_key(residual.target) {
                    error!(
                        "SANITY CHECK FAILURE: point {:?} has a residual towards missing frame {:?}",
                        key, residual.target
                    );
                    sane = false;
                }
            }
        }
        for (key, frame) in self.frames.iter() {
            for point in frame.owned_points() {
                if !self.points.contains_key(point) {
                    error!(
                        "SANITY CHECK FAILURE: frame {:?} owns missing point {:?}",
                        key, point
                    );
                    sane = false;
                }
            }
        }
        info!("SANITY CHECK ENDED");
        sane
    }
}

/// The collection of `frame` which holds points with `status`.
fn status_collection(frame: &mut FrameState, status: PointStatus) -> &mut Vec<PointKey> {
    match status {
        PointStatus::Active => &mut frame.active_points,
        PointStatus::Inactive => &mut frame.potential_points,
        PointStatus::Marginalized => &mut frame.marginalized_points,
        PointStatus::Outlier | PointStatus::OutOfBounds => &mut frame.outlier_points,
    }
}
