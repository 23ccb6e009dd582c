use cv_direct::cv_core::nalgebra::IsometryMatrix3;
use cv_direct::cv_core::{Pose, WorldToCamera};
use cv_direct::{
    AffineLight, CalibrationState, FrameImages, FrameKey, ImmaturePoint, OptimizerLink,
    PointKey, PointStatus, RemovalSummary, ResidualState, Window, WindowError, WindowSettings,
};

fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

fn window() -> Window {
    init_logging();
    Window::new(
        CalibrationState::new(640, 480, 500.0, 500.0, 320.0, 240.0),
        WindowSettings::default(),
    )
}

fn insert_frame(window: &mut Window) -> FrameKey {
    window.insert_frame(
        WorldToCamera::identity(),
        AffineLight::default(),
        1.0,
        FrameImages::default(),
    )
}

fn camera_at(window: &mut Window, x: f64) -> FrameKey {
    window.insert_frame(
        WorldToCamera(IsometryMatrix3::translation(-x, 0.0, 0.0)),
        AffineLight::default(),
        1.0,
        FrameImages::default(),
    )
}

fn candidate(host: FrameKey) -> ImmaturePoint {
    ImmaturePoint::new(host, 320.0, 240.0, &[50.0; 8], &[1.0; 8], 100.0)
        .unwrap()
        .with_idepth_range(0.5, 1.5)
}

fn promote(window: &mut Window, host: FrameKey) -> PointKey {
    window.promote_point(&candidate(host)).unwrap()
}

#[test]
fn inserting_frames_assigns_ids_and_positions() {
    let mut window = window();
    let keys: Vec<FrameKey> = (0..3).map(|_| insert_frame(&mut window)).collect();
    assert_eq!(window.frame_keys(), keys.as_slice());
    for (i, &key) in keys.iter().enumerate() {
        assert_eq!(window.frame(key).frame_id(), i);
        assert_eq!(window.frame(key).idx(), i);
        assert_eq!(
            window.frame(key).frame_energy_th(),
            (8 * 8 * window.settings().pattern_num) as f32
        );
    }
    assert_eq!(window.registry().frames_created(), 3);
    assert_eq!(window.registry().live_frames(), 3);
    assert_ne!(window.frame_prior(keys[0]), window.frame_prior(keys[1]));
    assert!(window.sanity_check());
}

#[test]
fn promoted_points_are_owned_by_their_host() {
    let mut window = window();
    let host = insert_frame(&mut window);
    let point = promote(&mut window, host);
    assert_eq!(window.frame(host).active_points(), &[point]);
    assert_eq!(window.point(point).status(), PointStatus::Active);

    window.add_immature_point(candidate(host)).unwrap();
    assert_eq!(window.frame(host).immature_points().len(), 1);
    let activated = window.activate_immature_point(host, 0);
    assert!(window.frame(host).immature_points().is_empty());
    assert_eq!(window.frame(host).active_points(), &[point, activated]);
    assert_eq!(window.registry().points_created(), 2);
    assert_eq!(window.num_points(), 2);
    assert!(window.sanity_check());
}

#[test]
fn promotion_needs_a_live_host() {
    let mut window = window();
    let host = insert_frame(&mut window);
    window.remove_frame(host);
    assert_eq!(
        window.promote_point(&candidate(host)),
        Err(WindowError::UnknownFrame(host))
    );
    assert_eq!(
        window.add_immature_point(candidate(host)),
        Err(WindowError::UnknownFrame(host))
    );
}

#[test]
fn status_changes_move_points_between_collections() {
    let mut window = window();
    let host = insert_frame(&mut window);
    let point = promote(&mut window, host);

    window.set_point_status(point, PointStatus::Inactive);
    assert!(window.frame(host).active_points().is_empty());
    assert_eq!(window.frame(host).potential_points(), &[point]);

    window.set_point_status(point, PointStatus::OutOfBounds);
    assert!(window.frame(host).potential_points().is_empty());
    assert_eq!(window.frame(host).outlier_points(), &[point]);

    window.set_point_status(point, PointStatus::Marginalized);
    assert!(window.frame(host).outlier_points().is_empty());
    assert_eq!(window.frame(host).marginalized_points(), &[point]);
    assert_eq!(window.point(point).status(), PointStatus::Marginalized);
    assert!(window.sanity_check());
}

#[test]
fn removed_point_leaves_no_stale_key() {
    let mut window = window();
    let host = insert_frame(&mut window);
    let point = promote(&mut window, host);
    let kept = promote(&mut window, host);
    window.set_point_status(point, PointStatus::Outlier);
    window.remove_point(point);

    let frame = window.frame(host);
    assert!(frame.owned_points().all(|p| p != point));
    assert_eq!(frame.active_points(), &[kept]);
    assert!(frame.outlier_points().is_empty());
    assert_eq!(window.check_frame_removal(host), Ok(()));
    assert!(window.sanity_check());

    window.remove_frame(host);
    let registry = window.registry();
    assert_eq!(registry.points_created(), 2);
    assert_eq!(registry.points_released(), 2);
    assert_eq!(registry.live_points(), 0);
}

#[test]
fn candidate_pattern_must_match_window() {
    let mut window = window();
    let host = insert_frame(&mut window);
    let short = ImmaturePoint::new(host, 320.0, 240.0, &[50.0; 5], &[1.0; 5], 100.0)
        .unwrap()
        .with_idepth_range(0.5, 1.5);
    let error = WindowError::PatternLength {
        expected: window.settings().pattern_num,
        actual: 5,
    };
    assert_eq!(window.promote_point(&short), Err(error.clone()));
    assert_eq!(window.add_immature_point(short), Err(error));
    assert_eq!(window.num_points(), 0);
    assert!(window.frame(host).immature_points().is_empty());
}

#[test]
fn linked_point_cannot_be_removed() {
    let mut window = window();
    let host = insert_frame(&mut window);
    let point = promote(&mut window, host);
    window.point_mut(point).link_optimizer(OptimizerLink(4));
    assert_eq!(
        window.check_point_removal(point),
        Err(WindowError::PointLinked {
            point,
            link: OptimizerLink(4)
        })
    );
    assert_eq!(
        window.check_frame_removal(host),
        Err(WindowError::OwnedPointLinked {
            frame: host,
            point,
            link: OptimizerLink(4)
        })
    );

    window.point_mut(point).unlink_optimizer();
    window.remove_point(point);
    assert!(window.frame(host).active_points().is_empty());
    assert!(!window.contains_point(point));
    assert_eq!(window.registry().live_points(), 0);
    assert_eq!(
        window.check_point_removal(point),
        Err(WindowError::UnknownPoint(point))
    );
}

#[test]
#[should_panic]
fn removing_linked_point_panics() {
    let mut window = window();
    let host = insert_frame(&mut window);
    let point = promote(&mut window, host);
    window.point_mut(point).link_optimizer(OptimizerLink::from(1));
    window.remove_point(point);
}

#[test]
#[should_panic]
fn removing_linked_frame_panics() {
    let mut window = window();
    let frame = insert_frame(&mut window);
    window.frame_mut(frame).link_optimizer(OptimizerLink(0));
    window.remove_frame(frame);
}

#[test]
#[should_panic]
fn removing_frame_owning_linked_point_panics() {
    let mut window = window();
    let frame = insert_frame(&mut window);
    let point = promote(&mut window, frame);
    window.point_mut(point).link_optimizer(OptimizerLink(2));
    window.remove_frame(frame);
}

#[test]
fn removing_a_frame_releases_and_detaches() {
    let mut window = window();
    let keys: Vec<FrameKey> = (0..3).map(|_| insert_frame(&mut window)).collect();
    let owned = promote(&mut window, keys[1]);
    let observer = promote(&mut window, keys[0]);
    window
        .point_mut(observer)
        .add_residual(keys[1], ResidualState::In);
    window
        .point_mut(observer)
        .add_residual(keys[2], ResidualState::In);
    window.set_precalc_values();

    window.frame_mut(keys[1]).link_optimizer(OptimizerLink(7));
    assert_eq!(
        window.check_frame_removal(keys[1]),
        Err(WindowError::FrameLinked {
            frame: keys[1],
            link: OptimizerLink(7)
        })
    );
    assert_eq!(window.frame_mut(keys[1]).unlink_optimizer(), Some(OptimizerLink(7)));

    let removed = window.remove_frame(keys[1]);
    assert_eq!(removed.frame_id(), 1);
    assert!(!window.contains_frame(keys[1]));
    assert!(!window.contains_point(owned));
    assert_eq!(window.frame_keys(), &[keys[0], keys[2]]);
    assert_eq!(window.frame(keys[2]).idx(), 1);
    assert_eq!(window.point(observer).residuals().len(), 1);
    assert_eq!(window.point(observer).residuals()[0].target, keys[2]);
    assert!(window.pair_precalc(keys[0], keys[1]).is_none());
    assert!(window.pair_precalc(keys[0], keys[2]).is_some());

    let registry = window.registry();
    assert_eq!(registry.frames_released(), 1);
    assert_eq!(registry.live_frames(), 2);
    assert_eq!(registry.points_released(), 1);
    assert_eq!(registry.live_points(), 1);
    assert!(window.sanity_check());
}

#[test]
fn flagging_points_for_removal() {
    let mut window = window();
    let keys: Vec<FrameKey> = (0..5).map(|_| insert_frame(&mut window)).collect();
    let host = keys[0];

    let negative = promote(&mut window, host);
    window.point_mut(negative).set_idepth(-0.1);
    window
        .point_mut(negative)
        .add_residual(keys[1], ResidualState::In);

    let unobserved = promote(&mut window, host);

    let well_observed_oob = promote(&mut window, host);
    for &target in &keys[1..4] {
        window
            .point_mut(well_observed_oob)
            .add_residual(target, ResidualState::In);
    }
    window
        .point_mut(well_observed_oob)
        .add_residual(keys[4], ResidualState::Oob);
    window.point_mut(well_observed_oob).set_num_good_residuals(4);

    let barely_observed_oob = promote(&mut window, host);
    window
        .point_mut(barely_observed_oob)
        .add_residual(keys[1], ResidualState::Oob);

    let healthy = promote(&mut window, host);
    for &target in &keys[1..4] {
        window
            .point_mut(healthy)
            .add_residual(target, ResidualState::In);
    }

    let summary = window.flag_points_for_removal();
    assert_eq!(
        summary,
        RemovalSummary {
            marginalized: 1,
            out_of_bounds: 1,
            outliers: 2,
        }
    );
    assert_eq!(window.point(negative).status(), PointStatus::Outlier);
    assert_eq!(window.point(unobserved).status(), PointStatus::Outlier);
    assert_eq!(
        window.point(well_observed_oob).status(),
        PointStatus::Marginalized
    );
    assert_eq!(
        window.point(barely_observed_oob).status(),
        PointStatus::OutOfBounds
    );
    assert_eq!(window.point(healthy).status(), PointStatus::Active);
    assert_eq!(window.frame(host).active_points(), &[healthy]);
    assert_eq!(window.frame(host).marginalized_points(), &[well_observed_oob]);
    assert_eq!(window.frame(host).outlier_points().len(), 3);
    assert!(window.sanity_check());
}

#[test]
fn points_of_a_leaving_host_are_marginalized_or_dropped() {
    let mut window = window();
    let keys: Vec<FrameKey> = (0..4).map(|_| insert_frame(&mut window)).collect();
    let inlier = promote(&mut window, keys[0]);
    let weak = promote(&mut window, keys[0]);
    for &target in &keys[1..4] {
        window
            .point_mut(inlier)
            .add_residual(target, ResidualState::In);
    }
    window.point_mut(inlier).set_num_good_residuals(4);
    window
        .point_mut(weak)
        .add_residual(keys[1], ResidualState::In);

    window.frame_mut(keys[0]).flag_for_marginalization();
    assert_eq!(window.frames_to_marginalize(), vec![keys[0]]);
    window.flag_points_for_removal();
    assert_eq!(window.point(inlier).status(), PointStatus::Marginalized);
    assert_eq!(window.point(weak).status(), PointStatus::OutOfBounds);
}

#[test]
fn brightness_drift_flags_frame() {
    let mut window = window();
    let mut keys = vec![];
    for i in 0..6 {
        let a = if i == 2 { 1.0 } else { 0.0 };
        keys.push(window.insert_frame(
            WorldToCamera::identity(),
            AffineLight::new(a, 0.0),
            1.0,
            FrameImages::default(),
        ));
    }
    assert_eq!(window.flag_frames_for_marginalization(), vec![keys[2]]);
    assert!(window.frame(keys[2]).is_flagged_for_marginalization());
}

#[test]
fn small_window_is_left_alone() {
    let mut window = window();
    for i in 0..5 {
        camera_at(&mut window, i as f64);
    }
    assert!(window.flag_frames_for_marginalization().is_empty());
    assert!(Window::new(
        CalibrationState::new(64, 48, 50.0, 50.0, 32.0, 24.0),
        WindowSettings::default()
    )
    .flag_frames_for_marginalization()
    .is_empty());
}

#[test]
fn full_window_drops_redundant_frame() {
    let mut window = window();
    let keys: Vec<FrameKey> = [0.0, 1.0, 2.0, 2.05, 4.0, 5.0, 6.0]
        .iter()
        .map(|&x| camera_at(&mut window, x))
        .collect();
    assert_eq!(window.flag_frames_for_marginalization(), vec![keys[2]]);
    assert_eq!(window.frame(keys[0]).target_precalc().len(), 7);
}

#[cfg(feature = "serde-serialize")]
#[test]
fn settings_fill_missing_fields_with_defaults() {
    let settings: WindowSettings = serde_json::from_str(r#"{ "max_frames": 9 }"#).unwrap();
    let defaults = WindowSettings::default();
    assert_eq!(settings.max_frames, 9);
    assert_eq!(settings.min_frames, defaults.min_frames);
    assert_eq!(settings.pattern_num, defaults.pattern_num);
    assert_eq!(settings.affine_mode_a, defaults.affine_mode_a);
    assert_eq!(settings.initial_rot_prior, defaults.initial_rot_prior);
    assert!(!settings.remove_pose_prior);
}
