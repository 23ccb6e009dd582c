use criterion::{criterion_group, criterion_main, Criterion};
use cv_direct::cv_core::nalgebra::{IsometryMatrix3, Vector3};
use cv_direct::cv_core::WorldToCamera;
use cv_direct::{AffineLight, CalibrationState, FrameImages, Window, WindowSettings};

fn full_window() -> Window {
    let mut window = Window::new(
        CalibrationState::new(640, 480, 500.0, 500.0, 320.0, 240.0),
        WindowSettings::default(),
    );
    for i in 0..window.settings().max_frames {
        let x = i as f64 * 0.1;
        window.insert_frame(
            WorldToCamera(IsometryMatrix3::new(
                Vector3::new(-x, 0.0, 0.02 * x),
                Vector3::new(0.0, 0.01 * x, 0.0),
            )),
            AffineLight::new(0.01 * x, x),
            1.0,
            FrameImages::default(),
        );
    }
    window
}

fn precalc(c: &mut Criterion) {
    let mut window = full_window();
    c.bench_function("set_precalc_values", |b| {
        b.iter(|| window.set_precalc_values())
    });
}

fn marginalization(c: &mut Criterion) {
    c.bench_function("flag_frames_for_marginalization", |b| {
        b.iter_batched(
            full_window,
            |mut window| window.flag_frames_for_marginalization(),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = precalc, marginalization
);
criterion_main!(benches);
