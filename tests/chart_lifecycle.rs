use live_chart_wasm::application::{
    ChartBinding, ChartLifecycleController, MountPhase, MountSettings,
};
use live_chart_wasm::config::ChartConfig;
use live_chart_wasm::domain::chart::{SeriesSnapshot, SeriesUpdate, TailUpdate};
use live_chart_wasm::domain::errors::AppError;
use live_chart_wasm::domain::market_data::{DerivedSeriesEngine, compute_moving_average};
use live_chart_wasm::testing::{
    ChartOp, FakeContainer, ManualScheduler, RecordingChartBackend, minute_candle,
};
use std::rc::Rc;

struct Rig {
    controller: ChartLifecycleController,
    backend: RecordingChartBackend,
    scheduler: ManualScheduler,
}

fn rig() -> Rig {
    let backend = RecordingChartBackend::new();
    let scheduler = ManualScheduler::new();
    let controller = ChartLifecycleController::new(
        Rc::new(backend.clone()),
        Rc::new(scheduler.clone()),
        MountSettings::from(&ChartConfig::default()),
    );
    Rig { controller, backend, scheduler }
}

fn snapshot(count: u64) -> SeriesSnapshot {
    let chart = ChartConfig::default();
    let candles: Vec<_> = (0..count).map(|i| minute_candle(1_699_999_980, i, 100.0 + i as f64)).collect();
    let mut engine = DerivedSeriesEngine::new(&chart.moving_average_windows, chart.volume_palette());
    engine.compute_historical(&candles);
    SeriesSnapshot {
        volumes: engine.volume_bars(&candles),
        derived: engine.series().to_vec(),
        candles,
    }
}

#[test]
fn mounts_immediately_when_the_container_has_a_width() {
    let rig = rig();
    let container = FakeContainer::new(800, 300);
    rig.controller.mount(Rc::new(container.clone()));

    assert_eq!(rig.controller.phase(), MountPhase::Mounted);
    assert_eq!(rig.backend.ops(), vec![ChartOp::Created { width: 800, height: 300 }]);
    assert_eq!(rig.controller.width(), 800);
    assert_eq!(container.listener_count(), 1);
}

#[test]
fn zero_height_falls_back_to_the_configured_height() {
    let rig = rig();
    rig.controller.mount(Rc::new(FakeContainer::new(640, 0)));
    assert_eq!(rig.backend.ops(), vec![ChartOp::Created { width: 640, height: 400 }]);
}

#[test]
fn waits_for_layout_then_mounts() {
    let rig = rig();
    let container = FakeContainer::new(0, 300);
    rig.controller.mount(Rc::new(container.clone()));

    assert_eq!(rig.controller.phase(), MountPhase::WaitingForLayout { attempt: 1 });
    assert_eq!(rig.backend.created(), 0);

    rig.scheduler.advance(50);
    assert_eq!(rig.controller.phase(), MountPhase::WaitingForLayout { attempt: 2 });

    container.set_width(720);
    rig.scheduler.advance(50);
    assert!(rig.controller.is_mounted());
    assert_eq!(rig.backend.ops(), vec![ChartOp::Created { width: 720, height: 300 }]);
    assert_eq!(rig.scheduler.active_count(), 0);
}

#[test]
fn gives_up_after_the_last_layout_check() {
    let rig = rig();
    let container = FakeContainer::new(0, 300);
    rig.controller.mount(Rc::new(container.clone()));

    rig.scheduler.advance(8 * 50);
    assert_eq!(rig.controller.phase(), MountPhase::WaitingForLayout { attempt: 9 });

    rig.scheduler.advance(50);
    assert_eq!(rig.controller.phase(), MountPhase::GaveUp);
    assert!(matches!(rig.controller.last_error(), Some(AppError::ChartError(_))));
    assert_eq!(rig.controller.active_handles(), 0);
    assert_eq!(rig.scheduler.active_count(), 0);

    container.set_width(500);
    rig.scheduler.advance(1_000);
    assert_eq!(rig.backend.created(), 0);
}

#[test]
fn resize_applies_width_without_recreating() {
    let rig = rig();
    let container = FakeContainer::new(800, 300);
    rig.controller.mount(Rc::new(container.clone()));
    rig.backend.clear_ops();

    container.set_width(1024);
    container.set_width(1024);
    container.set_width(0);

    assert_eq!(rig.backend.ops(), vec![ChartOp::Width(1024)]);
    assert_eq!(rig.backend.created(), 0);
    assert_eq!(rig.controller.width(), 1024);
    assert_eq!(rig.backend.live_instances(), 1);
}

#[test]
fn library_failure_is_reported_and_nothing_leaks() {
    let rig = rig();
    rig.backend.fail_create(true);
    let container = FakeContainer::new(800, 300);
    rig.controller.mount(Rc::new(container.clone()));

    assert_eq!(rig.controller.phase(), MountPhase::GaveUp);
    assert_eq!(
        rig.controller.last_error(),
        Some(AppError::ChartError("library failed to initialize".into()))
    );
    assert_eq!(rig.backend.live_instances(), 0);
    assert_eq!(container.listener_count(), 0);
    assert_eq!(rig.controller.active_handles(), 0);
}

#[test]
fn unmount_releases_everything_and_is_idempotent() {
    let rig = rig();
    let container = FakeContainer::new(800, 300);
    rig.controller.mount(Rc::new(container.clone()));
    assert_eq!(rig.controller.active_handles(), 2);

    rig.controller.unmount();
    rig.controller.unmount();

    assert_eq!(rig.controller.phase(), MountPhase::Unmounted);
    assert_eq!(rig.controller.active_handles(), 0);
    assert_eq!(rig.backend.live_instances(), 0);
    assert_eq!(container.listener_count(), 0);
    assert_eq!(rig.backend.ops().iter().filter(|op| **op == ChartOp::Removed).count(), 1);
}

#[test]
fn unmount_while_waiting_cancels_the_retry() {
    let rig = rig();
    let container = FakeContainer::new(0, 300);
    rig.controller.mount(Rc::new(container.clone()));
    rig.controller.unmount();

    assert_eq!(rig.scheduler.active_count(), 0);
    container.set_width(800);
    rig.scheduler.advance(500);
    assert_eq!(rig.controller.phase(), MountPhase::Unmounted);
    assert_eq!(rig.backend.created(), 0);
}

#[test]
fn remount_replaces_the_instance() {
    let rig = rig();
    let first = FakeContainer::new(800, 300);
    let second = FakeContainer::new(600, 200);
    rig.controller.mount(Rc::new(first.clone()));
    rig.controller.mount(Rc::new(second.clone()));

    assert_eq!(rig.backend.created(), 2);
    assert_eq!(rig.backend.live_instances(), 1);
    assert_eq!(first.listener_count(), 0);
    assert_eq!(second.listener_count(), 1);
}

#[test]
fn pushes_before_mount_are_rejected() {
    let rig = rig();
    assert!(matches!(rig.controller.set_series(&snapshot(3)), Err(AppError::ChartError(_))));
    assert!(rig.backend.ops().is_empty());
}

#[test]
fn binding_sends_the_full_series_on_mount_and_tails_afterwards() {
    let rig = rig();
    let data = snapshot(12);
    let initial = data.clone();
    let binding = ChartBinding::new(rig.controller.clone(), move || Some(initial.clone()));

    // ignored until mounted
    binding.apply(&SeriesUpdate::Replaced(data.clone()));
    assert!(rig.backend.ops().is_empty());

    rig.controller.mount(Rc::new(FakeContainer::new(800, 300)));
    assert_eq!(
        rig.backend.ops(),
        vec![
            ChartOp::Created { width: 800, height: 300 },
            ChartOp::SetCandles(12),
            ChartOp::SetVolumes(12),
            ChartOp::SetLine { window: 5, points: 8 },
            ChartOp::SetLine { window: 10, points: 3 },
        ]
    );
    rig.backend.clear_ops();

    let mut candle = data.candles[11].clone();
    candle.absorb_price(200.0);
    let mut candles = data.candles.clone();
    candles[11] = candle.clone();
    let ma5 = compute_moving_average(&candles, 5);
    let tail = TailUpdate {
        volume: data.volumes[11],
        derived: vec![(5, ma5.points[7])],
        candle: candle.clone(),
    };
    binding.apply(&SeriesUpdate::Tail(tail));
    assert_eq!(
        rig.backend.ops(),
        vec![
            ChartOp::UpdateCandle(candle.timestamp),
            ChartOp::UpdateVolume(candle.timestamp),
            ChartOp::UpdateLine { window: 5, time: candle.timestamp },
        ]
    );
    rig.backend.clear_ops();

    binding.apply(&SeriesUpdate::Failed("HTTP Error: status 500".into()));
    assert_eq!(
        rig.backend.ops(),
        vec![
            ChartOp::SetCandles(0),
            ChartOp::SetVolumes(0),
        ]
    );
}

#[test]
fn dropped_binding_no_longer_pushes_on_remount() {
    let rig = rig();
    let binding = ChartBinding::new(rig.controller.clone(), || Some(snapshot(3)));
    assert_eq!(rig.controller.ready_callback_count(), 1);
    drop(binding);
    assert_eq!(rig.controller.ready_callback_count(), 0);

    rig.controller.mount(Rc::new(FakeContainer::new(800, 300)));

    assert_eq!(rig.backend.ops(), vec![ChartOp::Created { width: 800, height: 300 }]);
}

#[test]
fn replacing_a_binding_leaves_only_the_new_one_attached() {
    let rig = rig();
    let first = ChartBinding::new(rig.controller.clone(), || Some(snapshot(3)));
    let second = ChartBinding::new(rig.controller.clone(), || Some(snapshot(12)));
    drop(first);

    rig.controller.mount(Rc::new(FakeContainer::new(800, 300)));

    let candle_pushes: Vec<ChartOp> = rig
        .backend
        .ops()
        .into_iter()
        .filter(|op| matches!(op, ChartOp::SetCandles(_)))
        .collect();
    assert_eq!(candle_pushes, vec![ChartOp::SetCandles(12)]);
    drop(second);
}
