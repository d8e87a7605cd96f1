//! Cross-module scenarios: scheduling against a running infrastructure,
//! capacity rejection, restart behaviour, dwell timing.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{mock_infra, step};

use fauxload::core::errors::{FauxloadError, ResourceKind};
use fauxload::core::step::LoadStep;
use fauxload::schedule::scheduler::LoadScheduler;

#[test]
fn single_step_schedule_completes_after_its_dwell() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    let started = Instant::now();
    scheduler
        .execute(&step(20, 200))
        .expect("schedule should finish");
    assert!(
        started.elapsed() >= Duration::from_millis(200),
        "handle must not complete before the dwell"
    );
    assert_eq!(infra.load_snapshot().cpu, 0, "increase matched by decrease");

    infra.stop().expect("stop");
}

#[test]
fn capacity_rejection_carries_exact_amounts_and_leaves_state() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    infra
        .increase_system_load_by(&step(80, 50))
        .expect("preload fits");

    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    let err = scheduler
        .execute(&step(30, 50))
        .expect_err("cpu 80+30 exceeds 100");
    match err {
        FauxloadError::MaximumLoadExceeded {
            resource,
            current,
            delta,
            max,
        } => {
            assert_eq!(resource, ResourceKind::Cpu);
            assert_eq!(current, 80);
            assert_eq!(delta, 30);
            assert_eq!(max, 100);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        infra.load_snapshot().cpu,
        80,
        "state unchanged after rejection"
    );

    infra.stop().expect("stop");
}

#[test]
fn nested_pattern_dwells_sequentially() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let root = step(10, 100).with_children(vec![step(20, 100), step(30, 100)]);
    let scheduler = LoadScheduler::new(Arc::clone(&infra));

    let started = Instant::now();
    scheduler.execute(&root).expect("schedule should finish");
    let elapsed = started.elapsed();

    assert!(
        elapsed >= Duration::from_millis(300),
        "three 100ms dwells take at least 300ms, got {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(1_500),
        "no unexplained stalls, got {elapsed:?}"
    );
    assert_eq!(infra.load_snapshot().cpu, 0);

    infra.stop().expect("stop");
}

#[test]
fn repetitions_multiply_traversal_time() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let pattern = step(5, 50)
        .with_repetitions(3)
        .expect("valid repetitions");
    let scheduler = LoadScheduler::new(Arc::clone(&infra));

    let started = Instant::now();
    scheduler.execute(&pattern).expect("schedule should finish");
    assert!(
        started.elapsed() >= Duration::from_millis(150),
        "three repetitions of a 50ms dwell"
    );

    infra.stop().expect("stop");
}

#[test]
fn zero_cpu_step_dwells_without_raising_targets() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    let pattern = LoadStep::idle(Duration::from_millis(150));

    let started = Instant::now();
    let handle = scheduler.schedule(&pattern).expect("schedule");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        infra.load_snapshot().cpu,
        0,
        "pure dwell must not raise the CPU target"
    );
    handle.wait().expect("schedule should finish");
    assert!(started.elapsed() >= Duration::from_millis(150));

    infra.stop().expect("stop");
}

#[test]
fn zero_duration_step_advances_immediately() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    let started = Instant::now();
    scheduler
        .execute(&step(50, 0))
        .expect("schedule should finish");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "zero-duration step must not dwell"
    );

    infra.stop().expect("stop");
}

#[test]
fn full_cpu_step_saturates_and_completes() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    let handle = scheduler.schedule(&step(100, 150)).expect("schedule");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(infra.load_snapshot().cpu, 100);
    handle.wait().expect("schedule should finish");

    infra.stop().expect("stop");
}

#[test]
fn memory_step_applies_and_releases_its_target() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let pattern = LoadStep::new(0, 8 * 1024 * 1024, 0, 0, Duration::from_millis(200))
        .expect("valid step");
    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    let handle = scheduler.schedule(&pattern).expect("schedule");

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(infra.load_snapshot().memory, 8 * 1024 * 1024);
    handle.wait().expect("schedule should finish");
    assert_eq!(infra.load_snapshot().memory, 0);

    infra.stop().expect("stop");
}

#[test]
fn io_steps_apply_and_release_their_targets() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let pattern = LoadStep::new(0, 0, 512 * 1024, 256 * 1024, Duration::from_millis(200))
        .expect("valid step");
    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    let handle = scheduler.schedule(&pattern).expect("schedule");

    std::thread::sleep(Duration::from_millis(100));
    let snapshot = infra.load_snapshot();
    assert_eq!(snapshot.disk_io, 512 * 1024);
    assert_eq!(snapshot.net_io, 256 * 1024);
    handle.wait().expect("schedule should finish");
    assert_eq!(infra.load_snapshot().disk_io, 0);
    assert_eq!(infra.load_snapshot().net_io, 0);

    infra.stop().expect("stop");
}

#[test]
fn stop_interrupts_an_active_schedule() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    let handle = scheduler
        .schedule(&step(10, 30_000))
        .expect("schedule should spawn");

    std::thread::sleep(Duration::from_millis(100));
    infra.stop().expect("stop");

    let err = handle.wait().expect_err("stop must interrupt the dwell");
    assert_eq!(err.code(), "FXL-2003");
}

#[test]
#[cfg(target_os = "linux")]
fn restart_leaks_no_threads() {
    use common::os_thread_count;

    let (infra, _dir) = mock_infra();
    let before = os_thread_count();

    infra.start().expect("first start");
    infra.stop().expect("first stop");
    infra.start().expect("second start");

    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    scheduler
        .execute(&step(5, 100))
        .expect("trivial pattern should finish");

    infra.stop().expect("second stop");

    // Workers join within the grace window; thread count returns to the
    // pre-start baseline.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut after = os_thread_count();
    while after > before && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
        after = os_thread_count();
    }
    assert_eq!(
        before, after,
        "thread count before first start must equal count after second stop"
    );
}

#[test]
fn sequential_schedules_reuse_the_same_infrastructure() {
    let (infra, _dir) = mock_infra();
    infra.start().expect("start");

    let scheduler = LoadScheduler::new(Arc::clone(&infra));
    for cpu in [10, 40, 70] {
        scheduler
            .execute(&step(cpu, 60))
            .expect("schedule should finish");
        assert_eq!(infra.load_snapshot().cpu, 0);
    }

    infra.stop().expect("stop");
}
