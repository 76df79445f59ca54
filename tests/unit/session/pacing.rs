use super::*;

const MS: Duration = Duration::from_millis(1);

#[test]
fn sleep_is_period_minus_elapsed() {
    let t0 = Instant::now();
    let mut p = FramePacer::new(200 * MS, t0);
    assert_eq!(p.next_sleep(t0 + 50 * MS), 150 * MS);
    // Second tick starts at t0+200 and took 30ms.
    assert_eq!(p.next_sleep(t0 + 230 * MS), 170 * MS);
}

#[test]
fn schedule_does_not_drift() {
    let t0 = Instant::now();
    let mut p = FramePacer::new(200 * MS, t0);
    let mut now = t0;
    for _ in 0..100 {
        now += 7 * MS;
        let s = p.next_sleep(now);
        now += s;
    }
    assert_eq!(now, t0 + 100 * 200 * MS);
}

#[test]
fn small_overrun_sleeps_zero_and_keeps_grid() {
    let t0 = Instant::now();
    let mut p = FramePacer::new(200 * MS, t0);
    assert_eq!(p.next_sleep(t0 + 250 * MS), Duration::ZERO);
    // Next deadline stays on the t0 + 400ms grid line.
    assert_eq!(p.next_sleep(t0 + 300 * MS), 100 * MS);
}

#[test]
fn large_overrun_rebases() {
    let t0 = Instant::now();
    let mut p = FramePacer::new(200 * MS, t0);
    assert_eq!(p.next_sleep(t0 + 1000 * MS), Duration::ZERO);
    assert_eq!(p.next_sleep(t0 + 1010 * MS), 190 * MS);
    assert_eq!(p.period(), 200 * MS);
}

#[test]
fn backoff_doubles_and_caps() {
    let t0 = Instant::now();
    let mut b = RestartBackoff::new(500 * MS, 3000 * MS, 10_000 * MS);
    assert!(b.ready(t0));
    assert_eq!(b.record_failure(t0), 500 * MS);
    assert!(!b.ready(t0 + 499 * MS));
    assert!(b.ready(t0 + 500 * MS));
    assert_eq!(b.record_failure(t0), 1000 * MS);
    assert_eq!(b.record_failure(t0), 2000 * MS);
    assert_eq!(b.record_failure(t0), 3000 * MS);
    assert_eq!(b.record_failure(t0), 3000 * MS);
    assert_eq!(b.failures(), 5);

    // A start alone does not forgive earlier failures.
    b.record_start(t0);
    assert!(b.ready(t0));
    assert_eq!(b.failures(), 5);
    b.record_progress(t0 + 10_000 * MS);
    assert_eq!(b.failures(), 0);
    assert_eq!(b.record_failure(t0), 500 * MS);
}

#[test]
fn crash_loop_backs_off_until_sink_is_healthy() {
    let t0 = Instant::now();
    let mut b = RestartBackoff::new(500 * MS, 30_000 * MS, 10_000 * MS);

    b.record_start(t0);
    // First crash restarts right away.
    assert_eq!(b.record_crash(t0 + 100 * MS), Duration::ZERO);
    assert!(b.ready(t0 + 100 * MS));

    // Spawns that die quickly keep doubling the wait.
    b.record_start(t0 + 100 * MS);
    b.record_progress(t0 + 200 * MS);
    assert_eq!(b.record_crash(t0 + 300 * MS), 1000 * MS);
    assert!(!b.ready(t0 + 1200 * MS));
    b.record_start(t0 + 1300 * MS);
    assert_eq!(b.record_crash(t0 + 1400 * MS), 2000 * MS);
    assert_eq!(b.failures(), 3);

    // Ten seconds of progress after a start clears the count.
    b.record_start(t0 + 3400 * MS);
    b.record_progress(t0 + 13_400 * MS);
    assert_eq!(b.failures(), 0);
    assert_eq!(b.record_crash(t0 + 14_000 * MS), Duration::ZERO);
}

#[test]
fn long_healthy_run_makes_next_crash_immediate_without_progress_call() {
    let t0 = Instant::now();
    let mut b = RestartBackoff::new(500 * MS, 30_000 * MS, 10_000 * MS);
    b.record_failure(t0);
    b.record_failure(t0);
    b.record_start(t0 + 2000 * MS);
    assert_eq!(b.record_crash(t0 + 20_000 * MS), Duration::ZERO);
    assert_eq!(b.failures(), 1);
}

#[test]
fn backoff_survives_many_failures() {
    let t0 = Instant::now();
    let mut b = RestartBackoff::new(
        Duration::from_secs(1),
        Duration::from_secs(30),
        Duration::from_secs(10),
    );
    for _ in 0..100 {
        b.record_failure(t0);
    }
    assert_eq!(b.record_failure(t0), Duration::from_secs(30));
}
