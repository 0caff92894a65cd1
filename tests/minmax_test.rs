use riptide::congestion::MinMax;

#[test]
fn test_tracks_maximum() {
    let mut mm = MinMax::new(10);
    mm.update_max(0, 100);
    assert_eq!(mm.get(), 100);
    mm.update_max(1, 50);
    assert_eq!(mm.get(), 100);
    mm.update_max(2, 150);
    assert_eq!(mm.get(), 150);
}

#[test]
fn test_old_maximum_expires() {
    let mut mm = MinMax::new(10);
    mm.update_max(0, 1000);
    // Keep feeding smaller samples; once the window passes, the old peak
    // must fall out.
    for t in 1..=25 {
        mm.update_max(t, 100);
    }
    assert_eq!(mm.get(), 100);
}

#[test]
fn test_descending_series_follows_window() {
    let mut mm = MinMax::new(4);
    for t in 0..20u64 {
        mm.update_max(t, 1000 - t * 10);
    }
    // The window only holds the last 4 time units; the best value in it is
    // the oldest of those.
    let best = mm.get();
    assert!(best <= 1000 - 15 * 10, "stale max survived: {best}");
}

#[test]
fn test_reset_pins_all_samples() {
    let mut mm = MinMax::new(10);
    mm.update_max(0, 500);
    mm.reset(5, 7);
    assert_eq!(mm.get(), 7);
    mm.update_max(6, 3);
    assert_eq!(mm.get(), 7);
}

#[test]
fn test_new_max_always_wins_immediately() {
    let mut mm = MinMax::new(100);
    mm.update_max(0, 10);
    mm.update_max(1, 20);
    mm.update_max(2, 30);
    assert_eq!(mm.get(), 30);
}
