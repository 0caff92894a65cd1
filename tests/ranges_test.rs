use riptide::ranges::RangeSet;

#[test]
fn test_insert_and_contains() {
    let mut set = RangeSet::new();
    assert!(set.insert(5, 10));
    assert!(set.contains(5));
    assert!(set.contains(10));
    assert!(!set.contains(4));
    assert!(!set.contains(11));
    assert_eq!(set.len(), 1);
}

#[test]
fn test_coalescing() {
    let mut set = RangeSet::new();
    set.insert(0, 4);
    set.insert(10, 14);
    assert_eq!(set.len(), 2);
    // Fill the hole; everything must fuse into one range.
    set.insert(5, 9);
    assert_eq!(set.len(), 1);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![(0, 14)]);
}

#[test]
fn test_abutting_values_merge() {
    let mut set = RangeSet::new();
    set.insert_value(1);
    set.insert_value(2);
    set.insert_value(3);
    assert_eq!(set.len(), 1);
    assert_eq!(set.min(), Some(1));
    assert_eq!(set.max(), Some(3));
}

#[test]
fn test_duplicate_insert_reports_no_change() {
    let mut set = RangeSet::new();
    assert!(set.insert(10, 20));
    assert!(!set.insert(12, 18));
    assert!(!set.insert_value(15));
    assert!(set.insert(15, 25));
}

#[test]
fn test_remove_splits() {
    let mut set = RangeSet::new();
    set.insert(0, 20);
    set.remove(5, 10);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![(0, 4), (11, 20)]);
    assert!(!set.contains(7));
}

#[test]
fn test_remove_below() {
    let mut set = RangeSet::new();
    set.insert(0, 5);
    set.insert(8, 12);
    set.remove_below(10);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![(10, 12)]);
}

#[test]
fn test_contiguous_run_from() {
    let mut set = RangeSet::new();
    set.insert(3, 9);
    assert_eq!(set.contiguous_run_from(3), 7);
    assert_eq!(set.contiguous_run_from(5), 5);
    assert_eq!(set.contiguous_run_from(10), 0);
    assert_eq!(set.contiguous_run_from(0), 0);
}

#[test]
fn test_overlapping_merge_keeps_extremes() {
    let mut set = RangeSet::new();
    set.insert(10, 20);
    set.insert(5, 12);
    set.insert(18, 30);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![(5, 30)]);
}
