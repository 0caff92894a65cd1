use riptide::frame::AckFrame;
use riptide::recovery::ack_to_pns;

#[test]
fn test_single_run() {
    let ack = AckFrame::from_runs(0, &[(100, 95)]);
    assert_eq!(ack.largest, 100);
    assert_eq!(ack.first_range, 5);
    assert!(ack.ranges.is_empty());
    assert_eq!(ack.runs().unwrap(), vec![(100, 95)]);
}

#[test]
fn test_gap_and_length_semantics() {
    // Receiver saw 95-100, 90-92 and 80-85; the textbook layout.
    let runs = [(100, 95), (92, 90), (85, 80)];
    let ack = AckFrame::from_runs(3, &runs);
    assert_eq!(ack.largest, 100);
    assert_eq!(ack.first_range, 5);
    assert_eq!(ack.ranges.len(), 2);
    // 93 and 94 missing: gap encodes gap+1 unacked packets.
    assert_eq!(ack.ranges[0].gap, 1);
    // 90..=92 acked: length encodes length+1 packets.
    assert_eq!(ack.ranges[0].length, 2);
    assert_eq!(ack.ranges[1].gap, 3);
    assert_eq!(ack.ranges[1].length, 5);
    assert_eq!(ack.runs().unwrap(), runs.to_vec());
}

#[test]
fn test_pn_set_reconstruction() {
    let runs = [(50, 48), (45, 45), (10, 0)];
    let ack = AckFrame::from_runs(0, &runs);
    let mut pns = ack_to_pns(&ack).unwrap();
    pns.sort_unstable();
    let mut expected: Vec<u64> = (0..=10).collect();
    expected.push(45);
    expected.extend(48..=50);
    assert_eq!(pns, expected);
}

#[test]
fn test_adjacent_runs_do_not_merge_on_wire() {
    // Runs must be separated by at least one unacked packet; gap 0 means
    // exactly one missing.
    let runs = [(10, 8), (6, 2)];
    let ack = AckFrame::from_runs(0, &runs);
    assert_eq!(ack.ranges[0].gap, 0);
    assert_eq!(ack.ranges[0].length, 4);
    assert_eq!(ack.runs().unwrap(), runs.to_vec());
}

#[test]
fn test_runs_down_to_zero() {
    let ack = AckFrame::from_runs(0, &[(3, 0)]);
    assert_eq!(ack.first_range, 3);
    assert_eq!(ack.runs().unwrap(), vec![(3, 0)]);
    let pns = ack_to_pns(&ack).unwrap();
    assert_eq!(pns, vec![3, 2, 1, 0]);
}
