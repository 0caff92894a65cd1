use std::time::Duration;

use riptide::rtt::RttEstimator;

const MIN_RTO: Duration = Duration::from_millis(100);
const MAX_RTO: Duration = Duration::from_secs(6);

#[test]
fn test_first_sample_initializes() {
    let mut rtt = RttEstimator::new(Duration::from_millis(200));
    assert!(!rtt.has_sample());
    rtt.update(Duration::from_millis(80));
    assert_eq!(rtt.srtt(), Duration::from_millis(80));
    assert_eq!(rtt.rttvar(), Duration::from_millis(40));
    assert_eq!(rtt.min_rtt(), Duration::from_millis(80));
}

#[test]
fn test_smoothing_converges() {
    let mut rtt = RttEstimator::new(Duration::from_millis(200));
    for _ in 0..100 {
        rtt.update(Duration::from_millis(50));
    }
    let srtt = rtt.srtt();
    assert!(
        srtt >= Duration::from_millis(49) && srtt <= Duration::from_millis(51),
        "srtt {srtt:?}"
    );
    assert!(rtt.rttvar() < Duration::from_millis(2));
}

#[test]
fn test_min_rtt_never_rises() {
    let mut rtt = RttEstimator::new(Duration::from_millis(200));
    rtt.update(Duration::from_millis(30));
    rtt.update(Duration::from_millis(300));
    rtt.update(Duration::from_millis(200));
    assert_eq!(rtt.min_rtt(), Duration::from_millis(30));
}

#[test]
fn test_rto_before_any_sample_is_initial() {
    let rtt = RttEstimator::new(Duration::from_millis(200));
    assert_eq!(rtt.rto(MIN_RTO, MAX_RTO), Duration::from_millis(200));
}

#[test]
fn test_rto_clamped_to_bounds() {
    let mut rtt = RttEstimator::new(Duration::from_millis(200));
    rtt.update(Duration::from_micros(100));
    assert_eq!(rtt.rto(MIN_RTO, MAX_RTO), MIN_RTO);

    let mut slow = RttEstimator::new(Duration::from_millis(200));
    slow.update(Duration::from_secs(10));
    assert_eq!(slow.rto(MIN_RTO, MAX_RTO), MAX_RTO);
}

#[test]
fn test_pto_includes_ack_delay() {
    let mut rtt = RttEstimator::new(Duration::from_millis(200));
    rtt.update(Duration::from_millis(100));
    let mad = Duration::from_millis(25);
    let pto = rtt.pto(mad);
    // srtt + 4*rttvar + max_ack_delay
    assert_eq!(pto, Duration::from_millis(100) + Duration::from_millis(200) + mad);
}
