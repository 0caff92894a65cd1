use rand::SeedableRng;
use rand::rngs::StdRng;
use riptide::path::PathValidator;

fn addr(port: u16) -> std::net::SocketAddr {
    format!("10.0.0.1:{port}").parse().unwrap()
}

#[test]
fn test_initial_path_is_validated() {
    let path = PathValidator::new(addr(1000));
    assert!(path.is_validated());
    assert!(path.may_send(usize::MAX / 4));
}

#[test]
fn test_address_change_starts_challenge() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut path = PathValidator::new(addr(1000));
    assert!(path.on_peer_address(addr(2000), &mut rng));
    assert!(!path.is_validated());
    assert_eq!(path.addr(), addr(2000));
    let token = path.take_pending_challenge().expect("challenge queued");
    assert!(path.take_pending_challenge().is_none(), "queued once");

    assert!(path.on_path_response(token));
    assert!(path.is_validated());
}

#[test]
fn test_same_address_is_a_noop() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut path = PathValidator::new(addr(1000));
    assert!(!path.on_peer_address(addr(1000), &mut rng));
    assert!(path.is_validated());
}

#[test]
fn test_stale_token_is_rejected() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut path = PathValidator::new(addr(1000));
    path.on_peer_address(addr(2000), &mut rng);
    let good = path.take_pending_challenge().unwrap();
    let mut bad = good;
    bad[0] ^= 0xFF;
    assert!(!path.on_path_response(bad));
    assert!(!path.is_validated());
    assert!(path.on_path_response(good));
}

#[test]
fn test_amplification_cap_is_three_to_one() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut path = PathValidator::new(addr(1000));
    path.on_peer_address(addr(2000), &mut rng);

    // Nothing received on the new path yet: nothing may be sent.
    assert!(!path.may_send(1));
    path.on_bytes_received(1000);
    assert!(path.may_send(3000));
    path.on_bytes_sent(3000);
    assert!(!path.may_send(1));

    // More input buys more output.
    path.on_bytes_received(500);
    assert!(path.may_send(1500));
}

#[test]
fn test_peer_challenge_is_echoed_latest_wins() {
    let mut path = PathValidator::new(addr(1000));
    path.on_path_challenge([1; 8]);
    path.on_path_challenge([2; 8]);
    assert_eq!(path.take_pending_response(), Some([2; 8]));
    assert_eq!(path.take_pending_response(), None);
}

#[test]
fn test_lost_challenge_is_requeued() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut path = PathValidator::new(addr(1000));
    path.on_peer_address(addr(2000), &mut rng);
    let token = path.take_pending_challenge().unwrap();
    path.retransmit_challenge(token);
    assert_eq!(path.take_pending_challenge(), Some(token));
}
