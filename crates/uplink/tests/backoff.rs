use uplink::registration::{backoff_bound, backoff_delay_secs, CONNECT_RETRY_BASELINE};

#[test]
fn bound_doubles_then_caps_at_128() {
    assert_eq!(backoff_bound(0), 1);
    assert_eq!(backoff_bound(1), 2);
    assert_eq!(backoff_bound(2), 4);
    assert_eq!(backoff_bound(3), 8);
    assert_eq!(backoff_bound(7), 128);
    assert_eq!(backoff_bound(8), 128);
    assert_eq!(backoff_bound(30), 128);
}

#[test]
fn delay_stays_within_bound() {
    for retries in 0..20 {
        let bound = backoff_bound(retries);
        for _ in 0..200 {
            let delay = backoff_delay_secs(retries);
            assert!(
                delay < bound,
                "retries={retries}: delay {delay} outside [0, {bound})"
            );
        }
    }
}

#[test]
fn first_retries_match_expected_windows() {
    // three consecutive rejections from a fresh start walk retries
    // through 1, 2, 3 with windows [0,2), [0,4), [0,8)
    let mut retries = 0u32;
    for expected_bound in [2u64, 4, 8] {
        retries += 1;
        assert_eq!(backoff_bound(retries), expected_bound);
        let delay = backoff_delay_secs(retries);
        assert!(delay < expected_bound);
    }
}

#[test]
fn baseline_after_success_is_low() {
    assert_eq!(backoff_bound(CONNECT_RETRY_BASELINE), 4);
}
