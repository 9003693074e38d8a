// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_starts_at_known_epoch() {
    let clock = FakeClock::new();
    assert_eq!(clock.epoch_ms(), 1_000_000);
}

#[test]
fn fake_clock_advances() {
    let clock = FakeClock::at(5_000);
    clock.advance(Duration::from_secs(3));
    assert_eq!(clock.epoch_ms(), 8_000);
}

#[test]
fn fake_clock_clones_share_time() {
    let clock = FakeClock::new();
    let other = clock.clone();
    clock.advance(Duration::from_millis(250));
    assert_eq!(other.epoch_ms(), clock.epoch_ms());
}

#[test]
fn system_clock_is_past_2020() {
    // 2020-01-01 in epoch ms.
    assert!(SystemClock.epoch_ms() > 1_577_836_800_000);
}
