// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

#[yare::parameterized(
    plain_units   = { "2",      2_000 },
    millis        = { "500m",   500 },
    kilo          = { "2k",     2_000_000 },
    mega          = { "1M",     1_000_000_000 },
    kibi          = { "1Ki",    1_024_000 },
    mebi          = { "100Mi",  100 * 1_024 * 1_024 * 1_000 },
    gibi          = { "1Gi",    1_024i64 * 1_024 * 1_024 * 1_000 },
    fractional    = { "1.5",    1_500 },
    frac_gibi     = { "0.5Gi",  1_024i64 * 1_024 * 1_024 * 500 },
    zero          = { "0",      0 },
    whitespace    = { " 250m ", 250 },
)]
fn parses_quantities(input: &str, millis: i64) {
    let amount: ResourceAmount = input.parse().unwrap();
    assert_eq!(amount.millis(), millis);
}

#[yare::parameterized(
    empty      = { "" },
    bare_dot   = { "." },
    double_dot = { "1.2.3" },
    bad_suffix = { "1Qx" },
    negative   = { "-1" },
    word       = { "lots" },
)]
fn rejects_malformed(input: &str) {
    assert!(input.parse::<ResourceAmount>().is_err());
}

#[test]
fn display_normalizes() {
    assert_eq!("2".parse::<ResourceAmount>().unwrap().to_string(), "2");
    assert_eq!("1500m".parse::<ResourceAmount>().unwrap().to_string(), "1500m");
    // Binary suffixes flatten to plain units when divisible.
    assert_eq!("1Ki".parse::<ResourceAmount>().unwrap().to_string(), "1024");
}

#[test]
fn serde_round_trip() {
    let amount: ResourceAmount = "750m".parse().unwrap();
    let json = serde_json::to_string(&amount).unwrap();
    assert_eq!(json, "\"750m\"");
    let back: ResourceAmount = serde_json::from_str(&json).unwrap();
    assert_eq!(back, amount);
}

#[test]
fn saturating_sub_floors_at_zero() {
    let small = ResourceAmount::from_units(1);
    let big = ResourceAmount::from_units(5);
    assert_eq!(small.saturating_sub(big), ResourceAmount::ZERO);
}

fn list(entries: &[(&str, &str)]) -> ResourceList {
    entries
        .iter()
        .map(|(k, v)| (SmolStr::new(k), v.parse().unwrap()))
        .collect()
}

#[test]
fn fits_within_checks_every_resource() {
    let request = list(&[("cpu", "1"), ("memory", "1Gi")]);
    let capacity = list(&[("cpu", "4"), ("memory", "8Gi")]);
    assert!(request.fits_within(&capacity));

    let too_big = list(&[("cpu", "8"), ("memory", "1Gi")]);
    assert!(!too_big.fits_within(&capacity));
}

#[test]
fn fits_within_treats_missing_capacity_as_zero() {
    let request = list(&[("nvidia.com/gpu", "1")]);
    let capacity = list(&[("cpu", "4")]);
    assert!(!request.fits_within(&capacity));
}

#[test]
fn add_and_sub_accumulate() {
    let mut used = ResourceList::new();
    used.add(&list(&[("cpu", "1"), ("memory", "1Gi")]));
    used.add(&list(&[("cpu", "500m")]));
    assert_eq!(used.get("cpu"), "1500m".parse().unwrap());

    used.sub(&list(&[("cpu", "2")]));
    assert_eq!(used.get("cpu"), ResourceAmount::ZERO);
    assert_eq!(used.get("memory"), "1Gi".parse().unwrap());
}

proptest! {
    #[test]
    fn millis_round_trip_through_display(millis in 0i64..=i64::MAX / 2) {
        let amount = ResourceAmount::from_millis(millis);
        let parsed: ResourceAmount = amount.to_string().parse().unwrap();
        prop_assert_eq!(parsed, amount);
    }
}
