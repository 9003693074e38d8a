// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource quantities with k8s-style string forms.
//!
//! `k8s-openapi`'s `Quantity` is an opaque string, so arithmetic (capacity
//! checks, usage accounting) happens here on a milli-unit fixed point. The
//! string forms `"2"`, `"500m"`, `"100Mi"`, `"1.5Gi"` all parse; formatting
//! normalizes to plain units or milli-units.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid quantity number: {0:?}")]
    BadNumber(String),
    #[error("unknown quantity suffix: {0:?}")]
    BadSuffix(String),
    #[error("quantity overflows: {0:?}")]
    Overflow(String),
}

/// A non-negative resource amount stored as milli-units.
///
/// `ResourceAmount::from_str("1")` is 1000 milli-units; `"500m"` is 500.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceAmount(i64);

/// Milli-units per one unit of the given suffix.
fn suffix_factor(suffix: &str) -> Option<i128> {
    Some(match suffix {
        "m" => 1,
        "" => 1_000,
        "k" => 1_000_000,
        "M" => 1_000_000_000,
        "G" => 1_000_000_000_000,
        "T" => 1_000_000_000_000_000,
        "Ki" => 1_024 * 1_000,
        "Mi" => 1_024 * 1_024 * 1_000,
        "Gi" => 1_024 * 1_024 * 1_024 * 1_000,
        "Ti" => 1_024i128 * 1_024 * 1_024 * 1_024 * 1_000,
        _ => return None,
    })
}

impl ResourceAmount {
    pub const ZERO: ResourceAmount = ResourceAmount(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.max(0))
    }

    pub fn from_units(units: i64) -> Self {
        Self(units.saturating_mul(1_000).max(0))
    }

    pub fn millis(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtraction floored at zero: usage accounting never goes negative.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self((self.0 - other.0).max(0))
    }
}

impl FromStr for ResourceAmount {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        let factor = suffix_factor(suffix)
            .ok_or_else(|| QuantityError::BadSuffix(suffix.to_string()))?;

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::BadNumber(number.to_string()));
        }
        if frac_part.contains('.') {
            return Err(QuantityError::BadNumber(number.to_string()));
        }

        let int: i128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| QuantityError::BadNumber(number.to_string()))?
        };
        let mut millis = int
            .checked_mul(factor)
            .ok_or_else(|| QuantityError::Overflow(s.to_string()))?;

        if !frac_part.is_empty() {
            let frac: i128 = frac_part
                .parse()
                .map_err(|_| QuantityError::BadNumber(number.to_string()))?;
            let scale = 10i128
                .checked_pow(frac_part.len() as u32)
                .ok_or_else(|| QuantityError::Overflow(s.to_string()))?;
            millis = millis
                .checked_add(frac * factor / scale)
                .ok_or_else(|| QuantityError::Overflow(s.to_string()))?;
        }

        i64::try_from(millis)
            .map(ResourceAmount)
            .map_err(|_| QuantityError::Overflow(s.to_string()))
    }
}

impl std::fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 % 1_000 == 0 {
            write!(f, "{}", self.0 / 1_000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl Serialize for ResourceAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A named set of resource amounts (cpu, memory, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceList(pub BTreeMap<SmolStr, ResourceAmount>);

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> ResourceAmount {
        self.0.get(name).copied().unwrap_or(ResourceAmount::ZERO)
    }

    pub fn insert(&mut self, name: impl Into<SmolStr>, amount: ResourceAmount) {
        self.0.insert(name.into(), amount);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every amount in `self` fits within `capacity`.
    /// Resources absent from `capacity` count as zero.
    pub fn fits_within(&self, capacity: &ResourceList) -> bool {
        self.0.iter().all(|(name, amount)| *amount <= capacity.get(name))
    }

    /// Add every amount of `other` into `self`.
    pub fn add(&mut self, other: &ResourceList) {
        for (name, amount) in &other.0 {
            let entry = self.0.entry(name.clone()).or_insert(ResourceAmount::ZERO);
            *entry = entry.saturating_add(*amount);
        }
    }

    /// Subtract `other` from `self`, flooring each amount at zero.
    pub fn sub(&mut self, other: &ResourceList) {
        for (name, amount) in &other.0 {
            let entry = self.0.entry(name.clone()).or_insert(ResourceAmount::ZERO);
            *entry = entry.saturating_sub(*amount);
        }
    }
}

impl FromIterator<(SmolStr, ResourceAmount)> for ResourceList {
    fn from_iter<I: IntoIterator<Item = (SmolStr, ResourceAmount)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
