// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! String interning for repeated annotation/label text.
//!
//! Queue names, jobsets, and label keys repeat across millions of jobs.
//! Short strings live inline in `SmolStr` and need no cache; longer ones are
//! deduplicated here so each distinct value is heap-allocated once and shared
//! by reference count afterwards.

use parking_lot::Mutex;
use smol_str::SmolStr;
use std::collections::HashSet;

/// Strings at or below this length are inlined by `SmolStr` and skip the cache.
const INLINE_LEN: usize = 23;

#[derive(Default)]
pub struct Interner {
    cache: Mutex<HashSet<SmolStr>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> SmolStr {
        if s.len() <= INLINE_LEN {
            return SmolStr::new(s);
        }
        let mut cache = self.cache.lock();
        if let Some(hit) = cache.get(s) {
            return hit.clone();
        }
        let value = SmolStr::new(s);
        cache.insert(value.clone());
        value
    }

    /// Number of distinct heap strings cached.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "intern_tests.rs"]
mod tests;
