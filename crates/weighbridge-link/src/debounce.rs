// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Push suppression for readings that have not moved.

use weighbridge_core::types::{Reading, ReadingStatus};

/// Remembers the last *delivered* reading and decides whether a new one is
/// worth pushing.
///
/// Comparison is against the last delivered value rather than the last seen
/// one, so a slow drift is delivered once its total exceeds the tolerance.
#[derive(Debug, Clone)]
pub struct Debouncer {
    epsilon: f64,
    last: Option<(ReadingStatus, f64)>,
}

impl Debouncer {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            last: None,
        }
    }

    /// Returns `true` (and records the reading) when the status changed or
    /// the weight moved by more than the tolerance.
    pub fn should_deliver(&mut self, reading: &Reading) -> bool {
        let changed = match self.last {
            None => true,
            Some((status, weight)) => {
                status != reading.status || (reading.weight - weight).abs() > self.epsilon
            }
        };
        if changed {
            self.last = Some((reading.status, reading.weight));
        }
        changed
    }

    /// Forget the last delivered reading.
    pub fn clear(&mut self) {
        self.last = None;
    }
}
