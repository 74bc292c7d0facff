// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scale frame parser.
//
// A frame is one line of ASCII from the indicator, e.g.
//
//   ST,GS +0012.50kg
//   US,NT,-0000.35 kg
//
// The first token is the stability code, the second the quantity code (gross
// or net), followed by the signed value and an optional unit suffix.  Lines
// without that two-token prefix are noise and are rejected.  A recognised
// prefix with an unreadable number still yields a reading, with weight zero,
// so a stability change is never lost to a garbled value field.

use thiserror::Error;
use tracing::warn;

use weighbridge_core::types::{Reading, ReadingStatus};

/// Stability code → status.  Anything else that looks like a code maps to
/// [`ReadingStatus::Unknown`].
const STATUS_CODES: [(&str, ReadingStatus); 4] = [
    ("ST", ReadingStatus::Stable),
    ("US", ReadingStatus::Unstable),
    ("OV", ReadingStatus::Overload),
    ("ZR", ReadingStatus::Zero),
];

/// Quantity codes accepted in the second prefix token (gross, net).
const QUANTITY_CODES: [&str; 2] = ["GS", "NT"];

/// Why a line was not turned into a reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameRejection {
    #[error("empty frame")]
    Empty,
    #[error("no status prefix")]
    NoPrefix,
    #[error("unknown quantity code {0:?}")]
    UnknownQuantity(String),
}

/// Parse one decoded line into a [`Reading`].
///
/// Never panics; rejection is the normal outcome for noise and partial reads.
pub fn parse_frame(line: &str) -> Result<Reading, FrameRejection> {
    let line = line.trim_matches(|c: char| c.is_whitespace() || c.is_control());
    if line.is_empty() {
        return Err(FrameRejection::Empty);
    }

    let (stability, rest) = line.split_once(',').ok_or(FrameRejection::NoPrefix)?;
    if stability.len() != 2 || !stability.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(FrameRejection::NoPrefix);
    }

    let quantity = rest.get(..2).ok_or(FrameRejection::NoPrefix)?;
    if !QUANTITY_CODES.contains(&quantity) {
        return Err(FrameRejection::UnknownQuantity(quantity.to_owned()));
    }

    // The value is separated from the prefix by a comma or whitespace.
    let value = &rest[2..];
    let value = match value.chars().next() {
        None => "",
        Some(sep) if sep == ',' || sep.is_whitespace() => &value[sep.len_utf8()..],
        Some(_) => return Err(FrameRejection::NoPrefix),
    };

    let status = status_for(stability);
    let (number, unit) = split_unit(value.trim());

    let weight = match parse_weight(number) {
        Some(weight) => weight,
        None => {
            warn!(frame = line, value = number, "unreadable weight, reporting zero");
            0.0
        }
    };

    Ok(Reading::new(status, weight, unit))
}

fn status_for(code: &str) -> ReadingStatus {
    STATUS_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, status)| *status)
        .unwrap_or(ReadingStatus::Unknown)
}

/// Split `"+0012.50kg"` into `("+0012.50", "kg")`.
fn split_unit(value: &str) -> (&str, &str) {
    let number_end = value
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphabetic())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    (value[..number_end].trim_end(), &value[number_end..])
}

/// Indicators pad between sign and digits (`"+   12.5"`), so inner
/// whitespace is dropped before parsing.
fn parse_weight(number: &str) -> Option<f64> {
    let parsed = if number.contains(char::is_whitespace) {
        number
            .split_whitespace()
            .collect::<String>()
            .parse::<f64>()
    } else {
        number.parse::<f64>()
    };
    parsed.ok().filter(|w| w.is_finite())
}
