// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Weighbridge Link — the serial side of the service.  Opens the scale,
// keeps it open across unplugs and power cycles, parses its frames and
// pushes the latest reading at a fixed rate.

pub mod backoff;
pub mod debounce;
pub mod frame;
pub mod manager;
pub mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use frame::{FrameRejection, parse_frame};
pub use manager::{LinkConfig, LinkManager, MAX_FRAME_BYTES, Sample};
pub use transport::{DeviceTransport, SerialTransport, SimulatedTransport};
