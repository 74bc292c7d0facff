// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device transports.
//
// The link manager only needs "open a byte stream"; closing is dropping the
// stream.  `SerialTransport` is the real device, `SimulatedTransport` feeds a
// synthetic weighing cycle for bench setups without hardware.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use weighbridge_core::error::{Result, WeighbridgeError};

/// Something the link manager can (re)open.
#[async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    type Stream: AsyncRead + Unpin + Send + 'static;

    /// Human-readable name for logs.
    fn describe(&self) -> String;

    /// Open a fresh connection. Each call yields an independent stream.
    async fn open(&self) -> Result<Self::Stream>;
}

// ---------------------------------------------------------------------------
// Serial
// ---------------------------------------------------------------------------

/// RS-232 / USB-serial indicator, 8 data bits, no parity, one stop bit.
#[derive(Debug, Clone)]
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl DeviceTransport for SerialTransport {
    type Stream = SerialStream;

    fn describe(&self) -> String {
        format!("{}@{}", self.port_name, self.baud_rate)
    }

    async fn open(&self) -> Result<SerialStream> {
        tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| WeighbridgeError::Device(format!("open {}: {e}", self.describe())))
    }
}

// ---------------------------------------------------------------------------
// Simulated
// ---------------------------------------------------------------------------

/// Number of frames in one simulated weighing (settle, hold, unload).
const SIMULATED_CYCLE: u64 = 40;

/// Emits frames in the indicator's format: a vehicle drives on, the reading
/// swings while it settles, holds stable, then drops back to zero.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    interval: Duration,
}

/// Floor for the frame interval; a zero interval would make the ticker panic.
const MIN_SIMULATED_INTERVAL: Duration = Duration::from_millis(1);

impl SimulatedTransport {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_SIMULATED_INTERVAL),
        }
    }
}

#[async_trait]
impl DeviceTransport for SimulatedTransport {
    type Stream = DuplexStream;

    fn describe(&self) -> String {
        "simulated".into()
    }

    async fn open(&self) -> Result<DuplexStream> {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut n: u64 = 0;
            loop {
                ticker.tick().await;
                let frame = simulated_frame(n);
                if writer.write_all(frame.as_bytes()).await.is_err() {
                    debug!("simulated device closed by reader");
                    break;
                }
                n = n.wrapping_add(1);
            }
        });
        Ok(reader)
    }
}

/// Frame `n` of the synthetic stream.
pub(crate) fn simulated_frame(n: u64) -> String {
    let cycle = n / SIMULATED_CYCLE;
    let step = n % SIMULATED_CYCLE;
    // Vary the load per cycle so consecutive weighings differ.
    let target = 1000.0 + ((cycle * 2377) % 38000) as f64;
    match step {
        0..=3 => "ZR,GS +0000.00kg\r\n".to_string(),
        4..=11 => {
            let swing = (12 - step) as f64 * 37.5;
            let weight = target - swing * if step % 2 == 0 { 1.0 } else { -1.0 };
            format!("US,GS {weight:+010.2}kg\r\n")
        }
        12..=33 => format!("ST,GS {target:+010.2}kg\r\n"),
        _ => {
            let weight = target * (SIMULATED_CYCLE - step) as f64 / 8.0;
            format!("US,GS {weight:+010.2}kg\r\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_frame;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use weighbridge_core::types::ReadingStatus;

    #[test]
    fn simulated_frames_parse() {
        for n in 0..SIMULATED_CYCLE * 2 {
            let frame = simulated_frame(n);
            assert!(frame.ends_with("\r\n"));
            parse_frame(&frame).expect("simulated frame parses");
        }
    }

    #[test]
    fn simulated_cycle_settles() {
        let stable = parse_frame(&simulated_frame(20)).expect("reading");
        assert_eq!(stable.status, ReadingStatus::Stable);
        assert_eq!(stable.weight, 1000.0);
        let zero = parse_frame(&simulated_frame(0)).expect("reading");
        assert_eq!(zero.status, ReadingStatus::Zero);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_streams() {
        let transport = SimulatedTransport::new(Duration::ZERO);
        let stream = transport.open().await.expect("open");
        let mut lines = BufReader::new(stream).lines();
        let first = lines.next_line().await.expect("read").expect("line");
        assert!(parse_frame(&first).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_transport_streams_lines() {
        let transport = SimulatedTransport::new(Duration::from_millis(10));
        let stream = transport.open().await.expect("open");
        let mut lines = BufReader::new(stream).lines();
        let first = lines.next_line().await.expect("read").expect("line");
        assert_eq!(first, "ZR,GS +0000.00kg\r");
    }
}
