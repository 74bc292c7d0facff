// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

use async_trait::async_trait;

use weighbridge_core::error::Result;

/// Outbound half of one subscriber connection.
///
/// Each sink is driven by exactly one delivery task, so implementations need
/// no internal locking.
#[async_trait]
pub trait MessageSink: Send + 'static {
    /// Peer description for logs.
    fn describe(&self) -> String {
        "subscriber".into()
    }

    /// Write one text message.  An error ends the subscription.
    async fn send_text(&mut self, message: &str) -> Result<()>;

    /// Close the connection.  Errors are not interesting at this point.
    async fn close(&mut self);
}
