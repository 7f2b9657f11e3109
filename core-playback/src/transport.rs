//! # Transport Adapter Boundary
//!
//! A transport adapter turns one delivery protocol into two streams the
//! session understands: inbound [`TransportEvent`]s pushed into a channel and
//! an outbound [`TransportConnection`] for control messages. How the adapter
//! talks to its server is its own business.

use crate::error::Result;
use crate::selector::Combo;
use bridge_traits::platform::PlatformSendSync;
use bridge_traits::TransportConnection;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Inbound traffic from a transport adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A binary media frame, header included.
    Frame(Bytes),
    /// A JSON control message.
    Control(Value),
    /// The connection closed.
    Closed { reason: Option<String> },
    /// The connection failed.
    Failed(String),
}

pub type TransportEventSender = UnboundedSender<TransportEvent>;

/// Opens transport connections for selected combos.
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait TransportConnector: PlatformSendSync {
    /// Connect to `combo.source` using `combo.transport`. Inbound traffic for
    /// this connection must be sent to `events`; the session drops the
    /// receiver when it abandons the connection, so late sends simply fail.
    async fn connect(
        &self,
        combo: &Combo,
        events: TransportEventSender,
    ) -> Result<Box<dyn TransportConnection>>;
}
