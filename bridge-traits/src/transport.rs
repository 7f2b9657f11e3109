//! Transport connection bridge.
//!
//! A transport connection is the live half of a transport adapter: the
//! socket (WebSocket, data channel, native stream) over which a session
//! receives binary frames and JSON control messages. Inbound traffic is
//! pushed by the adapter into the session's event channel; this trait only
//! covers the outbound direction.

use crate::{error::Result, platform::PlatformSendSync};
use serde_json::Value;

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait TransportConnection: PlatformSendSync {
    /// Queue a JSON control message for the server.
    fn send_control(&self, message: Value) -> Result<()>;

    /// Close the connection. Must be idempotent.
    async fn close(&self) -> Result<()>;

    /// Whether the underlying connection is still open.
    fn is_open(&self) -> bool;
}
