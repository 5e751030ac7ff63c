use futures::future::BoxFuture;

use crate::error::SessionError;

/// Outbound side of the control data channel.
///
/// The protocol handler only needs to know whether the channel is
/// currently writable and how to push a serialized event down it, so the
/// transport hands it this seam instead of the peer connection itself.
pub trait ControlChannel: Send + Sync {
    fn is_open(&self) -> bool;
    fn send(&self, text: String) -> BoxFuture<'static, Result<(), SessionError>>;
}
