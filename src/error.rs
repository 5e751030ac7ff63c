use thiserror::Error;

/// Failure taxonomy for the session engine.
///
/// Start-up failures (`Credential`, `Negotiation`, `MicrophoneAccess`)
/// abort `start` after partially-acquired resources are released.
/// In-session failures (`ProtocolParse`, `ToolExecution`) are recovered
/// locally and never terminate the session. Transport loss is retried up
/// to the configured ceiling before `ReconnectionExhausted` surfaces.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("credential negotiation failed: {0}")]
    Credential(String),

    #[error("session description exchange failed: {0}")]
    Negotiation(String),

    #[error("microphone access failed: {0}")]
    MicrophoneAccess(String),

    #[error("malformed control event: {0}")]
    ProtocolParse(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectionExhausted { attempts: u32 },
}
