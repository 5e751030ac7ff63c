mod channel;
mod credentials;
mod error;
mod monitor;
mod protocol;
mod reconnect;
mod session;
mod state;
mod tools;
mod transport;

pub use voicebridge_types as types;
pub use voicebridge_utils as utils;

pub use channel::ControlChannel;
pub use credentials::{CredentialNegotiator, EndpointConfig, EphemeralCredential};
pub use error::SessionError;
pub use monitor::{MonitorSettings, VoiceActivityMonitor};
pub use reconnect::ReconnectPolicy;
pub use session::VoiceSession;
pub use state::{
    ConnectionQuality, ConversationMessage, ConversationPhase, ConversationState, EngineEvent,
    LiveTranscript, SessionStatus, SpeechDetectionState, VoiceActivity,
};
pub use tools::{ToolHandler, ToolInvocation, ToolRegistry};
