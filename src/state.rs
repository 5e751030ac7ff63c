use std::time::{SystemTime, UNIX_EPOCH};

use voicebridge_types::MessageRole;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// High-level phase of the conversation, driven by inbound control events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationPhase {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    pub phase: ConversationPhase,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub connected: bool,
    pub active: bool,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub quality: ConnectionQuality,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            connected: false,
            active: false,
            session_id: None,
            user_id: None,
            quality: ConnectionQuality::Good,
        }
    }
}

/// Who is currently talking, as reported by the remote voice-activity
/// detector and the response lifecycle.
#[derive(Debug, Clone, Default)]
pub struct SpeechDetectionState {
    pub user_speaking: bool,
    pub assistant_speaking: bool,
    pub speech_started_at: Option<u64>,
    pub speech_stopped_at: Option<u64>,
}

/// A finalized entry in the conversation history.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp_ms: u64,
    /// True when the content came from audio transcription rather than
    /// text the application injected itself.
    pub is_transcript: bool,
    pub interrupted: bool,
}

/// Streaming transcript update. Partial updates carry the accumulated
/// text so far; the final update repeats the complete utterance.
#[derive(Debug, Clone)]
pub struct LiveTranscript {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
    pub is_partial: bool,
    pub timestamp_ms: u64,
}

/// Locally measured microphone activity sample.
#[derive(Debug, Clone, Copy)]
pub struct VoiceActivity {
    pub volume: f32,
    pub is_speaking: bool,
    pub timestamp_ms: u64,
}

/// State shared between the engine task and the session handle.
#[derive(Default)]
pub(crate) struct SharedState {
    pub status: std::sync::Mutex<SessionStatus>,
    pub history: std::sync::Mutex<Vec<ConversationMessage>>,
}

/// Everything the engine reports to observers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Status(SessionStatus),
    Conversation(ConversationState),
    Speech(SpeechDetectionState),
    Message(ConversationMessage),
    Transcript(LiveTranscript),
    VoiceActivity(VoiceActivity),
    /// All reconnection attempts failed; the session is over.
    ConnectionLost { attempts: u32 },
    Error(String),
}
