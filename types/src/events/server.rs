mod resources;
mod error;

pub use error::ErrorDetails;
pub use resources::{RateLimitInformation, ResponseResource, SessionResource};

/// `error` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    event_id: String,

    /// Details about the error
    error: ErrorDetails,
}

impl ErrorEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// `session.created` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionCreatedEvent {
    #[serde(default)]
    event_id: String,

    /// The session resource
    #[serde(default)]
    session: SessionResource,
}

impl SessionCreatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn session(&self) -> &SessionResource {
        &self.session
    }
}

/// `session.updated` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdatedEvent {
    #[serde(default)]
    event_id: String,

    /// The updated session resource
    #[serde(default)]
    session: SessionResource,
}

impl SessionUpdatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn session(&self) -> &SessionResource {
        &self.session
    }
}

/// `session.error` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionErrorEvent {
    #[serde(default)]
    event_id: String,

    /// Details about the failure
    error: ErrorDetails,
}

impl SessionErrorEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// `session.end` event, sent when the server terminates the session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionEndEvent {
    #[serde(default)]
    event_id: String,
}

impl SessionEndEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

/// `input_audio_buffer.speech_started` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpeechStartedEvent {
    #[serde(default)]
    event_id: String,

    /// Milliseconds since the session started when speech was detected
    #[serde(default)]
    audio_start_ms: i32,

    /// The ID of the user message item that will be created when speech stops
    #[serde(default)]
    item_id: String,
}

impl SpeechStartedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn audio_start_ms(&self) -> i32 {
        self.audio_start_ms
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `input_audio_buffer.speech_stopped` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpeechStoppedEvent {
    #[serde(default)]
    event_id: String,

    /// Milliseconds since the session started when speech stopped
    #[serde(default)]
    audio_end_ms: i32,

    /// The ID of the user message item that will be created
    #[serde(default)]
    item_id: String,
}

impl SpeechStoppedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn audio_end_ms(&self) -> i32 {
        self.audio_end_ms
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `response.audio_transcript.delta` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AudioTranscriptDeltaEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    #[serde(default)]
    item_id: String,

    #[serde(default)]
    output_index: i32,

    #[serde(default)]
    content_index: i32,

    /// The delta in the audio transcript
    delta: String,
}

impl AudioTranscriptDeltaEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn output_index(&self) -> i32 {
        self.output_index
    }

    pub fn content_index(&self) -> i32 {
        self.content_index
    }

    pub fn delta(&self) -> &str {
        &self.delta
    }
}

/// `response.audio_transcript.done` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AudioTranscriptDoneEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    #[serde(default)]
    item_id: String,

    #[serde(default)]
    output_index: i32,

    #[serde(default)]
    content_index: i32,

    /// The completed audio transcript
    transcript: String,
}

impl AudioTranscriptDoneEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// `conversation.item.input_audio_transcription.completed` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputTranscriptionCompletedEvent {
    #[serde(default)]
    event_id: String,

    /// The ID of the user message item
    #[serde(default)]
    item_id: String,

    /// The index of the content part containing the audio
    #[serde(default)]
    content_index: i32,

    /// The transcribed text
    transcript: String,
}

impl InputTranscriptionCompletedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn content_index(&self) -> i32 {
        self.content_index
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// `response.created` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseCreatedEvent {
    #[serde(default)]
    event_id: String,

    /// The response resource
    #[serde(default)]
    response: ResponseResource,
}

impl ResponseCreatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response(&self) -> &ResponseResource {
        &self.response
    }
}

/// `response.done` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseDoneEvent {
    #[serde(default)]
    event_id: String,

    /// The response resource
    #[serde(default)]
    response: ResponseResource,
}

impl ResponseDoneEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response(&self) -> &ResponseResource {
        &self.response
    }
}

/// `response.cancelled` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseCancelledEvent {
    #[serde(default)]
    event_id: String,

    /// The cancelled response resource
    #[serde(default)]
    response: ResponseResource,
}

impl ResponseCancelledEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response(&self) -> &ResponseResource {
        &self.response
    }
}

/// `response.function_call_arguments.delta` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallArgumentsDeltaEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    /// The ID of the function call item
    #[serde(default)]
    item_id: String,

    #[serde(default)]
    output_index: i32,

    /// The ID of the function call
    call_id: String,

    /// The delta in the function calling arguments
    delta: String,
}

impl FunctionCallArgumentsDeltaEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn delta(&self) -> &str {
        &self.delta
    }
}

/// `response.function_call_arguments.done` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallArgumentsDoneEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    /// The ID of the function call item
    #[serde(default)]
    item_id: String,

    #[serde(default)]
    output_index: i32,

    /// The ID of the function call
    call_id: String,

    /// The name of the function being called. Not always present; without
    /// it the call cannot be dispatched and is dropped.
    #[serde(default)]
    name: Option<String>,

    /// The completed function calling arguments, JSON-encoded
    arguments: String,
}

impl FunctionCallArgumentsDoneEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }
}

/// `rate_limits.updated` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RateLimitsUpdatedEvent {
    #[serde(default)]
    event_id: String,

    /// List of rate limit information
    #[serde(default)]
    rate_limits: Vec<RateLimitInformation>,
}

impl RateLimitsUpdatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn rate_limits(&self) -> &[RateLimitInformation] {
        &self.rate_limits
    }
}

/// `output_audio_buffer.stopped` event, sent when queued assistant audio
/// has finished playing out.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OutputAudioBufferStoppedEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: Option<String>,
}

impl OutputAudioBufferStoppedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }
}
