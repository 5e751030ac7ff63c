use crate::Item;
use crate::session::SessionPayload;

/// `session.update` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The session configuration to apply
    session: SessionPayload,
}

impl SessionUpdateEvent {
    pub fn new(session: SessionPayload) -> Self {
        Self {
            event_id: None,
            session,
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn session(&self) -> &SessionPayload {
        &self.session
    }
}

/// `conversation.item.create` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The ID of the preceding item after which the new item will be inserted
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_item_id: Option<String>,

    /// The item to add to the conversation
    item: Item,
}

impl ConversationItemCreateEvent {
    pub fn new(item: Item) -> Self {
        Self {
            event_id: None,
            previous_item_id: None,
            item,
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn with_previous_item_id(mut self, previous_item_id: &str) -> Self {
        self.previous_item_id = Some(previous_item_id.to_string());
        self
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// Per-response overrides carried on `response.create`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResponseOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

impl ResponseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modalities(mut self, modalities: Vec<String>) -> Self {
        self.modalities = Some(modalities);
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = Some(instructions.to_string());
        self
    }
}

/// `response.create` event
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResponseCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// Optional configuration for this response
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<ResponseOptions>,
}

impl ResponseCreateEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn with_options(mut self, options: ResponseOptions) -> Self {
        self.response = Some(options);
        self
    }
}

/// `response.cancel` event
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResponseCancelEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl ResponseCancelEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }
}

/// `output_audio_buffer.clear` event. Sent alongside `response.cancel` so
/// audio already queued for playback is dropped too.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct OutputAudioBufferClearEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl OutputAudioBufferClearEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }
}
