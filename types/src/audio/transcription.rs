use crate::audio::TranscriptionModel;

/// Input-audio transcription settings for the session. `None` on the
/// session payload turns transcription off entirely.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscription {
    /// The model to use for transcription, e.g. "whisper-1"
    model: TranscriptionModel,
}

impl Default for InputAudioTranscription {
    fn default() -> Self {
        Self {
            model: TranscriptionModel::Whisper,
        }
    }
}

impl InputAudioTranscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: TranscriptionModel) -> Self {
        self.model = model;
        self
    }

    pub fn model(&self) -> TranscriptionModel {
        self.model.clone()
    }
}
