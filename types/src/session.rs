use crate::audio::{AudioFormat, InputAudioTranscription, TranscriptionModel, TurnDetection, Voice};
use crate::tools::Tool;

/// The remote endpoint rejects sampling temperatures below this floor.
pub const MIN_TEMPERATURE: f32 = 0.6;

/// Immutable snapshot of the parameters a session was started with.
///
/// Captured once by `start` and retained verbatim so a reconnection can
/// replay the exact same configuration. The `audio_enabled`/`vad_enabled`
/// flags are local concerns (microphone capture, activity monitoring) and
/// never appear on the wire; everything else maps onto the
/// `session.update` payload via [`SessionConfig::to_payload`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    audio_enabled: bool,
    vad_enabled: bool,
    instructions: Option<String>,
    voice: Option<Voice>,
    temperature: f32,
    max_output_tokens: Option<MaxOutputTokens>,
    turn_detection: Option<TurnDetection>,
    input_audio_transcription: Option<InputAudioTranscription>,
    tools: Vec<Tool>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            vad_enabled: true,
            instructions: None,
            voice: None,
            temperature: 0.7,
            max_output_tokens: None,
            turn_detection: Some(TurnDetection::default()),
            input_audio_transcription: Some(InputAudioTranscription::new()),
            tools: vec![],
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn vad_enabled(&self) -> bool {
        self.vad_enabled
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// The wire-side `session` object for a `session.update` event. The
    /// temperature floor is applied here, not at build time, so the
    /// retained snapshot stays exactly what the caller supplied.
    pub fn to_payload(&self) -> SessionPayload {
        SessionPayload {
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            temperature: self.temperature.max(MIN_TEMPERATURE),
            max_response_output_tokens: self.max_output_tokens.clone(),
            turn_detection: self.turn_detection.clone(),
            input_audio_transcription: self.input_audio_transcription.clone(),
            tools: self.tools.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MaxOutputTokens {
    Number(i32),
    Infinity(String),
}

/// The `session` object as serialized into `session.update`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<Voice>,

    #[serde(default)]
    input_audio_format: AudioFormat,

    #[serde(default)]
    output_audio_format: AudioFormat,

    temperature: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_response_output_tokens: Option<MaxOutputTokens>,

    #[serde(skip_serializing_if = "Option::is_none")]
    turn_detection: Option<TurnDetection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<InputAudioTranscription>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    tools: Vec<Tool>,
}

impl SessionPayload {
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }
}

pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn with_audio_enabled(mut self, enabled: bool) -> Self {
        self.config.audio_enabled = enabled;
        self
    }

    pub fn with_vad_enabled(mut self, enabled: bool) -> Self {
        self.config.vad_enabled = enabled;
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.config.instructions = Some(instructions.to_string());
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.config.voice = Some(voice);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: MaxOutputTokens) -> Self {
        self.config.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_turn_detection(mut self, turn_detection: TurnDetection) -> Self {
        self.config.turn_detection = Some(turn_detection);
        self
    }

    pub fn with_turn_detection_disable(mut self) -> Self {
        self.config.turn_detection = None;
        self
    }

    pub fn with_input_transcription(mut self, model: TranscriptionModel) -> Self {
        self.config.input_audio_transcription =
            Some(InputAudioTranscription::new().with_model(model));
        self
    }

    pub fn with_input_transcription_disable(mut self) -> Self {
        self.config.input_audio_transcription = None;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_payload_applies_temperature_floor() {
        let config = SessionConfig::builder().with_temperature(0.2).build();
        assert_eq!(config.temperature(), 0.2);
        assert_eq!(config.to_payload().temperature(), MIN_TEMPERATURE);

        let config = SessionConfig::builder().with_temperature(0.9).build();
        assert_eq!(config.to_payload().temperature(), 0.9);
    }

    #[test]
    fn test_payload_omits_local_flags() {
        let config = SessionConfig::builder()
            .with_audio_enabled(false)
            .with_voice(Voice::Sage)
            .with_instructions("Be brief.")
            .build();
        let json = serde_json::to_value(config.to_payload()).unwrap();
        assert!(json.get("audio_enabled").is_none());
        assert!(json.get("vad_enabled").is_none());
        assert_eq!(json["voice"], "sage");
        assert_eq!(json["instructions"], "Be brief.");
        assert_eq!(json["input_audio_format"], "pcm16");
        assert_eq!(json["output_audio_format"], "pcm16");
        assert_eq!(json["turn_detection"]["type"], "server_vad");
    }

    #[test]
    fn test_payload_skips_disabled_sections() {
        let config = SessionConfig::builder()
            .with_turn_detection_disable()
            .with_input_transcription_disable()
            .build();
        let json = serde_json::to_value(config.to_payload()).unwrap();
        assert!(json.get("turn_detection").is_none());
        assert!(json.get("input_audio_transcription").is_none());
        assert!(json.get("tools").is_none());
    }
}
