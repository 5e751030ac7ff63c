pub mod client;
pub mod server;

use client::*;
use server::*;

/// Outbound control events, written to the data channel by the engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdateEvent),
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate(ConversationItemCreateEvent),
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseCreateEvent),
    #[serde(rename = "response.cancel")]
    ResponseCancel(ResponseCancelEvent),
    #[serde(rename = "output_audio_buffer.clear")]
    OutputAudioBufferClear(OutputAudioBufferClearEvent),
}

/// Inbound control events, parsed off the data channel.
///
/// Event types this engine does not consume deserialize into `Other` and
/// are ignored, so a newer server cannot break an older client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "session.created")]
    SessionCreated(SessionCreatedEvent),
    #[serde(rename = "session.updated")]
    SessionUpdated(SessionUpdatedEvent),
    #[serde(rename = "session.error")]
    SessionError(SessionErrorEvent),
    #[serde(rename = "session.end")]
    SessionEnd(SessionEndEvent),
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted(SpeechStartedEvent),
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped(SpeechStoppedEvent),
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta(AudioTranscriptDeltaEvent),
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone(AudioTranscriptDoneEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted(InputTranscriptionCompletedEvent),
    #[serde(rename = "response.created")]
    ResponseCreated(ResponseCreatedEvent),
    #[serde(rename = "response.done")]
    ResponseDone(ResponseDoneEvent),
    #[serde(rename = "response.cancelled")]
    ResponseCancelled(ResponseCancelledEvent),
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta(FunctionCallArgumentsDeltaEvent),
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone(FunctionCallArgumentsDoneEvent),
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated(RateLimitsUpdatedEvent),
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped(OutputAudioBufferStoppedEvent),
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_client_event_tagging() {
        let event = ClientEvent::ResponseCancel(ResponseCancelEvent::new());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "response.cancel");

        let event = ClientEvent::OutputAudioBufferClear(OutputAudioBufferClearEvent::new());
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"output_audio_buffer.clear"}"#);
    }

    #[test]
    fn test_server_event_round_trip() {
        let json = r#"{
            "type": "input_audio_buffer.speech_started",
            "event_id": "evt_1",
            "audio_start_ms": 120,
            "item_id": "item_1"
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::SpeechStarted(e) => {
                assert_eq!(e.audio_start_ms(), 120);
                assert_eq!(e.item_id(), "item_1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_server_event_is_other() {
        let json = r#"{"type":"response.output_item.added","event_id":"evt_9"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::Other));
    }

    #[test]
    fn test_function_call_done_without_name() {
        let json = r#"{
            "type": "response.function_call_arguments.done",
            "event_id": "evt_2",
            "call_id": "call_7",
            "arguments": "{\"level\":\"50\"}"
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::FunctionCallArgumentsDone(e) => {
                assert_eq!(e.call_id(), "call_7");
                assert!(e.name().is_none());
                assert_eq!(e.arguments(), r#"{"level":"50"}"#);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
