use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::broadcast;
use voicebridge_types::events::client::{
    ConversationItemCreateEvent, OutputAudioBufferClearEvent, ResponseCancelEvent,
    ResponseCreateEvent, ResponseOptions, SessionUpdateEvent,
};
use voicebridge_types::session::SessionPayload;
use voicebridge_types::{ClientEvent, FunctionCallOutputItem, Item, MessageItem, MessageRole, ServerEvent};

use crate::channel::ControlChannel;
use crate::error::SessionError;
use crate::state::{
    now_ms, ConversationMessage, ConversationPhase, ConversationState, EngineEvent, LiveTranscript,
    SharedState, SpeechDetectionState,
};
use crate::tools::ToolInvocation;

/// Remote rejections that reflect a request we can simply stop caring
/// about, not a broken session.
const BENIGN_ERRORS: &[&str] = &[
    "Cannot update a conversation's voice",
    "Cancellation failed",
    "no active response",
    "Conversation already has an active response",
];

/// What the engine loop must do after an inbound event is applied.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Dispatch {
    None,
    ToolCall(ToolInvocation),
    SessionEnded,
}

/// Applies inbound control events to the conversation state and builds
/// outbound events. All writes check channel readiness first; an event
/// produced while the channel is closed is dropped with a warning, never
/// queued.
pub(crate) struct ProtocolHandler {
    channel: Arc<dyn ControlChannel>,
    events: broadcast::Sender<EngineEvent>,
    shared: Arc<SharedState>,
    speech: SpeechDetectionState,
    phase: ConversationPhase,
    transcript: String,
    transcript_item: Option<String>,
    response_in_progress: bool,
    pending_responses: VecDeque<ResponseCreateEvent>,
    answered_calls: HashSet<String>,
}

impl ProtocolHandler {
    pub(crate) fn new(
        channel: Arc<dyn ControlChannel>,
        events: broadcast::Sender<EngineEvent>,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            channel,
            events,
            shared,
            speech: SpeechDetectionState::default(),
            phase: ConversationPhase::Idle,
            transcript: String::new(),
            transcript_item: None,
            response_in_progress: false,
            pending_responses: VecDeque::new(),
            answered_calls: HashSet::new(),
        }
    }

    /// Swaps in the control channel of a freshly established transport.
    pub(crate) fn set_channel(&mut self, channel: Arc<dyn ControlChannel>) {
        self.channel = channel;
    }

    pub(crate) fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub(crate) fn response_in_progress(&self) -> bool {
        self.response_in_progress
    }

    pub(crate) fn speech(&self) -> &SpeechDetectionState {
        &self.speech
    }

    /// Parses and applies one raw frame from the control channel.
    pub(crate) async fn handle_raw(&mut self, raw: &str) -> Dispatch {
        match serde_json::from_str::<ServerEvent>(raw) {
            Ok(event) => self.apply(event).await,
            Err(e) => {
                let e = SessionError::ProtocolParse(e.to_string());
                tracing::warn!("dropping inbound frame: {e}");
                self.set_phase(ConversationPhase::Error, "Failed to parse server message");
                let _ = self.events.send(EngineEvent::Error(e.to_string()));
                Dispatch::None
            }
        }
    }

    pub(crate) async fn apply(&mut self, event: ServerEvent) -> Dispatch {
        match event {
            ServerEvent::SessionCreated(e) => {
                tracing::info!(session_id = ?e.session().id(), "session created");
                self.response_in_progress = false;
                self.pending_responses.clear();
                self.set_phase(ConversationPhase::Idle, "Session created");
            }
            ServerEvent::SessionUpdated(_) => {
                self.set_phase(ConversationPhase::Idle, "Session configured");
            }
            ServerEvent::SessionError(e) => {
                tracing::error!(code = ?e.error().code(), "session error: {}", e.error().message());
                self.set_phase(ConversationPhase::Error, e.error().message());
                let _ = self
                    .events
                    .send(EngineEvent::Error(e.error().message().to_string()));
            }
            ServerEvent::SessionEnd(_) => {
                self.set_phase(ConversationPhase::Idle, "Session ended");
                return Dispatch::SessionEnded;
            }
            ServerEvent::SpeechStarted(_) => {
                if !self.speech.user_speaking {
                    self.speech.user_speaking = true;
                    self.speech.speech_started_at = Some(now_ms());
                }
                self.emit_speech();
                self.set_phase(ConversationPhase::Listening, "Listening");
            }
            ServerEvent::SpeechStopped(_) => {
                if self.speech.user_speaking {
                    self.speech.user_speaking = false;
                    self.speech.speech_stopped_at = Some(now_ms());
                }
                self.emit_speech();
                self.set_phase(ConversationPhase::Processing, "Processing");
            }
            ServerEvent::AudioTranscriptDelta(e) => {
                self.transcript.push_str(e.delta());
                if self.transcript_item.is_none() {
                    self.transcript_item = Some(if e.item_id().is_empty() {
                        format!("assistant-transcript-{}", now_ms())
                    } else {
                        e.item_id().to_string()
                    });
                }
                if !self.speech.assistant_speaking {
                    self.speech.assistant_speaking = true;
                    self.emit_speech();
                }
                self.set_phase(ConversationPhase::Speaking, "Assistant speaking");
                let id = self.transcript_item.clone().unwrap_or_default();
                let _ = self.events.send(EngineEvent::Transcript(LiveTranscript {
                    id,
                    role: MessageRole::Assistant,
                    text: self.transcript.clone(),
                    is_partial: true,
                    timestamp_ms: now_ms(),
                }));
            }
            ServerEvent::AudioTranscriptDone(e) => {
                let text = if e.transcript().is_empty() {
                    std::mem::take(&mut self.transcript)
                } else {
                    self.transcript.clear();
                    e.transcript().to_string()
                };
                let id = self
                    .transcript_item
                    .take()
                    .unwrap_or_else(|| format!("assistant-transcript-{}", now_ms()));
                if !text.is_empty() {
                    let _ = self.events.send(EngineEvent::Transcript(LiveTranscript {
                        id: id.clone(),
                        role: MessageRole::Assistant,
                        text: text.clone(),
                        is_partial: false,
                        timestamp_ms: now_ms(),
                    }));
                    self.push_history(id, MessageRole::Assistant, text, true, false);
                }
            }
            ServerEvent::InputTranscriptionCompleted(e) => {
                let text = e.transcript().trim().to_string();
                if !text.is_empty() {
                    let id = if e.item_id().is_empty() {
                        format!("user-transcript-{}", now_ms())
                    } else {
                        e.item_id().to_string()
                    };
                    let _ = self.events.send(EngineEvent::Transcript(LiveTranscript {
                        id: id.clone(),
                        role: MessageRole::User,
                        text: text.clone(),
                        is_partial: false,
                        timestamp_ms: now_ms(),
                    }));
                    self.push_history(id, MessageRole::User, text, true, false);
                }
            }
            ServerEvent::ResponseCreated(e) => {
                tracing::debug!(response_id = ?e.response().id(), "response started");
                self.response_in_progress = true;
                self.speech.assistant_speaking = true;
                self.emit_speech();
                self.set_phase(ConversationPhase::Processing, "Generating response");
            }
            ServerEvent::ResponseDone(_) => {
                self.response_in_progress = false;
                self.speech.assistant_speaking = false;
                self.answered_calls.clear();
                self.emit_speech();
                self.set_phase(ConversationPhase::Idle, "Ready");
                self.flush_pending_response().await;
            }
            ServerEvent::ResponseCancelled(_) => {
                self.response_in_progress = false;
                self.speech.assistant_speaking = false;
                self.flush_interrupted_transcript();
                self.emit_speech();
                self.set_phase(ConversationPhase::Idle, "Response interrupted");
                self.flush_pending_response().await;
            }
            ServerEvent::OutputAudioBufferStopped(_) => {
                self.speech.assistant_speaking = false;
                self.emit_speech();
            }
            ServerEvent::FunctionCallArgumentsDelta(e) => {
                tracing::trace!(call_id = %e.call_id(), "function call arguments delta");
            }
            ServerEvent::FunctionCallArgumentsDone(e) => match e.name() {
                Some(name) => {
                    return Dispatch::ToolCall(ToolInvocation {
                        call_id: e.call_id().to_string(),
                        name: name.to_string(),
                        arguments: e.arguments().to_string(),
                    });
                }
                None => {
                    tracing::warn!(call_id = %e.call_id(), "function call without a name, ignoring");
                }
            },
            ServerEvent::Error(e) => {
                let message = e.error().message();
                if BENIGN_ERRORS.iter().any(|b| message.contains(b)) {
                    tracing::warn!("remote rejected request: {message}");
                } else {
                    tracing::error!(code = ?e.error().code(), "remote error: {message}");
                    self.set_phase(ConversationPhase::Error, message);
                    let _ = self.events.send(EngineEvent::Error(message.to_string()));
                }
            }
            ServerEvent::RateLimitsUpdated(e) => {
                tracing::debug!(limits = ?e.rate_limits(), "rate limits updated");
            }
            ServerEvent::Other => {
                tracing::trace!("ignoring unhandled control event");
            }
        }
        Dispatch::None
    }

    /// First write after the channel opens. Advertises the registered
    /// tool catalog alongside the session configuration.
    pub(crate) async fn send_session_update(&self, payload: SessionPayload) {
        self.send_event(ClientEvent::SessionUpdate(SessionUpdateEvent::new(payload)))
            .await;
    }

    /// Injects a typed user message and asks for a response.
    pub(crate) async fn send_user_text(&mut self, text: &str) {
        let item = MessageItem::builder()
            .with_role(MessageRole::User)
            .with_input_text(text)
            .build();
        self.send_event(ClientEvent::ConversationItemCreate(
            ConversationItemCreateEvent::new(Item::Message(item)),
        ))
        .await;
        self.create_response(ResponseCreateEvent::new()).await;
        self.push_history(
            format!("user-text-{}", now_ms()),
            MessageRole::User,
            text.to_string(),
            false,
            false,
        );
    }

    /// Injects assistant-authored text and asks the remote peer to voice it.
    pub(crate) async fn speak_assistant(&mut self, text: &str) {
        let item = MessageItem::builder()
            .with_role(MessageRole::Assistant)
            .with_text(text)
            .build();
        self.send_event(ClientEvent::ConversationItemCreate(
            ConversationItemCreateEvent::new(Item::Message(item)),
        ))
        .await;
        self.create_response(ResponseCreateEvent::new()).await;
        self.push_history(
            format!("assistant-text-{}", now_ms()),
            MessageRole::Assistant,
            text.to_string(),
            false,
            false,
        );
    }

    /// Asks for a spoken response steered by one-off instructions without
    /// adding anything to the conversation. Greetings and nudges go
    /// through here.
    pub(crate) async fn prompt_assistant(&mut self, instructions: &str) {
        let options = ResponseOptions::new()
            .with_modalities(vec!["text".to_string(), "audio".to_string()])
            .with_instructions(instructions);
        self.create_response(ResponseCreateEvent::new().with_options(options))
            .await;
    }

    /// Cancels the in-flight response and flushes queued remote audio,
    /// then resets the local speaking state without waiting for the
    /// remote acknowledgement.
    pub(crate) async fn interrupt(&mut self) {
        self.send_event(ClientEvent::ResponseCancel(ResponseCancelEvent::new()))
            .await;
        self.send_event(ClientEvent::OutputAudioBufferClear(
            OutputAudioBufferClearEvent::new(),
        ))
        .await;
        self.response_in_progress = false;
        self.speech.assistant_speaking = false;
        self.flush_interrupted_transcript();
        self.emit_speech();
        self.set_phase(ConversationPhase::Idle, "Response interrupted");
    }

    /// Keeps whatever the assistant managed to say before a cutoff as an
    /// interrupted history entry instead of losing it.
    fn flush_interrupted_transcript(&mut self) {
        let text = std::mem::take(&mut self.transcript);
        let id = self
            .transcript_item
            .take()
            .unwrap_or_else(|| format!("assistant-transcript-{}", now_ms()));
        if !text.is_empty() {
            self.push_history(id, MessageRole::Assistant, text, true, true);
        }
    }

    /// Answers a function call with its result and resumes the response.
    /// Each call id is answered at most once.
    pub(crate) async fn send_tool_result(&mut self, call_id: &str, result: serde_json::Value) {
        if !self.answered_calls.insert(call_id.to_string()) {
            tracing::warn!(call_id, "function call already answered, skipping");
            return;
        }
        let output = result.to_string();
        self.send_event(ClientEvent::ConversationItemCreate(
            ConversationItemCreateEvent::new(Item::FunctionCallOutput(FunctionCallOutputItem::new(
                call_id, output,
            ))),
        ))
        .await;
        self.create_response(ResponseCreateEvent::new()).await;
    }

    /// Answers a failed function call so the conversation can continue.
    pub(crate) async fn send_tool_error(&mut self, call_id: &str, message: &str) {
        if !self.answered_calls.insert(call_id.to_string()) {
            tracing::warn!(call_id, "function call already answered, skipping");
            return;
        }
        let output = serde_json::json!({ "error": message }).to_string();
        self.send_event(ClientEvent::ConversationItemCreate(
            ConversationItemCreateEvent::new(Item::FunctionCallOutput(FunctionCallOutputItem::new(
                call_id, output,
            ))),
        ))
        .await;
        self.create_response(ResponseCreateEvent::new()).await;
    }

    /// The remote peer rejects a `response.create` while a response is
    /// already running, so one requested mid-response is held back until
    /// the current response finishes or is cancelled.
    async fn create_response(&mut self, event: ResponseCreateEvent) {
        if self.response_in_progress {
            tracing::debug!("response already in progress, holding response.create");
            self.pending_responses.push_back(event);
            return;
        }
        self.send_event(ClientEvent::ResponseCreate(event)).await;
    }

    async fn flush_pending_response(&mut self) {
        if let Some(event) = self.pending_responses.pop_front() {
            tracing::debug!("sending held-back response.create");
            self.send_event(ClientEvent::ResponseCreate(event)).await;
        }
    }

    async fn send_event(&self, event: ClientEvent) {
        if !self.channel.is_open() {
            tracing::warn!("control channel is not open, dropping outbound event");
            return;
        }
        match serde_json::to_string(&event) {
            Ok(text) => {
                if let Err(e) = self.channel.send(text).await {
                    tracing::error!("failed to send control event: {e}");
                }
            }
            Err(e) => tracing::error!("failed to serialize control event: {e}"),
        }
    }

    fn set_phase(&mut self, phase: ConversationPhase, detail: &str) {
        self.phase = phase;
        let _ = self.events.send(EngineEvent::Conversation(ConversationState {
            phase,
            detail: Some(detail.to_string()),
        }));
    }

    fn emit_speech(&self) {
        let _ = self.events.send(EngineEvent::Speech(self.speech.clone()));
    }

    fn push_history(
        &self,
        id: String,
        role: MessageRole,
        content: String,
        is_transcript: bool,
        interrupted: bool,
    ) {
        let message = ConversationMessage {
            id,
            role,
            content,
            timestamp_ms: now_ms(),
            is_transcript,
            interrupted,
        };
        self.shared.history.lock().unwrap().push(message.clone());
        let _ = self.events.send(EngineEvent::Message(message));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    struct RecordingChannel {
        open: std::sync::atomic::AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                open: std::sync::atomic::AtomicBool::new(open),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|s| serde_json::from_str(s).unwrap())
                .collect()
        }
    }

    impl ControlChannel for RecordingChannel {
        fn is_open(&self) -> bool {
            self.open.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn send(&self, text: String) -> BoxFuture<'static, Result<(), crate::SessionError>> {
            self.sent.lock().unwrap().push(text);
            Box::pin(async { Ok(()) })
        }
    }

    fn handler_with(
        channel: Arc<RecordingChannel>,
    ) -> (ProtocolHandler, Arc<SharedState>, broadcast::Receiver<EngineEvent>) {
        let (events, rx) = broadcast::channel(64);
        let shared = Arc::new(SharedState::default());
        (
            ProtocolHandler::new(channel, events, shared.clone()),
            shared,
            rx,
        )
    }

    async fn apply_raw(handler: &mut ProtocolHandler, raw: &str) -> Dispatch {
        handler.handle_raw(raw).await
    }

    #[tokio::test]
    async fn speech_events_bracket_user_turn() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel);

        apply_raw(
            &mut handler,
            r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":10,"item_id":"it1"}"#,
        ).await;
        assert!(handler.speech().user_speaking);
        assert_eq!(handler.phase(), ConversationPhase::Listening);

        // Repeats are idempotent.
        apply_raw(
            &mut handler,
            r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":12,"item_id":"it1"}"#,
        ).await;
        let started_at = handler.speech().speech_started_at;
        assert!(started_at.is_some());

        apply_raw(
            &mut handler,
            r#"{"type":"input_audio_buffer.speech_stopped","audio_end_ms":900,"item_id":"it1"}"#,
        ).await;
        assert!(!handler.speech().user_speaking);
        assert_eq!(handler.phase(), ConversationPhase::Processing);
        assert_eq!(handler.speech().speech_started_at, started_at);
    }

    #[tokio::test]
    async fn transcript_deltas_accumulate_into_one_history_entry() {
        let channel = RecordingChannel::new(true);
        let (mut handler, shared, _rx) = handler_with(channel);

        for delta in ["Hel", "lo ", "there"] {
            apply_raw(
                &mut handler,
                &format!(
                    r#"{{"type":"response.audio_transcript.delta","item_id":"item-9","delta":"{delta}"}}"#
                ),
            ).await;
        }
        assert_eq!(handler.phase(), ConversationPhase::Speaking);
        assert!(handler.speech().assistant_speaking);

        apply_raw(
            &mut handler,
            r#"{"type":"response.audio_transcript.done","item_id":"item-9","transcript":""}"#,
        ).await;

        let history = shared.history.lock().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello there");
        assert_eq!(history[0].role, MessageRole::Assistant);
        assert!(history[0].is_transcript);
    }

    #[tokio::test]
    async fn response_lifecycle_tracks_assistant_speaking() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel);

        apply_raw(&mut handler, r#"{"type":"response.created","response":{"id":"r1"}}"#).await;
        assert!(handler.speech().assistant_speaking);
        assert!(handler.response_in_progress());

        apply_raw(&mut handler, r#"{"type":"response.done","response":{"id":"r1"}}"#).await;
        assert!(!handler.response_in_progress());
        assert!(!handler.speech().assistant_speaking);
        assert_eq!(handler.phase(), ConversationPhase::Idle);

        // Late buffer drain is harmless.
        apply_raw(&mut handler, r#"{"type":"output_audio_buffer.stopped"}"#).await;
        assert!(!handler.speech().assistant_speaking);
    }

    #[tokio::test]
    async fn function_call_done_yields_dispatch() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel);

        let dispatch = apply_raw(
            &mut handler,
            r#"{"type":"response.function_call_arguments.done","call_id":"c1","name":"lookup","arguments":"{\"level\":\"50\"}"}"#,
        ).await;
        assert_eq!(
            dispatch,
            Dispatch::ToolCall(ToolInvocation {
                call_id: "c1".to_string(),
                name: "lookup".to_string(),
                arguments: "{\"level\":\"50\"}".to_string(),
            })
        );

        // Without a name there is nothing to run.
        let dispatch = apply_raw(
            &mut handler,
            r#"{"type":"response.function_call_arguments.done","call_id":"c2","arguments":"{}"}"#,
        ).await;
        assert_eq!(dispatch, Dispatch::None);
    }

    #[tokio::test]
    async fn tool_result_is_item_plus_response_create_and_never_repeats() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel.clone());

        handler
            .send_tool_result("c1", serde_json::json!({"ok": true}))
            .await;
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["type"], "conversation.item.create");
        assert_eq!(sent[0]["item"]["type"], "function_call_output");
        assert_eq!(sent[0]["item"]["call_id"], "c1");
        assert_eq!(sent[0]["item"]["output"], "{\"ok\":true}");
        assert_eq!(sent[1]["type"], "response.create");

        handler
            .send_tool_result("c1", serde_json::json!({"ok": false}))
            .await;
        assert_eq!(channel.sent().len(), 2);
    }

    #[tokio::test]
    async fn tool_error_reports_failure_payload() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel.clone());

        handler.send_tool_error("c9", "boom").await;
        let sent = channel.sent();
        assert_eq!(sent[0]["item"]["output"], "{\"error\":\"boom\"}");
        assert_eq!(sent[1]["type"], "response.create");
    }

    #[tokio::test]
    async fn closed_channel_drops_outbound_events() {
        let channel = RecordingChannel::new(false);
        let (mut handler, shared, _rx) = handler_with(channel.clone());

        handler.send_user_text("hello").await;
        handler.interrupt().await;
        assert!(channel.sent().is_empty());
        // Local bookkeeping still happened.
        assert_eq!(shared.history.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn interrupt_resets_speaking_state_locally() {
        let channel = RecordingChannel::new(true);
        let (mut handler, shared, _rx) = handler_with(channel.clone());

        apply_raw(&mut handler, r#"{"type":"response.created","response":{"id":"r1"}}"#).await;
        apply_raw(
            &mut handler,
            r#"{"type":"response.audio_transcript.delta","item_id":"i1","delta":"partial"}"#,
        ).await;

        handler.interrupt().await;
        assert!(!handler.speech().assistant_speaking);
        assert!(!handler.response_in_progress());
        assert_eq!(handler.phase(), ConversationPhase::Idle);

        let sent = channel.sent();
        assert_eq!(sent[0]["type"], "response.cancel");
        assert_eq!(sent[1]["type"], "output_audio_buffer.clear");

        // The cut-off utterance is kept, flagged as interrupted.
        let history = shared.history.lock().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "partial");
        assert!(history[0].interrupted);
    }

    #[tokio::test]
    async fn benign_remote_errors_do_not_enter_error_phase() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel);

        apply_raw(&mut handler, r#"{"type":"response.created","response":{"id":"r1"}}"#).await;
        apply_raw(
            &mut handler,
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"Cancellation failed: no active response"}}"#,
        ).await;
        assert_ne!(handler.phase(), ConversationPhase::Error);

        apply_raw(
            &mut handler,
            r#"{"type":"error","error":{"type":"server_error","message":"something broke"}}"#,
        ).await;
        assert_eq!(handler.phase(), ConversationPhase::Error);
    }

    #[tokio::test]
    async fn unknown_and_malformed_events_are_survivable() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel);

        assert_eq!(
            apply_raw(&mut handler, r#"{"type":"some.future.event","payload":{}}"#).await,
            Dispatch::None
        );

        assert_eq!(apply_raw(&mut handler, "not json").await, Dispatch::None);
        assert_eq!(handler.phase(), ConversationPhase::Error);

        // The next well-formed event recovers the phase.
        apply_raw(&mut handler, r#"{"type":"session.updated","session":{}}"#).await;
        assert_eq!(handler.phase(), ConversationPhase::Idle);
    }

    #[tokio::test]
    async fn active_response_rejection_is_benign() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel);

        apply_raw(
            &mut handler,
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"conversation_already_has_active_response","message":"Conversation already has an active response in progress"}}"#,
        ).await;
        assert_ne!(handler.phase(), ConversationPhase::Error);
    }

    #[tokio::test]
    async fn response_create_is_held_until_active_response_finishes() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel.clone());

        apply_raw(&mut handler, r#"{"type":"response.created","response":{"id":"r1"}}"#).await;
        handler.send_user_text("interject").await;

        // The item goes out immediately, the response request does not.
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "conversation.item.create");

        apply_raw(&mut handler, r#"{"type":"response.done","response":{"id":"r1"}}"#).await;
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["type"], "response.create");
    }

    #[tokio::test]
    async fn cancelled_response_releases_held_response_create() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel.clone());

        apply_raw(&mut handler, r#"{"type":"response.created","response":{"id":"r1"}}"#).await;
        handler.send_tool_result("c1", serde_json::json!({"ok": true})).await;
        assert_eq!(channel.sent().len(), 1);

        apply_raw(&mut handler, r#"{"type":"response.cancelled","response":{"id":"r1"}}"#).await;
        let sent = channel.sent();
        assert_eq!(sent.last().unwrap()["type"], "response.create");
    }

    #[tokio::test]
    async fn answered_call_guard_resets_between_responses() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel.clone());

        handler
            .send_tool_result("c1", serde_json::json!({"n": 1}))
            .await;
        assert_eq!(channel.sent().len(), 2);

        apply_raw(&mut handler, r#"{"type":"response.done","response":{"id":"r1"}}"#).await;

        // A new response may legitimately reuse a call id.
        handler
            .send_tool_result("c1", serde_json::json!({"n": 2}))
            .await;
        assert_eq!(channel.sent().len(), 4);
    }

    #[tokio::test]
    async fn prompt_carries_one_off_instructions() {
        let channel = RecordingChannel::new(true);
        let (mut handler, shared, _rx) = handler_with(channel.clone());

        handler.prompt_assistant("Greet the user warmly.").await;
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "response.create");
        assert_eq!(sent[0]["response"]["instructions"], "Greet the user warmly.");
        // Nothing was added to the conversation itself.
        assert!(shared.history.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_end_requests_teardown() {
        let channel = RecordingChannel::new(true);
        let (mut handler, _, _rx) = handler_with(channel);
        assert_eq!(
            apply_raw(&mut handler, r#"{"type":"session.end"}"#).await,
            Dispatch::SessionEnded
        );
    }
}
