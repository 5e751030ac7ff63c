use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use voicebridge_types::audio::Voice;
use voicebridge_types::session::{SessionConfig, SessionPayload};
use voicebridge_types::tools::FunctionTool;
use voicebridge_utils::device::capture_input;

use crate::credentials::{CredentialNegotiator, EndpointConfig};
use crate::error::SessionError;
use crate::monitor::{MonitorSettings, VoiceActivityMonitor};
use crate::protocol::{Dispatch, ProtocolHandler};
use crate::reconnect::ReconnectPolicy;
use crate::state::{
    ConnectionQuality, ConversationMessage, EngineEvent, SessionStatus, SharedState,
};
use crate::tools::{ToolBridge, ToolOutcome, ToolRegistry};
use crate::transport::Transport;

const EVENT_BUS_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything the engine task reacts to, funneled through one queue so
/// transport callbacks, tool outcomes, and API calls stay ordered.
#[derive(Debug)]
pub(crate) enum EngineInput {
    ChannelOpen,
    ChannelClosed,
    Inbound(String),
    TransportUp { generation: u64 },
    TransportLost { generation: u64, reason: String },
    Command(Command),
}

#[derive(Debug)]
pub(crate) enum Command {
    SendUserText(String),
    SpeakAssistant(String),
    PromptAssistant(String),
    Interrupt,
    UpdateSession(SessionConfig),
    SetMicrophoneMuted(bool),
    ChangeMicrophone(String),
    Shutdown,
}

struct Active {
    inputs: mpsc::Sender<EngineInput>,
    engine: JoinHandle<()>,
}

/// Handle to one voice session.
///
/// `start` runs credential minting, microphone capture, and transport
/// establishment, then hands the connection to a background engine task.
/// Every other method is a cheap message to that task; observers follow
/// along through the broadcast stream returned by `subscribe`.
pub struct VoiceSession {
    negotiator: CredentialNegotiator,
    registry: Arc<ToolRegistry>,
    policy: ReconnectPolicy,
    monitor_settings: MonitorSettings,
    input_device: Option<String>,
    events: broadcast::Sender<EngineEvent>,
    shared: Arc<SharedState>,
    active: Mutex<Option<Active>>,
    remote_audio: std::sync::Mutex<Option<mpsc::Receiver<bytes::Bytes>>>,
}

impl VoiceSession {
    pub fn new(config: EndpointConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            negotiator: CredentialNegotiator::new(config),
            registry: Arc::new(ToolRegistry::new()),
            policy: ReconnectPolicy::default(),
            monitor_settings: MonitorSettings::default(),
            input_device: None,
            events,
            shared: Arc::new(SharedState::default()),
            active: Mutex::new(None),
            remote_audio: std::sync::Mutex::new(None),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_monitor_settings(mut self, settings: MonitorSettings) -> Self {
        self.monitor_settings = settings;
        self
    }

    /// Captures from the named input device instead of the default one.
    pub fn with_input_device(mut self, name: &str) -> Self {
        self.input_device = Some(name.to_string());
        self
    }

    /// Registers a tool before the session starts. The catalog is
    /// advertised in the first `session.update` after the channel opens.
    pub fn register_tool<F, Fut>(&self, tool: FunctionTool, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        self.registry.register(tool, handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status().connected
    }

    pub fn history(&self) -> Vec<ConversationMessage> {
        self.shared.history.lock().unwrap().clone()
    }

    /// Raw payloads of the remote audio track, available after a session
    /// with audio enabled starts. Decoding and playback are the
    /// embedding application's concern. The stream survives reconnects.
    pub fn take_remote_audio(&self) -> Option<mpsc::Receiver<bytes::Bytes>> {
        self.remote_audio.lock().unwrap().take()
    }

    /// Brings the session up. A second call while a session is active is
    /// a logged no-op; resources acquired before a failure are released
    /// before the error is returned.
    pub async fn start(&self, user_id: &str, config: SessionConfig) -> Result<(), SessionError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            tracing::warn!("session already active, ignoring start");
            return Ok(());
        }

        let voice = config.voice().cloned().unwrap_or(Voice::Alloy);
        let credential = self.negotiator.mint(&voice).await?;

        let mut capture = None;
        let mut monitor = None;
        let mut audio_tx = None;
        let mut frame_tx = None;
        if config.audio_enabled() {
            let (tx, frame_rx) = mpsc::channel(64);
            capture = Some(
                capture_input(self.input_device.clone(), tx.clone())
                    .map_err(|e| SessionError::MicrophoneAccess(e.to_string()))?,
            );
            frame_tx = Some(tx);
            if config.vad_enabled() {
                monitor = Some(VoiceActivityMonitor::spawn(
                    frame_rx,
                    self.monitor_settings,
                    self.events.clone(),
                ));
            }
            let (tx, rx) = mpsc::channel(256);
            audio_tx = Some(tx);
            *self.remote_audio.lock().unwrap() = Some(rx);
        }

        let (input_tx, input_rx) = mpsc::channel(256);
        let transport = match Transport::establish(
            &self.negotiator,
            &credential,
            audio_tx.clone(),
            input_tx.clone(),
        )
        .await
        {
            Ok(transport) => transport,
            Err(e) => {
                if let Some(capture) = capture.take() {
                    capture.stop();
                }
                if let Some(monitor) = monitor.take() {
                    monitor.abort();
                }
                *self.remote_audio.lock().unwrap() = None;
                return Err(e);
            }
        };

        self.shared.history.lock().unwrap().clear();
        {
            let mut status = self.shared.status.lock().unwrap();
            *status = SessionStatus {
                connected: false,
                active: true,
                session_id: Some(credential.session_id().to_string()),
                user_id: Some(user_id.to_string()),
                quality: ConnectionQuality::Good,
            };
        }
        let _ = self.events.send(EngineEvent::Status(self.status()));

        let (outcome_tx, outcome_rx) = mpsc::channel(64);
        let handler = ProtocolHandler::new(
            transport.control_channel(),
            self.events.clone(),
            self.shared.clone(),
        );
        let engine = Engine {
            inputs: input_rx,
            inputs_tx: input_tx.clone(),
            outcomes: outcome_rx,
            handler,
            bridge: ToolBridge::new(self.registry.clone(), outcome_tx),
            negotiator: self.negotiator.clone(),
            registry: self.registry.clone(),
            policy: self.policy,
            config,
            events: self.events.clone(),
            shared: self.shared.clone(),
            transport: Some(transport),
            audio_tx,
            frame_tx,
            capture,
            monitor,
        };
        let engine = tokio::spawn(engine.run());

        *active = Some(Active {
            inputs: input_tx,
            engine,
        });
        Ok(())
    }

    /// Injects a typed user message into the conversation.
    pub async fn send_text(&self, text: &str) {
        self.send_command(Command::SendUserText(text.to_string()))
            .await;
    }

    /// Has the assistant voice a message the application authored.
    pub async fn speak_assistant(&self, text: &str) {
        self.send_command(Command::SpeakAssistant(text.to_string()))
            .await;
    }

    /// Asks the assistant to respond following one-off instructions that
    /// are not added to the conversation, e.g. an opening greeting.
    pub async fn prompt_assistant(&self, instructions: &str) {
        self.send_command(Command::PromptAssistant(instructions.to_string()))
            .await;
    }

    /// Silences the microphone without stopping capture. Useful for echo
    /// prevention while remote audio is playing.
    pub async fn set_microphone_muted(&self, muted: bool) {
        self.send_command(Command::SetMicrophoneMuted(muted)).await;
    }

    /// Switches capture to the named input device mid-session. The mute
    /// state carries over.
    pub async fn change_microphone(&self, name: &str) {
        self.send_command(Command::ChangeMicrophone(name.to_string()))
            .await;
    }

    /// Cuts off the in-flight response and flushes queued remote audio.
    pub async fn interrupt(&self) {
        self.send_command(Command::Interrupt).await;
    }

    /// Applies a new session configuration mid-session.
    pub async fn update_session(&self, config: SessionConfig) {
        self.send_command(Command::UpdateSession(config)).await;
    }

    /// Tears the session down. Safe to call at any time, including when
    /// no session is active or after the engine already stopped.
    pub async fn end(&self) {
        let taken = self.active.lock().await.take();
        let Some(active) = taken else {
            tracing::debug!("end called with no active session");
            return;
        };
        if active
            .inputs
            .send(EngineInput::Command(Command::Shutdown))
            .await
            .is_err()
        {
            tracing::debug!("engine already stopped");
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, active.engine)
            .await
            .is_err()
        {
            tracing::warn!("engine did not stop within the shutdown grace period");
        }
    }

    async fn send_command(&self, command: Command) {
        let inputs = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| active.inputs.clone());
        match inputs {
            Some(tx) => {
                if tx.send(EngineInput::Command(command)).await.is_err() {
                    tracing::warn!("session engine stopped, dropping command");
                }
            }
            None => tracing::warn!("no active session, dropping command"),
        }
    }
}

enum ReconnectOutcome {
    Reconnected,
    GaveUp,
    ShutDown,
}

/// The background task that owns the transport and conversation state.
struct Engine {
    inputs: mpsc::Receiver<EngineInput>,
    inputs_tx: mpsc::Sender<EngineInput>,
    outcomes: mpsc::Receiver<ToolOutcome>,
    handler: ProtocolHandler,
    bridge: ToolBridge,
    negotiator: CredentialNegotiator,
    registry: Arc<ToolRegistry>,
    policy: ReconnectPolicy,
    config: SessionConfig,
    events: broadcast::Sender<EngineEvent>,
    shared: Arc<SharedState>,
    transport: Option<Transport>,
    audio_tx: Option<mpsc::Sender<bytes::Bytes>>,
    frame_tx: Option<mpsc::Sender<Vec<f32>>>,
    capture: Option<voicebridge_utils::device::CaptureHandle>,
    monitor: Option<JoinHandle<()>>,
}

impl Engine {
    async fn run(mut self) {
        loop {
            tokio::select! {
                input = self.inputs.recv() => {
                    match input {
                        Some(input) => {
                            if !self.handle_input(input).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(outcome) = self.outcomes.recv() => {
                    self.handle_outcome(outcome).await;
                }
            }
        }
        self.teardown().await;
    }

    async fn handle_input(&mut self, input: EngineInput) -> bool {
        match input {
            EngineInput::ChannelOpen => {
                // First write after the channel opens.
                self.handler.send_session_update(self.payload()).await;
            }
            EngineInput::ChannelClosed => {
                tracing::debug!("control channel closed");
            }
            EngineInput::Inbound(raw) => match self.handler.handle_raw(&raw).await {
                Dispatch::ToolCall(invocation) => self.bridge.dispatch(invocation),
                Dispatch::SessionEnded => {
                    tracing::info!("remote peer ended the session");
                    return false;
                }
                Dispatch::None => {}
            },
            EngineInput::TransportUp { generation } => {
                if self.current_generation() == Some(generation) {
                    let mut status = self.shared.status.lock().unwrap();
                    status.connected = true;
                    status.quality = ConnectionQuality::Excellent;
                    drop(status);
                    self.emit_status();
                }
            }
            EngineInput::TransportLost { generation, reason } => {
                if self.current_generation() != Some(generation) {
                    tracing::debug!(generation, "ignoring loss signal from stale transport");
                    return true;
                }
                tracing::warn!("transport lost: {reason}");
                match self.reconnect().await {
                    ReconnectOutcome::Reconnected => {}
                    ReconnectOutcome::ShutDown => return false,
                    ReconnectOutcome::GaveUp => {
                        let e = SessionError::ReconnectionExhausted {
                            attempts: self.policy.max_attempts,
                        };
                        tracing::error!("giving up on session: {e}");
                        let _ = self.events.send(EngineEvent::ConnectionLost {
                            attempts: self.policy.max_attempts,
                        });
                        let _ = self.events.send(EngineEvent::Error(e.to_string()));
                        return false;
                    }
                }
            }
            EngineInput::Command(command) => return self.handle_command(command).await,
        }
        true
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::SendUserText(text) => self.handler.send_user_text(&text).await,
            Command::SpeakAssistant(text) => self.handler.speak_assistant(&text).await,
            Command::PromptAssistant(instructions) => {
                self.handler.prompt_assistant(&instructions).await
            }
            Command::Interrupt => self.handler.interrupt().await,
            Command::UpdateSession(config) => {
                self.config = config;
                self.handler.send_session_update(self.payload()).await;
            }
            Command::SetMicrophoneMuted(muted) => match &self.capture {
                Some(capture) => capture.set_muted(muted),
                None => tracing::warn!("no microphone capture running, ignoring mute"),
            },
            Command::ChangeMicrophone(name) => self.change_microphone(name),
            Command::Shutdown => return false,
        }
        true
    }

    /// Restarts capture on the named device, keeping the current mute
    /// state. On failure the old capture is already gone; the session
    /// stays up without a microphone and the error is reported.
    fn change_microphone(&mut self, name: String) {
        let Some(frame_tx) = self.frame_tx.clone() else {
            tracing::warn!("audio is disabled, ignoring microphone change");
            return;
        };
        let muted = self.capture.as_ref().is_some_and(|c| c.is_muted());
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        match capture_input(Some(name), frame_tx) {
            Ok(capture) => {
                capture.set_muted(muted);
                self.capture = Some(capture);
            }
            Err(e) => {
                let e = SessionError::MicrophoneAccess(e.to_string());
                tracing::error!("{e}");
                let _ = self.events.send(EngineEvent::Error(e.to_string()));
            }
        }
    }

    async fn handle_outcome(&mut self, outcome: ToolOutcome) {
        self.bridge.complete(&outcome.call_id);
        match outcome.result {
            Ok(value) => self.handler.send_tool_result(&outcome.call_id, value).await,
            Err(message) => {
                let e = SessionError::ToolExecution(message.clone());
                tracing::warn!(call_id = %outcome.call_id, "{e}");
                let _ = self.events.send(EngineEvent::Error(e.to_string()));
                self.handler
                    .send_tool_error(&outcome.call_id, &message)
                    .await;
            }
        }
    }

    /// Bounded recovery loop. The old transport is torn down first so at
    /// most one connection exists at a time; the attempt counter starts
    /// fresh on every loss because success resets it implicitly. A
    /// shutdown command interrupts the backoff wait immediately.
    async fn reconnect(&mut self) -> ReconnectOutcome {
        {
            let mut status = self.shared.status.lock().unwrap();
            status.connected = false;
            status.quality = ConnectionQuality::Poor;
        }
        self.emit_status();
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if attempt > self.policy.max_attempts {
                return ReconnectOutcome::GaveUp;
            }
            let delay = self.policy.delay_for(attempt);
            tracing::info!(attempt, ?delay, "reconnecting after transport loss");
            let deadline = tokio::time::sleep(delay);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    input = self.inputs.recv() => match input {
                        Some(EngineInput::Command(Command::Shutdown)) | None => {
                            return ReconnectOutcome::ShutDown;
                        }
                        Some(input) => {
                            tracing::debug!(?input, "dropping input while reconnecting");
                        }
                    }
                }
            }
            match self.try_reconnect().await {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected");
                    return ReconnectOutcome::Reconnected;
                }
                Err(e) => tracing::warn!(attempt, "reconnection attempt failed: {e}"),
            }
        }
    }

    async fn try_reconnect(&mut self) -> Result<(), SessionError> {
        let voice = self.config.voice().cloned().unwrap_or(Voice::Alloy);
        let credential = self.negotiator.mint(&voice).await?;
        let transport = Transport::establish(
            &self.negotiator,
            &credential,
            self.audio_tx.clone(),
            self.inputs_tx.clone(),
        )
        .await?;
        self.handler.set_channel(transport.control_channel());
        self.transport = Some(transport);
        {
            let mut status = self.shared.status.lock().unwrap();
            status.connected = true;
            status.quality = ConnectionQuality::Good;
            status.session_id = Some(credential.session_id().to_string());
        }
        self.emit_status();
        Ok(())
    }

    /// Release order: microphone first so no more frames arrive, then
    /// the control channel and peer connection, then the local tasks.
    async fn teardown(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        self.bridge.abort_all();
        {
            let mut status = self.shared.status.lock().unwrap();
            status.connected = false;
            status.active = false;
            status.quality = ConnectionQuality::Good;
        }
        self.emit_status();
        tracing::info!("session ended");
    }

    fn current_generation(&self) -> Option<u64> {
        self.transport.as_ref().map(Transport::generation)
    }

    fn payload(&self) -> SessionPayload {
        let mut payload = self.config.to_payload();
        if payload.tools().is_empty() {
            payload = payload.with_tools(self.registry.catalog());
        }
        payload
    }

    fn emit_status(&self) {
        let status = self.shared.status.lock().unwrap().clone();
        let _ = self.events.send(EngineEvent::Status(status));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::ControlChannel;
    use futures::future::BoxFuture;

    fn session() -> VoiceSession {
        VoiceSession::new(EndpointConfig::new("test-key"))
    }

    struct NullChannel;

    impl ControlChannel for NullChannel {
        fn is_open(&self) -> bool {
            false
        }

        fn send(&self, _text: String) -> BoxFuture<'static, Result<(), SessionError>> {
            Box::pin(async { Ok(()) })
        }
    }

    /// An engine with no live transport whose credential endpoint can
    /// never be reached, so every reconnection attempt fails.
    fn engine(policy: ReconnectPolicy) -> (Engine, mpsc::Sender<EngineInput>) {
        let (input_tx, input_rx) = mpsc::channel(16);
        let (outcome_tx, outcome_rx) = mpsc::channel(16);
        let (events, _) = broadcast::channel(16);
        let shared = Arc::new(SharedState::default());
        let registry = Arc::new(ToolRegistry::new());
        let negotiator = CredentialNegotiator::new(
            EndpointConfig::new("test-key").with_sessions_url("http://127.0.0.1:9/sessions"),
        );
        let handler = ProtocolHandler::new(Arc::new(NullChannel), events.clone(), shared.clone());
        let engine = Engine {
            inputs: input_rx,
            inputs_tx: input_tx.clone(),
            outcomes: outcome_rx,
            handler,
            bridge: ToolBridge::new(registry.clone(), outcome_tx),
            negotiator,
            registry,
            policy,
            config: SessionConfig::builder().build(),
            events,
            shared,
            transport: None,
            audio_tx: None,
            frame_tx: None,
            capture: None,
            monitor: None,
        };
        (engine, input_tx)
    }

    #[test]
    fn fresh_session_reports_inactive_status() {
        let session = session();
        let status = session.status();
        assert!(!status.connected);
        assert!(!status.active);
        assert!(status.session_id.is_none());
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn commands_without_active_session_are_dropped() {
        let session = session();
        session.send_text("hello").await;
        session.interrupt().await;
        session.prompt_assistant("greet").await;
        session.set_microphone_muted(true).await;
        session.change_microphone("usb-mic").await;
        session
            .update_session(SessionConfig::builder().build())
            .await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn end_is_idempotent_without_active_session() {
        let session = session();
        session.end().await;
        session.end().await;
        assert!(!session.status().active);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_bounded_doubling_backoff() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        };
        let (mut engine, _input_tx) = engine(policy);

        let started = tokio::time::Instant::now();
        let outcome = engine.reconnect().await;
        assert!(matches!(outcome, ReconnectOutcome::GaveUp));

        // Three attempts waited 10, 20 and 40ms before giving up.
        assert!(started.elapsed() >= Duration::from_millis(70));
        let status = engine.shared.status.lock().unwrap();
        assert!(!status.connected);
        assert_eq!(status.quality, ConnectionQuality::Poor);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_reconnect_backoff() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
        };
        let (mut engine, input_tx) = engine(policy);
        input_tx
            .send(EngineInput::Command(Command::Shutdown))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let outcome = engine.reconnect().await;
        assert!(matches!(outcome, ReconnectOutcome::ShutDown));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn stale_transport_loss_does_not_trigger_recovery() {
        let (mut engine, _input_tx) = engine(ReconnectPolicy::default());
        let mut events = engine.events.subscribe();

        // No live transport, so any generation is stale; the engine keeps
        // running and reports nothing.
        let keep_running = engine
            .handle_input(EngineInput::TransportLost {
                generation: 7,
                reason: "stale".to_string(),
            })
            .await;
        assert!(keep_running);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn subscribers_each_get_their_own_stream() {
        let session = session();
        let mut a = session.subscribe();
        let mut b = session.subscribe();
        let _ = session.events.send(EngineEvent::Error("x".to_string()));
        assert!(matches!(a.recv().await, Ok(EngineEvent::Error(_))));
        assert!(matches!(b.recv().await, Ok(EngineEvent::Error(_))));
    }
}
