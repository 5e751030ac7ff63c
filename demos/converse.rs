use voicebridge::types::audio::Voice;
use voicebridge::types::session::SessionConfig;
use voicebridge::types::tools::FunctionTool;
use voicebridge::{EndpointConfig, EngineEvent, VoiceSession};

#[tokio::main]
async fn main() {
    dotenvy::dotenv_override().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let endpoint = EndpointConfig::from_env().expect("VOICEBRIDGE_API_KEY must be set");
    let session = VoiceSession::new(endpoint);

    session.register_tool(
        FunctionTool::new(
            "get_time",
            "Returns the current local time.",
            serde_json::json!({"type": "object", "properties": {}}),
        ),
        |_args| async {
            Ok(serde_json::json!({
                "time": now_timestamp(),
            }))
        },
    );

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Message(m) => println!("[{:?}] {}", m.role, m.content),
                EngineEvent::Transcript(t) if t.is_partial => print!("\r{}", t.text),
                EngineEvent::Conversation(c) => {
                    println!("-- {:?}: {}", c.phase, c.detail.unwrap_or_default())
                }
                _ => {}
            }
        }
    });

    let config = SessionConfig::builder()
        .with_voice(Voice::Alloy)
        .with_instructions("You are a friendly voice assistant. Keep answers short.")
        .build();
    session
        .start("demo-user", config)
        .await
        .expect("failed to start session");
    println!("Connected, say something or wait for the greeting.");

    session
        .prompt_assistant("Greet the user and tell them you can answer questions or give the time.")
        .await;

    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    session.end().await;
}

fn now_timestamp() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}s since epoch", secs)
}
