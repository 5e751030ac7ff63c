use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use voicebridge_utils::audio::rms;

use crate::state::{now_ms, EngineEvent, VoiceActivity};

/// Sampling cadence and speaking threshold for the local activity monitor.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub speaking_threshold: f32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            speaking_threshold: 0.02,
        }
    }
}

/// Measures microphone energy locally, independent of the remote
/// voice-activity detector. Emits one `VoiceActivity` sample per tick
/// over the captured frames received since the previous tick.
pub struct VoiceActivityMonitor;

impl VoiceActivityMonitor {
    pub(crate) fn spawn(
        mut frames: mpsc::Receiver<Vec<f32>>,
        settings: MonitorSettings,
        events: broadcast::Sender<EngineEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut window: Vec<f32> = Vec::new();
            let mut ticker = tokio::time::interval(settings.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    frame = frames.recv() => {
                        match frame {
                            Some(samples) => window.extend_from_slice(&samples),
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let volume = if window.is_empty() {
                            0.0
                        } else {
                            rms(&window).min(1.0)
                        };
                        window.clear();
                        let _ = events.send(EngineEvent::VoiceActivity(VoiceActivity {
                            volume,
                            is_speaking: volume > settings.speaking_threshold,
                            timestamp_ms: now_ms(),
                        }));
                    }
                }
            }
            tracing::debug!("voice activity monitor stopped");
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn emits_samples_and_flags_speech() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = broadcast::channel(32);
        let settings = MonitorSettings {
            interval: Duration::from_millis(10),
            speaking_threshold: 0.02,
        };
        let task = VoiceActivityMonitor::spawn(frame_rx, settings, event_tx);

        frame_tx.send(vec![0.5_f32; 480]).await.unwrap();
        let mut saw_speaking = false;
        for _ in 0..10 {
            if let Ok(EngineEvent::VoiceActivity(sample)) = event_rx.recv().await {
                if sample.is_speaking {
                    assert!(sample.volume > 0.02);
                    saw_speaking = true;
                    break;
                }
            }
        }
        assert!(saw_speaking);

        drop(frame_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn silence_reports_zero_volume() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = broadcast::channel(32);
        let settings = MonitorSettings {
            interval: Duration::from_millis(10),
            speaking_threshold: 0.02,
        };
        let task = VoiceActivityMonitor::spawn(frame_rx, settings, event_tx);

        let mut saw_silence = false;
        for _ in 0..10 {
            if let Ok(EngineEvent::VoiceActivity(sample)) = event_rx.recv().await {
                if !sample.is_speaking && sample.volume == 0.0 {
                    saw_silence = true;
                    break;
                }
            }
        }
        assert!(saw_silence);

        drop(frame_tx);
        task.await.unwrap();
    }
}
