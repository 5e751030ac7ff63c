use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::channel::ControlChannel;
use crate::credentials::{CredentialNegotiator, EphemeralCredential};
use crate::error::SessionError;
use crate::session::EngineInput;

pub(crate) const CONTROL_CHANNEL_LABEL: &str = "realtime-channel";
const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// One established peer connection plus its control data channel.
///
/// Each `Transport` carries a generation number so the engine can tell
/// signals from a torn-down connection apart from signals belonging to
/// its replacement.
pub(crate) struct Transport {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    generation: u64,
}

impl Transport {
    /// Runs the full connection sequence. The control data channel is
    /// created before the offer so the remote answer includes it; the
    /// offer is only sent out once ICE gathering has completed.
    ///
    /// When `remote_audio` is set, an outbound audio track is negotiated
    /// and raw payloads of the remote track are forwarded to it. The
    /// same sender can be reused across reconnects so the consumer
    /// keeps one stream for the life of the session.
    pub(crate) async fn establish(
        negotiator: &CredentialNegotiator,
        credential: &EphemeralCredential,
        remote_audio: Option<mpsc::Sender<Bytes>>,
        inputs: mpsc::Sender<EngineInput>,
    ) -> Result<Self, SessionError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![STUN_SERVER.to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| SessionError::Negotiation(e.to_string()))?,
        );

        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        match Self::negotiate(pc.clone(), negotiator, credential, remote_audio, generation, inputs)
            .await
        {
            Ok(transport) => Ok(transport),
            Err(e) => {
                let _ = pc.close().await;
                Err(e)
            }
        }
    }

    async fn negotiate(
        pc: Arc<RTCPeerConnection>,
        negotiator: &CredentialNegotiator,
        credential: &EphemeralCredential,
        remote_audio: Option<mpsc::Sender<Bytes>>,
        generation: u64,
        inputs: mpsc::Sender<EngineInput>,
    ) -> Result<Self, SessionError> {
        {
            let inputs = inputs.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                tracing::debug!(?state, generation, "peer connection state changed");
                let inputs = inputs.clone();
                Box::pin(async move {
                    match state {
                        RTCPeerConnectionState::Connected => {
                            let _ = inputs.send(EngineInput::TransportUp { generation }).await;
                        }
                        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                            let _ = inputs
                                .send(EngineInput::TransportLost {
                                    generation,
                                    reason: format!("peer connection {state}"),
                                })
                                .await;
                        }
                        _ => {}
                    }
                })
            }));
        }

        let dc = pc
            .create_data_channel(
                CONTROL_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        {
            let inputs = inputs.clone();
            dc.on_open(Box::new(move || {
                tracing::info!("control channel open");
                let inputs = inputs.clone();
                Box::pin(async move {
                    let _ = inputs.send(EngineInput::ChannelOpen).await;
                })
            }));
        }
        {
            let inputs = inputs.clone();
            dc.on_close(Box::new(move || {
                tracing::info!("control channel closed");
                let inputs = inputs.clone();
                Box::pin(async move {
                    let _ = inputs.send(EngineInput::ChannelClosed).await;
                })
            }));
        }
        {
            let inputs = inputs.clone();
            dc.on_message(Box::new(move |message| {
                let inputs = inputs.clone();
                Box::pin(async move {
                    let text = String::from_utf8_lossy(&message.data).to_string();
                    let _ = inputs.send(EngineInput::Inbound(text)).await;
                })
            }));
        }

        if let Some(audio_tx) = remote_audio {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_string(),
                "voicebridge".to_string(),
            ));
            pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| SessionError::Negotiation(e.to_string()))?;

            pc.on_track(Box::new(move |track, _, _| {
                tracing::debug!(kind = %track.kind(), "remote track attached");
                let audio_tx = audio_tx.clone();
                Box::pin(async move {
                    while let Ok((packet, _)) = track.read_rtp().await {
                        if audio_tx.try_send(packet.payload).is_err() {
                            tracing::trace!("remote audio buffer full, dropping packet");
                        }
                    }
                    tracing::debug!("remote track ended");
                })
            }));
        }

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;
        let _ = gather_complete.recv().await;

        let local = pc.local_description().await.ok_or_else(|| {
            SessionError::Negotiation("local description missing after gathering".to_string())
        })?;
        let answer_sdp = negotiator.exchange_sdp(credential, &local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        Ok(Self { pc, dc, generation })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn control_channel(&self) -> Arc<dyn ControlChannel> {
        Arc::new(RtcControlChannel {
            dc: self.dc.clone(),
        })
    }

    /// Closes the control channel first, then the peer connection.
    /// Safe to call more than once.
    pub(crate) async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            tracing::debug!("closing control channel: {e}");
        }
        if let Err(e) = self.pc.close().await {
            tracing::debug!("closing peer connection: {e}");
        }
    }
}

struct RtcControlChannel {
    dc: Arc<RTCDataChannel>,
}

impl ControlChannel for RtcControlChannel {
    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn send(&self, text: String) -> BoxFuture<'static, Result<(), SessionError>> {
        let dc = self.dc.clone();
        Box::pin(async move {
            dc.send_text(text)
                .await
                .map(|_| ())
                .map_err(|e| SessionError::TransportLost(e.to_string()))
        })
    }
}
