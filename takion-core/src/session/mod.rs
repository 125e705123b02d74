//! Session: the single authority for a streaming session's lifecycle.
//!
//! | Module     | Purpose |
//! |------------|---------|
//! | `phase`    | `SessionPhase` with validated transitions |
//! | `quit`     | `QuitReason` and the `SessionEvent`s delivered to the host |
//! | `senkusha` | RTT / MTU probing ahead of stream setup |
//!
//! [`Session::start`] spawns the driver and returns a [`SessionHandle`]
//! plus the event receiver. The driver walks the phases in order; any
//! failure or a stop request short-circuits to teardown, which always ends
//! with exactly one [`SessionEvent::Disconnected`].
//!
//! Internal errors never cross this boundary: they are translated to a
//! [`QuitReason`] here and nowhere else.

pub mod phase;
pub mod quit;
pub mod senkusha;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TakionError;
use crate::flags::InputFeatures;
use crate::handshake::{ClientHandshake, Credentials};
use crate::header::ConsoleGeneration;
use crate::keys::KeySession;
use crate::message::{ContentType, ControlMessage};
use crate::packet::PacketFramer;
use crate::pipeline::sink::{self, DecodeSink, SinkQueue};
use crate::pipeline::{
    AudioEncoder, AudioSender, AuthFailureTracker, CongestionReporter, ControllerState,
    FeedbackSender, FrameAssembler, HapticsState, LossCounter, MediaLink, MediaReceiver,
    MicCapture, PipelineEvent,
};
use crate::profile::VideoProfile;
use crate::takion::{TakionConfig, TakionTransport, TransportEvent};
use crate::task::TaskSet;

pub use phase::SessionPhase;
pub use quit::{QuitReason, SessionEvent};
pub use senkusha::{ProbeConfig, ProbeResult, RttEstimator};

// ── Configuration ────────────────────────────────────────────────

/// Session-level tunables.
#[derive(Debug, Clone)]
pub struct SessionTimings {
    /// Wait for the console's answer to the hello (and to each PIN).
    pub handshake_timeout: Duration,
    /// Wait for `StreamReady` after the stream request.
    pub stream_timeout: Duration,
    pub feedback_interval: Duration,
    pub congestion_interval: Duration,
    /// Frames kept open for reassembly per stream.
    pub reassembly_window: u16,
    /// Frames buffered ahead of each decode sink.
    pub sink_queue: usize,
    /// Per-task grace period at teardown.
    pub shutdown_grace: Duration,
    pub probe: ProbeConfig,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(5),
            feedback_interval: Duration::from_millis(10),
            congestion_interval: Duration::from_millis(200),
            reassembly_window: FrameAssembler::DEFAULT_WINDOW,
            sink_queue: 16,
            shutdown_grace: Duration::from_millis(500),
            probe: ProbeConfig::default(),
        }
    }
}

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    pub host: SocketAddr,
    pub generation: ConsoleGeneration,
    pub credentials: Credentials,
    pub video_profile: VideoProfile,
    pub audio_buffer_size: u32,
    pub features: InputFeatures,
    pub takion: TakionConfig,
    pub timings: SessionTimings,
}

impl ConnectInfo {
    /// Defaults for everything but the target and credentials.
    pub fn new(host: SocketAddr, credentials: Credentials) -> Self {
        Self {
            host,
            generation: ConsoleGeneration::default(),
            credentials,
            video_profile: VideoProfile::default(),
            audio_buffer_size: 19200,
            features: InputFeatures::empty(),
            takion: TakionConfig::default(),
            timings: SessionTimings::default(),
        }
    }
}

// ── SessionHandle ────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    SetLoginPin(String),
    GoToBed,
}

/// Application-side control of a running session.
pub struct SessionHandle {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<SessionPhase>,
    controller: watch::Sender<ControllerState>,
    haptics: watch::Sender<HapticsState>,
    mic: Arc<MicCapture>,
}

impl SessionHandle {
    /// Request teardown. Repeated calls, or calls after the session
    /// ended, do nothing.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("session stop requested");
        }
        self.cancel.cancel();
    }

    /// Ask the console to enter standby. Ends the session.
    pub fn go_to_bed(&self) -> Result<(), TakionError> {
        if !self.phase().is_streaming() {
            return Err(TakionError::InvalidState("standby needs a streaming session"));
        }
        self.commands
            .send(Command::GoToBed)
            .map_err(|_| TakionError::ChannelClosed)
    }

    /// Answer a [`SessionEvent::LoginPinRequested`].
    pub fn set_login_pin(&self, pin: impl Into<String>) -> Result<(), TakionError> {
        self.commands
            .send(Command::SetLoginPin(pin.into()))
            .map_err(|_| TakionError::ChannelClosed)
    }

    /// Returns the new mute state.
    pub fn toggle_mute(&self) -> bool {
        self.mic.toggle_mute()
    }

    pub fn set_controller_state(&self, state: ControllerState) {
        self.controller.send_replace(state);
    }

    pub fn set_haptics(&self, haptics: HapticsState) {
        self.haptics.send_replace(haptics);
    }

    /// Entry point for the capture callback.
    pub fn mic(&self) -> Arc<MicCapture> {
        Arc::clone(&self.mic)
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Resolve once the session reached `phase`, or `Closed`.
    pub async fn wait_for_phase(&self, phase: SessionPhase) -> SessionPhase {
        let mut rx = self.phase.clone();
        match rx.wait_for(|p| *p == phase || p.is_closed()).await {
            Ok(p) => *p,
            Err(_) => SessionPhase::Closed,
        }
    }

    /// Resolve once the session is `Closed`.
    pub async fn closed(&self) {
        self.wait_for_phase(SessionPhase::Closed).await;
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("phase", &self.phase())
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ── Rekey ────────────────────────────────────────────────────────

/// Rotate past an exhausted epoch and tell the console. A second report
/// for an epoch that was already replaced is ignored.
fn rekey(tasks: &mut TaskSet, transport: &Arc<TakionTransport>, keys: &KeySession, exhausted: u32) {
    if keys.epoch() != exhausted {
        return;
    }
    let epoch = exhausted.wrapping_add(1);
    if let Err(e) = keys.rotate(epoch) {
        warn!(epoch, error = %e, "key rotation failed");
        return;
    }
    info!(epoch, "key positions exhausted, rotated");
    announce_rekey(tasks, Arc::clone(transport), epoch);
}

/// Send `Rekey` from a task of the session's set so teardown cancels it.
fn announce_rekey(tasks: &mut TaskSet, transport: Arc<TakionTransport>, epoch: u32) {
    tasks.spawn("rekey", move |cancel| async move {
        let msg = ControlMessage::Rekey { epoch };
        tokio::select! {
            _ = cancel.cancelled() => debug!(epoch, "rekey announcement cancelled"),
            res = transport.send_control(&msg) => {
                if let Err(e) = res {
                    debug!(epoch, error = %e, "rekey not acknowledged");
                }
            }
        }
    });
}

// ── Session ──────────────────────────────────────────────────────

struct Quit {
    reason: QuitReason,
    detail: String,
}

impl Quit {
    fn new(reason: QuitReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    fn stopped() -> Self {
        Self::new(QuitReason::Stopped, "stopped by application")
    }

    /// A console DISCONNECT keeps its own reason text; anything else is
    /// classified by `reason` and prefixed with `context`.
    fn from_error(err: TakionError, reason: fn(&TakionError) -> QuitReason, context: &str) -> Self {
        match err {
            TakionError::PeerDisconnect(detail) => Self::new(QuitReason::PeerDisconnect, detail),
            e => Self::new(reason(&e), format!("{context}: {e}")),
        }
    }
}

/// Session driver. Owned by its task; the application talks to it through
/// the [`SessionHandle`].
pub struct Session {
    info: ConnectInfo,
    framer: PacketFramer,
    phase: watch::Sender<SessionPhase>,
    events: mpsc::UnboundedSender<SessionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    controller: watch::Receiver<ControllerState>,
    haptics: watch::Receiver<HapticsState>,
    audio_sender: Arc<AudioSender>,
    mic: Arc<MicCapture>,
    video_sink: Arc<dyn DecodeSink>,
    audio_sink: Arc<dyn DecodeSink>,
}

impl Session {
    /// Spawn a session onto the current tokio runtime.
    pub fn start(
        info: ConnectInfo,
        video_sink: Arc<dyn DecodeSink>,
        audio_sink: Arc<dyn DecodeSink>,
        encoder: Box<dyn AudioEncoder>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);
        let (controller_tx, controller_rx) = watch::channel(ControllerState::default());
        let (haptics_tx, haptics_rx) = watch::channel(HapticsState::default());
        let cancel = CancellationToken::new();
        let audio_sender = Arc::new(AudioSender::new());
        let mic = Arc::new(MicCapture::new(encoder, Arc::clone(&audio_sender)));

        let session = Session {
            framer: PacketFramer::new(info.generation),
            info,
            phase: phase_tx,
            events: events_tx,
            commands: commands_rx,
            cancel: cancel.clone(),
            controller: controller_rx,
            haptics: haptics_rx,
            audio_sender,
            mic: Arc::clone(&mic),
            video_sink,
            audio_sink,
        };
        tokio::spawn(session.run());

        let handle = SessionHandle {
            cancel,
            commands: commands_tx,
            phase: phase_rx,
            controller: controller_tx,
            haptics: haptics_tx,
            mic,
        };
        (handle, events_rx)
    }

    async fn run(mut self) {
        info!(host = %self.info.host, generation = %self.info.generation, "session starting");
        let mut transport = None;
        let mut tasks = None;
        let quit = match self.drive(&mut transport, &mut tasks).await {
            Ok(quit) | Err(quit) => quit,
        };
        self.teardown(quit, transport, tasks).await;
    }

    async fn drive(
        &mut self,
        transport_slot: &mut Option<Arc<TakionTransport>>,
        tasks_slot: &mut Option<TaskSet>,
    ) -> Result<Quit, Quit> {
        self.transition(SessionPhase::begin_handshake);
        let (transport, mut transport_events) = self
            .until_stopped(TakionTransport::connect(
                self.info.host,
                self.info.takion.clone(),
                self.framer,
            ))
            .await?
            .map_err(|e| Quit::new(QuitReason::from_setup_error(&e), e.to_string()))?;
        *transport_slot = Some(Arc::clone(&transport));

        let keys = Arc::new(self.handshake(&transport, &mut transport_events).await?);

        self.transition(SessionPhase::begin_probe);
        let (profile, probe) = self.probe(&transport).await?;

        self.transition(SessionPhase::begin_stream_setup);
        let (channels, rate) = self
            .establish_stream(&transport, &mut transport_events, profile, probe)
            .await?;

        let (pipe_tx, mut pipe_rx) = mpsc::unbounded_channel();
        let link = MediaLink {
            framer: self.framer,
            keys: Arc::clone(&keys),
            sender: transport.clone(),
            events: pipe_tx,
        };
        *tasks_slot = Some(self.start_pipelines(&transport, &link));
        if let Err(e) = self.mic.configure(channels, rate) {
            warn!(error = %e, "microphone not configured");
        }
        self.audio_sender.attach(link.clone());

        self.transition(SessionPhase::start_streaming);
        self.emit(SessionEvent::AudioFormat { channels, rate });
        self.emit(SessionEvent::Connected);
        info!(%profile, "streaming");

        let Some(tasks) = tasks_slot.as_mut() else {
            return Err(Quit::new(QuitReason::ConnectionLost, "pipelines not running"));
        };
        Ok(self
            .stream(&transport, &keys, tasks, &mut transport_events, &mut pipe_rx)
            .await)
    }

    // ── Handshaking ──────────────────────────────────────────────

    async fn handshake(
        &mut self,
        transport: &TakionTransport,
        transport_events: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<KeySession, Quit> {
        let client = ClientHandshake::new(self.info.credentials.clone(), self.info.features);
        self.control(transport, &client.hello(), QuitReason::from_setup_error)
            .await?;

        let timeout = self.info.timings.handshake_timeout;
        let mut deadline = Instant::now() + timeout;
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Quit::stopped()),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(Quit::new(QuitReason::HandshakeTimeout, "console did not answer the hello"));
                }
                event = transport_events.recv() => event,
            };
            match event {
                Some(TransportEvent::Control(ControlMessage::LoginPinRequired { incorrect })) => {
                    info!(incorrect, "console requested login pin");
                    self.emit(SessionEvent::LoginPinRequested { incorrect });
                    let pin = self.wait_for_pin().await?;
                    self.control(transport, &ControlMessage::LoginPin { pin }, QuitReason::from_setup_error)
                        .await?;
                    deadline = Instant::now() + timeout;
                }
                Some(TransportEvent::Control(
                    reply @ (ControlMessage::HelloAck { .. } | ControlMessage::HelloReject { .. }),
                )) => {
                    return match client.finish(&reply) {
                        Ok(keys) => {
                            info!("key agreement complete");
                            Ok(keys)
                        }
                        Err(failure) => {
                            warn!(%failure, "handshake rejected");
                            Err(Quit::new(QuitReason::from_handshake(&failure), failure.to_string()))
                        }
                    };
                }
                Some(TransportEvent::Control(other)) => {
                    debug!(message = %other, "ignored during handshake");
                }
                Some(TransportEvent::PeerDisconnect(reason)) => {
                    return Err(Quit::new(QuitReason::PeerDisconnect, reason));
                }
                Some(TransportEvent::ConnectionLost(detail)) => {
                    return Err(Quit::new(QuitReason::HandshakeTimeout, detail));
                }
                None => return Err(Quit::new(QuitReason::ConnectionLost, "transport closed")),
            }
        }
    }

    async fn wait_for_pin(&mut self) -> Result<String, Quit> {
        loop {
            let command = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Quit::stopped()),
                command = self.commands.recv() => command,
            };
            match command {
                Some(Command::SetLoginPin(pin)) => return Ok(pin),
                Some(other) => debug!(?other, "ignored while waiting for pin"),
                None => return Err(Quit::new(QuitReason::Stopped, "session handle dropped")),
            }
        }
    }

    // ── ProbeLatency ─────────────────────────────────────────────

    async fn probe(&self, transport: &TakionTransport) -> Result<(VideoProfile, Option<ProbeResult>), Quit> {
        match self
            .until_stopped(senkusha::probe(transport, &self.info.timings.probe))
            .await?
        {
            Ok(result) => {
                transport.set_mtu(result.mtu);
                Ok((self.info.video_profile.adapt_to_rtt(result.rtt), Some(result)))
            }
            Err(e) if transport.is_closed() => Err(Quit::from_error(
                e,
                QuitReason::from_stream_error,
                "latency probe",
            )),
            Err(e) => {
                warn!(error = %e, "latency probe failed, using conservative profile");
                Ok((VideoProfile::conservative(), None))
            }
        }
    }

    // ── StreamEstablishing ───────────────────────────────────────

    async fn establish_stream(
        &self,
        transport: &TakionTransport,
        transport_events: &mut mpsc::Receiver<TransportEvent>,
        profile: VideoProfile,
        probe: Option<ProbeResult>,
    ) -> Result<(u16, u32), Quit> {
        let mtu = probe.map_or(transport.mtu(), |p| p.mtu);
        let request = ControlMessage::StreamRequest {
            profile,
            mtu: u16::try_from(mtu).unwrap_or(u16::MAX),
            features: self.info.features.bits(),
            audio_buffer_size: self.info.audio_buffer_size,
            rtt_us: probe
                .map(|p| u32::try_from(p.rtt.as_micros()).unwrap_or(u32::MAX))
                .unwrap_or(0),
        };
        self.control(transport, &request, QuitReason::from_stream_error)
            .await?;

        let deadline = Instant::now() + self.info.timings.stream_timeout;
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Quit::stopped()),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(Quit::new(QuitReason::ConnectionLost, "console did not open the streams"));
                }
                event = transport_events.recv() => event,
            };
            match event {
                Some(TransportEvent::Control(ControlMessage::StreamReady {
                    audio_channels,
                    audio_rate,
                })) => return Ok((u16::from(audio_channels), audio_rate)),
                Some(TransportEvent::Control(other)) => {
                    debug!(message = %other, "ignored during stream setup");
                }
                Some(TransportEvent::PeerDisconnect(reason)) => {
                    return Err(Quit::new(QuitReason::PeerDisconnect, reason));
                }
                Some(TransportEvent::ConnectionLost(detail)) => {
                    return Err(Quit::new(QuitReason::ConnectionLost, detail));
                }
                None => return Err(Quit::new(QuitReason::ConnectionLost, "transport closed")),
            }
        }
    }

    fn start_pipelines(&self, transport: &Arc<TakionTransport>, link: &MediaLink) -> TaskSet {
        let timings = &self.info.timings;
        let mut tasks = TaskSet::new(&self.cancel);
        let auth = Arc::new(Mutex::new(AuthFailureTracker::default()));
        let loss = Arc::new(LossCounter::new());

        let streams = [
            (ContentType::Video, Arc::clone(&self.video_sink), "video-receiver", "video-sink"),
            (ContentType::Audio, Arc::clone(&self.audio_sink), "audio-receiver", "audio-sink"),
        ];
        for (content, decode_sink, receiver_name, pump_name) in streams {
            let queue = Arc::new(SinkQueue::new(timings.sink_queue));
            let rx = transport.subscribe(content);
            let receiver = MediaReceiver::new(
                content,
                self.framer,
                Arc::clone(&link.keys),
                Arc::clone(&queue),
                Arc::clone(&auth),
                Arc::clone(&loss),
                link.events.clone(),
                timings.reassembly_window,
            );
            tasks.spawn(receiver_name, move |cancel| receiver.run(rx, cancel));
            tasks.spawn(pump_name, move |cancel| sink::pump(queue, decode_sink, cancel));
        }

        let feedback = FeedbackSender::new(
            link.clone(),
            self.controller.clone(),
            self.haptics.clone(),
            timings.feedback_interval,
        );
        tasks.spawn("feedback", move |cancel| feedback.run(cancel));

        let congestion = CongestionReporter::new(link.clone(), loss, timings.congestion_interval);
        tasks.spawn("congestion", move |cancel| congestion.run(cancel));
        tasks
    }

    // ── Streaming ────────────────────────────────────────────────

    async fn stream(
        &mut self,
        transport: &Arc<TakionTransport>,
        keys: &Arc<KeySession>,
        tasks: &mut TaskSet,
        transport_events: &mut mpsc::Receiver<TransportEvent>,
        pipeline_events: &mut mpsc::UnboundedReceiver<PipelineEvent>,
    ) -> Quit {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Quit::stopped(),
                command = self.commands.recv() => match command {
                    Some(Command::GoToBed) => return self.go_to_bed(transport).await,
                    Some(Command::SetLoginPin(_)) => debug!("login pin ignored while streaming"),
                    None => return Quit::new(QuitReason::Stopped, "session handle dropped"),
                },
                event = transport_events.recv() => match event {
                    Some(TransportEvent::Control(ControlMessage::Rekey { epoch })) => {
                        match keys.rotate(epoch) {
                            Ok(()) => info!(epoch, "console rotated keys"),
                            Err(e) => warn!(epoch, error = %e, "rekey from console rejected"),
                        }
                    }
                    Some(TransportEvent::Control(ControlMessage::Standby)) => {
                        return Quit::new(QuitReason::Standby, "console entered standby");
                    }
                    Some(TransportEvent::Control(other)) => {
                        debug!(message = %other, "ignored while streaming");
                    }
                    Some(TransportEvent::PeerDisconnect(reason)) => {
                        return Quit::new(QuitReason::PeerDisconnect, reason);
                    }
                    Some(TransportEvent::ConnectionLost(detail)) => {
                        return Quit::new(QuitReason::ConnectionLost, detail);
                    }
                    None => return Quit::new(QuitReason::ConnectionLost, "transport closed"),
                },
                Some(event) = pipeline_events.recv() => match event {
                    PipelineEvent::KeysExhausted { epoch } => rekey(tasks, transport, keys, epoch),
                    PipelineEvent::AuthFailureBurst { failures } => {
                        return Quit::new(
                            QuitReason::ConnectionLost,
                            format!("{failures} consecutive packets failed authentication"),
                        );
                    }
                    PipelineEvent::Quality(quality) => self.emit(SessionEvent::Quality(quality)),
                },
            }
        }
    }

    async fn go_to_bed(&mut self, transport: &TakionTransport) -> Quit {
        self.transition(SessionPhase::go_to_bed);
        match self
            .until_stopped(transport.send_control(&ControlMessage::Standby))
            .await
        {
            Ok(Ok(_)) => Quit::new(QuitReason::Standby, "console entering standby"),
            Ok(Err(e)) => Quit::new(QuitReason::from_stream_error(&e), e.to_string()),
            Err(quit) => quit,
        }
    }

    // ── Closing ──────────────────────────────────────────────────

    async fn teardown(
        &mut self,
        quit: Quit,
        transport: Option<Arc<TakionTransport>>,
        tasks: Option<TaskSet>,
    ) {
        self.transition(SessionPhase::begin_close);
        self.audio_sender.detach();
        if let Some(tasks) = tasks {
            let aborted = tasks.shutdown(self.info.timings.shutdown_grace).await;
            if aborted > 0 {
                warn!(aborted, "pipeline tasks aborted at shutdown");
            }
        }
        if let Some(transport) = transport {
            transport.close(&quit.reason.to_string()).await;
        }

        if quit.reason.is_error() {
            warn!(reason = %quit.reason, detail = %quit.detail, "session ended");
        } else {
            info!(reason = %quit.reason, detail = %quit.detail, "session ended");
        }
        self.emit(SessionEvent::Disconnected {
            reason: quit.reason,
            detail: quit.detail,
        });
        self.transition(SessionPhase::finish_close);
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("session event dropped, receiver gone");
        }
    }

    fn transition(&self, step: fn(&mut SessionPhase) -> Result<(), TakionError>) {
        let mut outcome = Ok(());
        let mut from = SessionPhase::Idle;
        self.phase.send_if_modified(|phase| {
            from = *phase;
            outcome = step(phase);
            outcome.is_ok()
        });
        let to = *self.phase.borrow();
        match outcome {
            Ok(()) => info!(%from, %to, "session phase"),
            Err(e) => warn!(phase = %from, error = %e, "session phase unchanged"),
        }
    }

    async fn until_stopped<F: Future>(&self, fut: F) -> Result<F::Output, Quit> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Quit::stopped()),
            out = fut => Ok(out),
        }
    }

    async fn control(
        &self,
        transport: &TakionTransport,
        msg: &ControlMessage,
        reason: fn(&TakionError) -> QuitReason,
    ) -> Result<Duration, Quit> {
        self.until_stopped(transport.send_control(msg))
            .await?
            .map_err(|e| Quit::from_error(e, reason, &format!("{} not acknowledged", msg.name())))
    }
}
