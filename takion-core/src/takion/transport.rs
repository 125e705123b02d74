//! UDP transport: connection setup, reliable control chunks, best-effort
//! media, keep-alive and inbound demultiplexing.
//!
//! ```text
//!                 ┌──────────── TakionTransport ────────────┐
//!  send_control ─▶│ seq++ ─▶ DATA ─▶ retransmit until ACK   │──▶ UDP
//!  send_media ───▶│ try_send (dropped when the socket is    │──▶ UDP
//!                 │ busy)                                    │
//!                 │ receive loop (UdpFramed + TakionCodec):  │◀── UDP
//!                 │   DATA      ─▶ DATA_ACK, events         │
//!                 │   DATA_ACK  ─▶ AckTracker               │
//!                 │   media     ─▶ subscriber for its type  │
//!                 │ keep-alive: heartbeat when idle, lose    │
//!                 │ the peer after `peer_timeout` of silence │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! All connection state sits behind one mutex that is never held across
//! an `.await`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use rand_core::{OsRng, RngCore};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, trace, warn};

use super::ack::{AckTracker, ReceivedWindow};
use super::state::ConnectionState;
use crate::codec::{Datagram, TakionCodec};
use crate::error::TakionError;
use crate::header::ControlHeader;
use crate::message::{ChunkType, ContentType, ControlMessage};
use crate::packet::{PacketFramer, PacketHeader};

// ── Configuration ────────────────────────────────────────────────

/// Transport tunables.
#[derive(Debug, Clone)]
pub struct TakionConfig {
    /// Wait for INIT_ACK per INIT attempt.
    pub connect_timeout: Duration,
    /// INIT attempts before giving up.
    pub connect_attempts: u32,
    /// Fixed interval between control retransmissions.
    pub retransmit_interval: Duration,
    /// Transmissions of one control message before it is given up.
    pub retransmit_attempts: u32,
    /// Send a heartbeat after this long without sending anything.
    pub heartbeat_interval: Duration,
    /// Declare the connection lost after this long without hearing the peer.
    pub peer_timeout: Duration,
    /// Initial path MTU estimate.
    pub mtu: usize,
    /// Per-content-type queue between the receive loop and subscribers.
    pub media_queue: usize,
}

impl Default for TakionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            connect_attempts: 5,
            retransmit_interval: Duration::from_millis(200),
            retransmit_attempts: 8,
            heartbeat_interval: Duration::from_secs(1),
            peer_timeout: Duration::from_secs(5),
            mtu: 1454,
            media_queue: 256,
        }
    }
}

// ── Events / seams ───────────────────────────────────────────────

/// Connection-level events for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A control message from the console (delivered once).
    Control(ControlMessage),
    /// The console sent DISCONNECT.
    PeerDisconnect(String),
    /// The console went silent.
    ConnectionLost(&'static str),
}

/// Fire-and-forget datagram output used by the media pipelines.
///
/// Synchronous so it can be called from capture callbacks.
pub trait MediaSender: Send + Sync {
    fn send_media(&self, content: ContentType, packet: &[u8]) -> Result<(), TakionError>;
}

// ── ConnectionInner ──────────────────────────────────────────────

struct ConnectionInner {
    state: ConnectionState,
    local_tag: u32,
    remote_tag: u32,
    next_seq: u32,
    acks: AckTracker,
    received: ReceivedWindow,
    last_heard: Instant,
    last_sent: Instant,
    mtu: usize,
    /// Reason text of a DISCONNECT received from the console.
    peer_reason: Option<String>,
}

// ── TakionTransport ──────────────────────────────────────────────

pub struct TakionTransport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    framer: PacketFramer,
    config: TakionConfig,
    inner: Mutex<ConnectionInner>,
    subscribers: Mutex<HashMap<ContentType, mpsc::Sender<Bytes>>>,
    shutdown: CancellationToken,
}

impl TakionTransport {
    /// Open a connection to `peer` and start the receive and keep-alive
    /// tasks. Fails with `ConnectFailed` (refused, malformed answer) or
    /// `Timeout` (no INIT_ACK after every attempt).
    pub async fn connect(
        peer: SocketAddr,
        config: TakionConfig,
        framer: PacketFramer,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>), TakionError> {
        let bind: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await.map_err(connect_error)?;
        socket.connect(peer).await.map_err(connect_error)?;

        let local_tag = random_tag();
        let remote_tag = exchange_init(&socket, &framer, &config, local_tag).await?;

        let mut state = ConnectionState::default();
        state.establish()?;
        info!(%peer, local_tag = format_args!("{local_tag:#010x}"), "takion connection established");

        let now = Instant::now();
        let transport = Arc::new(Self {
            socket: Arc::new(socket),
            peer,
            framer,
            inner: Mutex::new(ConnectionInner {
                state,
                local_tag,
                remote_tag,
                next_seq: 1,
                acks: AckTracker::new(),
                received: ReceivedWindow::new(128),
                last_heard: now,
                last_sent: now,
                mtu: config.mtu,
                peer_reason: None,
            }),
            subscribers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            config,
        });

        let (events_tx, events_rx) = mpsc::channel(64);
        tokio::spawn(Arc::clone(&transport).receive_loop(events_tx.clone()));
        tokio::spawn(Arc::clone(&transport).keepalive_loop(events_tx));
        Ok((transport, events_rx))
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TakionError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn framer(&self) -> PacketFramer {
        self.framer
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .lock()
            .map(|i| i.state.clone())
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    pub fn mtu(&self) -> usize {
        self.inner.lock().map(|i| i.mtu).unwrap_or(self.config.mtu)
    }

    pub fn set_mtu(&self, mtu: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.mtu = mtu;
        }
    }

    /// Receive every inbound media datagram of `content`. A second
    /// subscription for the same type replaces the first.
    pub fn subscribe(&self, content: ContentType) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.config.media_queue.max(1));
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(content, tx);
        }
        rx
    }

    // ── Control channel ──────────────────────────────────────────

    /// Send a control message and wait for its acknowledgment, returning
    /// the round-trip time. After `retransmit_attempts` unacknowledged
    /// transmissions the connection is closed and
    /// `RetransmitExhausted` is returned.
    pub async fn send_control(&self, msg: &ControlMessage) -> Result<Duration, TakionError> {
        let attempts = self.config.retransmit_attempts;
        let result = self.send_reliable(msg, attempts).await;
        if let Err(TakionError::RetransmitExhausted { .. }) = &result {
            warn!(message = %msg, attempts, "control message never acknowledged, connection lost");
            if let Ok(mut inner) = self.inner.lock() {
                inner.state.fail();
                inner.acks.clear();
            }
            self.shutdown.cancel();
        }
        result
    }

    /// Like [`send_control`](Self::send_control) but an unacknowledged
    /// probe leaves the connection up.
    pub async fn probe(&self, msg: &ControlMessage, attempts: u32) -> Result<Duration, TakionError> {
        self.send_reliable(msg, attempts).await
    }

    async fn send_reliable(&self, msg: &ControlMessage, attempts: u32) -> Result<Duration, TakionError> {
        let payload = msg.to_bytes()?;
        let (seq, datagram, mut ack) = {
            let mut inner = self.lock()?;
            if let Some(reason) = &inner.peer_reason {
                return Err(TakionError::PeerDisconnect(reason.clone()));
            }
            if !inner.state.is_established() {
                return Err(TakionError::InvalidState(
                    "control send on a connection that is not established",
                ));
            }
            let seq = inner.next_seq;
            inner.next_seq = inner.next_seq.wrapping_add(1);
            let datagram = self
                .framer
                .control(ChunkType::Data, seq, inner.remote_tag, &payload)?;
            let ack = inner.acks.track(seq);
            (seq, datagram, ack)
        };
        debug!(seq, message = %msg, "sending control message");

        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                trace!(seq, attempt, "retransmitting control message");
                self.lock()?.acks.touch(seq);
            }
            self.socket.send(&datagram).await?;
            self.mark_sent();

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(self.closed_error()),
                res = tokio::time::timeout(self.config.retransmit_interval, &mut ack) => match res {
                    Ok(Ok(rtt)) => return Ok(rtt),
                    Ok(Err(_)) => return Err(self.closed_error()),
                    Err(_) => continue,
                },
            }
        }

        self.lock()?.acks.forget(seq);
        Err(TakionError::RetransmitExhausted { attempts })
    }

    /// Why a pending control send ended early: the console's DISCONNECT
    /// if one arrived, a local teardown otherwise.
    fn closed_error(&self) -> TakionError {
        match self.inner.lock() {
            Ok(inner) => match &inner.peer_reason {
                Some(reason) => TakionError::PeerDisconnect(reason.clone()),
                None => TakionError::ConnectionLost("transport closed"),
            },
            Err(_) => TakionError::ConnectionLost("transport closed"),
        }
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Send DISCONNECT and stop the background tasks. Idempotent.
    pub async fn close(&self, reason: &str) {
        let datagram = {
            let Ok(mut inner) = self.inner.lock() else {
                self.shutdown.cancel();
                return;
            };
            if inner.state.begin_close().is_err() {
                return;
            }
            inner.acks.clear();
            self.framer
                .control(ChunkType::Disconnect, 0, inner.remote_tag, reason.as_bytes())
                .ok()
        };
        if let Some(datagram) = datagram {
            if let Err(e) = self.socket.send(&datagram).await {
                debug!(error = %e, "disconnect chunk not sent");
            }
        }
        if let Ok(mut inner) = self.inner.lock() {
            let _ = inner.state.finish_close();
        }
        self.shutdown.cancel();
        info!(%reason, "takion connection closed");
    }

    // ── Background tasks ─────────────────────────────────────────

    async fn receive_loop(self: Arc<Self>, events: mpsc::Sender<TransportEvent>) {
        let mut framed = UdpFramed::new(Arc::clone(&self.socket), TakionCodec::new(self.framer));
        loop {
            let item = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                item = framed.next() => item,
            };
            match item {
                Some(Ok((datagram, from))) => {
                    if from != self.peer {
                        trace!(%from, "datagram from foreign address dropped");
                        continue;
                    }
                    if self.handle_datagram(datagram, &events).await.is_break() {
                        break;
                    }
                }
                Some(Err(e)) => debug!(error = %e, "udp receive error"),
                None => break,
            }
        }
        debug!("takion receive loop stopped");
    }

    async fn handle_datagram(
        &self,
        datagram: Datagram,
        events: &mpsc::Sender<TransportEvent>,
    ) -> ControlFlow<()> {
        match datagram {
            Datagram::Control { header, payload } => {
                self.handle_control(header, payload, events).await
            }
            Datagram::Media { content, packet } => {
                if let Ok(mut inner) = self.inner.lock() {
                    inner.last_heard = Instant::now();
                }
                self.route_media(content, packet);
                ControlFlow::Continue(())
            }
            Datagram::Unknown { tag, len } => {
                warn!(tag, len, "unknown packet type dropped");
                ControlFlow::Continue(())
            }
            Datagram::Malformed(reason) => {
                debug!(reason, "malformed datagram dropped");
                ControlFlow::Continue(())
            }
        }
    }

    async fn handle_control(
        &self,
        header: ControlHeader,
        payload: Bytes,
        events: &mpsc::Sender<TransportEvent>,
    ) -> ControlFlow<()> {
        let (ack, deliver) = {
            let Ok(mut inner) = self.inner.lock() else {
                return ControlFlow::Break(());
            };
            if header.conn_tag != inner.local_tag {
                trace!(tag = header.conn_tag, "control chunk with foreign tag dropped");
                return ControlFlow::Continue(());
            }
            inner.last_heard = Instant::now();

            match header.chunk {
                ChunkType::Data => {
                    let ack = self
                        .framer
                        .control(ChunkType::DataAck, header.seq, inner.remote_tag, &[])
                        .ok();
                    (ack, inner.received.insert(header.seq))
                }
                ChunkType::DataAck => {
                    if !inner.acks.resolve(header.seq) {
                        trace!(seq = header.seq, "stale ack ignored");
                    }
                    return ControlFlow::Continue(());
                }
                ChunkType::Heartbeat => return ControlFlow::Continue(()),
                ChunkType::Init | ChunkType::InitAck => {
                    trace!(chunk = %header.chunk, "late init chunk ignored");
                    return ControlFlow::Continue(());
                }
                ChunkType::Disconnect => {
                    inner.peer_reason = Some(String::from_utf8_lossy(&payload).into_owned());
                    inner.state.fail();
                    inner.acks.clear();
                    (None, false)
                }
            }
        };

        if header.chunk == ChunkType::Disconnect {
            let reason = String::from_utf8_lossy(&payload).into_owned();
            info!(%reason, "console closed the connection");
            self.shutdown.cancel();
            let _ = events.send(TransportEvent::PeerDisconnect(reason)).await;
            return ControlFlow::Break(());
        }

        if let Some(ack) = ack {
            if let Err(e) = self.socket.send(&ack).await {
                debug!(error = %e, "ack not sent");
            }
        }
        if !deliver {
            trace!(seq = header.seq, "duplicate control chunk re-acked");
            return ControlFlow::Continue(());
        }
        match ControlMessage::from_bytes(&payload) {
            Ok(msg) => {
                debug!(seq = header.seq, message = %msg, "control message received");
                if events.send(TransportEvent::Control(msg)).await.is_err() {
                    return ControlFlow::Break(());
                }
            }
            Err(e) => warn!(seq = header.seq, error = %e, "undecodable control message dropped"),
        }
        ControlFlow::Continue(())
    }

    fn route_media(&self, content: ContentType, packet: Bytes) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        let Some(tx) = subs.get(&content) else {
            trace!(%content, "no subscriber, media dropped");
            return;
        };
        match tx.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(%content, "subscriber lagging, media dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                subs.remove(&content);
            }
        }
    }

    async fn keepalive_loop(self: Arc<Self>, events: mpsc::Sender<TransportEvent>) {
        let period = (self.config.heartbeat_interval / 2).max(Duration::from_millis(10));
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            let heartbeat = {
                let Ok(mut inner) = self.inner.lock() else {
                    break;
                };
                if !inner.state.is_established() {
                    break;
                }
                if inner.last_heard.elapsed() > self.config.peer_timeout {
                    inner.state.fail();
                    inner.acks.clear();
                    Err(())
                } else if inner.last_sent.elapsed() >= self.config.heartbeat_interval {
                    inner.last_sent = Instant::now();
                    Ok(self
                        .framer
                        .control(ChunkType::Heartbeat, 0, inner.remote_tag, &[])
                        .ok())
                } else {
                    Ok(None)
                }
            };
            let Ok(heartbeat) = heartbeat else {
                warn!(timeout = ?self.config.peer_timeout, "console went silent");
                self.shutdown.cancel();
                let _ = events
                    .send(TransportEvent::ConnectionLost("peer heartbeat timeout"))
                    .await;
                break;
            };
            if let Some(heartbeat) = heartbeat {
                match self.socket.send(&heartbeat).await {
                    Ok(_) => trace!("heartbeat sent"),
                    Err(e) => debug!(error = %e, "heartbeat not sent"),
                }
            }
        }
        debug!("takion keep-alive stopped");
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn lock(&self) -> Result<MutexGuard<'_, ConnectionInner>, TakionError> {
        self.inner
            .lock()
            .map_err(|_| TakionError::InvalidState("connection lock poisoned"))
    }

    fn mark_sent(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_sent = Instant::now();
        }
    }
}

impl MediaSender for TakionTransport {
    fn send_media(&self, content: ContentType, packet: &[u8]) -> Result<(), TakionError> {
        {
            let mut inner = self.lock()?;
            if let Some(reason) = &inner.peer_reason {
                return Err(TakionError::PeerDisconnect(reason.clone()));
            }
            if !inner.state.is_established() {
                return Err(TakionError::InvalidState(
                    "media send on a connection that is not established",
                ));
            }
            inner.last_sent = Instant::now();
        }
        match self.socket.try_send(packet) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                trace!(%content, "socket busy, media dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for TakionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TakionTransport")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Connection setup ─────────────────────────────────────────────

fn random_tag() -> u32 {
    loop {
        let tag = OsRng.next_u32();
        if tag != 0 {
            return tag;
        }
    }
}

fn connect_error(e: std::io::Error) -> TakionError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            TakionError::ConnectFailed("connection refused".to_string())
        }
        _ => TakionError::ConnectFailed(e.to_string()),
    }
}

/// Send INIT until an INIT_ACK addressed to `local_tag` arrives.
/// Returns the console's tag.
async fn exchange_init(
    socket: &UdpSocket,
    framer: &PacketFramer,
    config: &TakionConfig,
    local_tag: u32,
) -> Result<u32, TakionError> {
    let init = framer.control(ChunkType::Init, 0, 0, &local_tag.to_be_bytes())?;
    let mut buf = vec![0u8; 2048];

    for attempt in 1..=config.connect_attempts.max(1) {
        debug!(attempt, "sending takion init");
        socket.send(&init).await.map_err(connect_error)?;
        let deadline = tokio::time::Instant::now() + config.connect_timeout;

        loop {
            let n = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Err(_) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(connect_error(e)),
            };
            let Ok(parsed) = framer.parse(&buf[..n]) else {
                trace!(len = n, "unparseable datagram during connect ignored");
                continue;
            };
            let PacketHeader::Control(header) = parsed.header else {
                continue;
            };
            if header.chunk != ChunkType::InitAck || header.conn_tag != local_tag {
                continue;
            }
            let tag: [u8; 4] = parsed
                .payload
                .try_into()
                .map_err(|_| TakionError::ConnectFailed("malformed init ack".to_string()))?;
            return Ok(u32::from_be_bytes(tag));
        }
    }
    Err(TakionError::Timeout(
        config.connect_timeout * config.connect_attempts.max(1),
    ))
}

// ── Tests ────────────────────────────────────────────────────────
