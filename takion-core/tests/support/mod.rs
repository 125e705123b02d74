//! In-process console for integration tests: speaks Takion over loopback
//! UDP using only the crate's public API.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use takion_core::{
    AudioEncoder, AvHeader, ChunkType, ConnectInfo, ConsoleGeneration, ConsoleHandshake,
    ContentType, ControlMessage, Credentials, DecodeSink, EncodedFrame, KeySession, PacketFramer,
    PacketHeader, SessionEvent, SessionTimings, TakionConfig, TakionError,
};
use tokio::net::UdpSocket;
use tokio::sync::{Notify, mpsc};

pub const CONSOLE_TAG: u32 = 0x7A4B_0001;
pub const WAIT: Duration = Duration::from_secs(5);

pub fn credentials() -> Credentials {
    Credentials {
        regist_key: b"regist-key-0042".to_vec(),
        morning: [0x3C; 16],
    }
}

/// Session settings tuned for loopback: short timers, small probes.
pub fn connect_info(host: SocketAddr, generation: ConsoleGeneration) -> ConnectInfo {
    let mut info = ConnectInfo::new(host, credentials());
    info.generation = generation;
    info.takion = TakionConfig {
        connect_timeout: Duration::from_millis(100),
        connect_attempts: 3,
        retransmit_interval: Duration::from_millis(50),
        retransmit_attempts: 5,
        heartbeat_interval: Duration::from_millis(200),
        peer_timeout: Duration::from_secs(3),
        ..TakionConfig::default()
    };
    info.timings = SessionTimings {
        handshake_timeout: Duration::from_secs(2),
        stream_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_millis(200),
        ..SessionTimings::default()
    };
    info
}

// ── Collaborators ────────────────────────────────────────────────

/// Decode sink that keeps every frame.
#[derive(Default)]
pub struct CollectSink {
    frames: Mutex<Vec<EncodedFrame>>,
    arrived: Notify,
}

#[async_trait]
impl DecodeSink for CollectSink {
    async fn push(&self, frame: EncodedFrame) -> Result<(), TakionError> {
        self.frames.lock().unwrap().push(frame);
        self.arrived.notify_one();
        Ok(())
    }
}

impl CollectSink {
    pub async fn wait_for(&self, count: usize) -> Vec<EncodedFrame> {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.arrived.notified();
                {
                    let frames = self.frames.lock().unwrap();
                    if frames.len() >= count {
                        return frames.clone();
                    }
                }
                notified.await;
            }
        })
        .await
        .expect("frames never reached the sink")
    }
}

/// Ten samples per channel; every frame becomes one 40-byte unit filled
/// with the first sample.
pub struct FixedEncoder;

impl AudioEncoder for FixedEncoder {
    fn frame_samples(&self) -> usize {
        10
    }

    fn configure(&mut self, _channels: u16, _rate: u32) -> Result<(), TakionError> {
        Ok(())
    }

    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, TakionError> {
        Ok(vec![pcm[0] as u8; 40])
    }
}

pub fn sinks() -> (Arc<CollectSink>, Arc<CollectSink>) {
    (Arc::new(CollectSink::default()), Arc::new(CollectSink::default()))
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Option<SessionEvent> {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no session event")
}

/// Next event that is not a quality report.
pub async fn next_lifecycle_event(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> Option<SessionEvent> {
    loop {
        match next_event(events).await {
            Some(SessionEvent::Quality(_)) => continue,
            other => return other,
        }
    }
}

// ── MockConsole ──────────────────────────────────────────────────

#[derive(Debug)]
pub enum Inbound {
    Control(ControlMessage),
    Media(ContentType, Vec<u8>),
    Disconnect(String),
}

pub struct MockConsole {
    socket: UdpSocket,
    pub framer: PacketFramer,
    pub handshake: ConsoleHandshake,
    client: Option<(SocketAddr, u32)>,
    seq: u32,
    seen: HashSet<u32>,
    pub keys: Option<KeySession>,
}

impl MockConsole {
    pub async fn bind(generation: ConsoleGeneration) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            framer: PacketFramer::new(generation),
            handshake: ConsoleHandshake::new(credentials()),
            client: None,
            seq: 100,
            seen: HashSet::new(),
            keys: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    fn client(&self) -> (SocketAddr, u32) {
        self.client.expect("no client connected")
    }

    async fn recv_raw(&self, buf: &mut [u8]) -> (usize, SocketAddr) {
        tokio::time::timeout(WAIT, self.socket.recv_from(buf))
            .await
            .expect("console waited too long")
            .unwrap()
    }

    /// Answer the first INIT.
    pub async fn accept(&mut self) {
        let mut buf = vec![0u8; 4096];
        loop {
            let (n, from) = self.recv_raw(&mut buf).await;
            let Ok(parsed) = self.framer.parse(&buf[..n]) else { continue };
            let PacketHeader::Control(h) = parsed.header else { continue };
            if h.chunk != ChunkType::Init {
                continue;
            }
            let client_tag = u32::from_be_bytes(parsed.payload.try_into().unwrap());
            let ack = self
                .framer
                .control(ChunkType::InitAck, 0, client_tag, &CONSOLE_TAG.to_be_bytes())
                .unwrap();
            self.socket.send_to(&ack, from).await.unwrap();
            self.client = Some((from, client_tag));
            return;
        }
    }

    /// Next meaningful datagram. Data chunks are acknowledged and
    /// delivered once; acks and heartbeats are skipped.
    pub async fn recv(&mut self) -> Inbound {
        let mut buf = vec![0u8; 4096];
        loop {
            let (n, _) = self.recv_raw(&mut buf).await;
            let parsed = self.framer.parse(&buf[..n]).unwrap();
            let PacketHeader::Control(h) = parsed.header else {
                return Inbound::Media(parsed.header.content_type(), buf[..n].to_vec());
            };
            match h.chunk {
                ChunkType::Data => {
                    let (addr, client_tag) = self.client();
                    let ack = self
                        .framer
                        .control(ChunkType::DataAck, h.seq, client_tag, &[])
                        .unwrap();
                    self.socket.send_to(&ack, addr).await.unwrap();
                    if self.seen.insert(h.seq) {
                        return Inbound::Control(ControlMessage::from_bytes(parsed.payload).unwrap());
                    }
                }
                ChunkType::Disconnect => {
                    return Inbound::Disconnect(String::from_utf8_lossy(parsed.payload).into_owned());
                }
                _ => {}
            }
        }
    }

    /// Next control message, left unacknowledged so the client keeps
    /// waiting on it.
    pub async fn hold_control(&mut self) -> ControlMessage {
        let mut buf = vec![0u8; 4096];
        loop {
            let (n, _) = self.recv_raw(&mut buf).await;
            let parsed = self.framer.parse(&buf[..n]).unwrap();
            let PacketHeader::Control(h) = parsed.header else { continue };
            if h.chunk == ChunkType::Data {
                return ControlMessage::from_bytes(parsed.payload).unwrap();
            }
        }
    }

    /// Next control message, skipping media.
    pub async fn expect_control(&mut self) -> ControlMessage {
        loop {
            if let Inbound::Control(msg) = self.recv().await {
                return msg;
            }
        }
    }

    /// Next media datagram of `content`.
    pub async fn expect_media(&mut self, content: ContentType) -> Vec<u8> {
        loop {
            if let Inbound::Media(c, pkt) = self.recv().await {
                if c == content {
                    return pkt;
                }
            }
        }
    }

    /// Wait for the client's DISCONNECT.
    pub async fn expect_disconnect(&mut self) -> String {
        loop {
            if let Inbound::Disconnect(reason) = self.recv().await {
                return reason;
            }
        }
    }

    /// Fire a control message at the client without waiting for its ack.
    pub async fn send_control(&mut self, msg: &ControlMessage) {
        let (addr, client_tag) = self.client();
        self.seq += 1;
        let chunk = self
            .framer
            .control(ChunkType::Data, self.seq, client_tag, &msg.to_bytes().unwrap())
            .unwrap();
        self.socket.send_to(&chunk, addr).await.unwrap();
    }

    pub async fn send_disconnect(&mut self, reason: &str) {
        let (addr, client_tag) = self.client();
        let chunk = self
            .framer
            .control(ChunkType::Disconnect, 0, client_tag, reason.as_bytes())
            .unwrap();
        self.socket.send_to(&chunk, addr).await.unwrap();
    }

    /// Receive the hello and answer it; returns the hello.
    pub async fn answer_hello(&mut self) -> ControlMessage {
        let hello = self.expect_control().await;
        assert!(matches!(hello, ControlMessage::Hello { .. }), "got {hello}");
        self.reply_to(&hello).await;
        hello
    }

    pub async fn reply_to(&mut self, hello: &ControlMessage) {
        let reply = self.handshake.respond(hello).unwrap();
        self.keys = reply.keys;
        self.send_control(&reply.message).await;
    }

    /// Acknowledge probes until the stream request, then open the streams.
    pub async fn open_streams(&mut self) -> ControlMessage {
        loop {
            match self.expect_control().await {
                ControlMessage::Probe { .. } => {}
                request @ ControlMessage::StreamRequest { .. } => {
                    self.send_control(&ControlMessage::StreamReady {
                        audio_channels: 2,
                        audio_rate: 48000,
                    })
                    .await;
                    return request;
                }
                other => panic!("unexpected message before stream request: {other}"),
            }
        }
    }

    /// Full console side of connect, handshake, probe and stream setup.
    pub async fn serve_until_streaming(&mut self) -> ControlMessage {
        self.accept().await;
        self.answer_hello().await;
        self.open_streams().await
    }

    /// Seal and send one AV unit.
    pub async fn send_unit(&mut self, content: ContentType, header: AvHeader, unit: &[u8]) {
        let pkt = self.sealed_unit(content, header, unit);
        self.send_raw(&pkt).await;
    }

    pub fn sealed_unit(&self, content: ContentType, header: AvHeader, unit: &[u8]) -> Vec<u8> {
        let header = match content {
            ContentType::Video => PacketHeader::Video(header),
            _ => PacketHeader::Audio(header),
        };
        let mut pkt = self.framer.build(&header, unit).unwrap();
        let layout = self.framer.layout(content).unwrap();
        self.keys
            .as_ref()
            .expect("handshake not done")
            .seal(&mut pkt, &layout)
            .unwrap();
        pkt
    }

    pub async fn send_raw(&mut self, datagram: &[u8]) {
        let (addr, _) = self.client();
        self.socket.send_to(datagram, addr).await.unwrap();
    }
}
