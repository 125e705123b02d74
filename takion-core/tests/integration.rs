//! Integration tests: full sessions against an in-process console over
//! loopback UDP, covering the lifecycle, media paths and error scenarios.

mod support;

use std::time::Duration;

use support::{
    FixedEncoder, MockConsole, connect_info, next_event, next_lifecycle_event, sinks,
};
use takion_core::{
    AvHeader, ConsoleGeneration, ConsoleHandshake, ContentType, ControlMessage, Credentials,
    FecCodec, FecFailure, FecParam, QualityEvent, QuitReason, Session, SessionEvent,
    SessionPhase, TakionError, UnitsWord,
};
use tokio::net::UdpSocket;

// ── Helpers ──────────────────────────────────────────────────────

fn av_header(frame_index: u16, packet_index: u16, fec: FecParam, total: u16, idx: u8) -> AvHeader {
    AvHeader {
        packet_index,
        frame_index,
        units: UnitsWord::new(fec, total, idx).unwrap(),
        codec: 1,
        tag: [0; 4],
        key_pos: 0,
    }
}

/// 2 source + 1 parity video units of 16 bytes.
fn video_frame(seed: u8) -> Vec<Vec<u8>> {
    let mut units = vec![vec![seed; 16], vec![seed ^ 0xFF; 16]];
    FecCodec::new(16).encode(&mut units, 2, 1).unwrap();
    units
}

fn two_one() -> FecParam {
    FecParam::from_split(0x10, 2, 1).unwrap()
}

async fn expect_streaming(events: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
    assert_eq!(
        next_event(events).await,
        Some(SessionEvent::AudioFormat {
            channels: 2,
            rate: 48000
        })
    );
    assert_eq!(next_event(events).await, Some(SessionEvent::Connected));
}

async fn expect_disconnected(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    reason: QuitReason,
) {
    match next_lifecycle_event(events).await {
        Some(SessionEvent::Disconnected { reason: got, detail }) => {
            assert_eq!(got, reason, "detail: {detail}")
        }
        other => panic!("expected Disconnected({reason}), got {other:?}"),
    }
    assert_eq!(next_lifecycle_event(events).await, None, "Disconnected must be last");
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_and_stop_legacy() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );

    let request = console.serve_until_streaming().await;
    assert!(matches!(request, ControlMessage::StreamRequest { mtu: 1454, .. }));
    expect_streaming(&mut events).await;
    assert_eq!(handle.wait_for_phase(SessionPhase::Streaming).await, SessionPhase::Streaming);

    // 2 channels x 10 samples make one frame
    assert_eq!(handle.mic().push_pcm(&[7; 20]).unwrap(), 1);
    let pkt = console.expect_media(ContentType::Audio).await;
    assert_eq!(pkt.len(), 19 + 120);
    assert_eq!(&pkt[1..5], &[0, 0, 0, 1]);
    assert_eq!(&pkt[5..9], &[0x00, 0x02, 0x28, 0x21]);
    let layout = console.framer.layout(ContentType::Audio).unwrap();
    let plain = console.keys.as_ref().unwrap().open(&pkt, &layout).unwrap();
    assert_eq!(plain[18], 0);
    assert_eq!(&plain[19..59], &[7; 40]);

    handle.stop();
    handle.stop();
    assert!(!console.expect_disconnect().await.is_empty());
    expect_disconnected(&mut events, QuitReason::Stopped).await;
    handle.closed().await;
    assert_eq!(handle.phase(), SessionPhase::Closed);
    handle.stop();
}

#[tokio::test]
async fn test_newer_generation_pads_audio_header() {
    let mut console = MockConsole::bind(ConsoleGeneration::Newer).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Newer),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.serve_until_streaming().await;
    expect_streaming(&mut events).await;

    handle.mic().push_pcm(&[9; 20]).unwrap();
    let pkt = console.expect_media(ContentType::Audio).await;
    assert_eq!(pkt.len(), 20 + 120);
    let layout = console.framer.layout(ContentType::Audio).unwrap();
    let plain = console.keys.as_ref().unwrap().open(&pkt, &layout).unwrap();
    assert_eq!(plain[19], 0);
    assert_eq!(&plain[20..60], &[9; 40]);

    handle.stop();
    expect_disconnected(&mut events, QuitReason::Stopped).await;
}

#[tokio::test]
async fn test_feedback_carries_controller_state() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.serve_until_streaming().await;
    expect_streaming(&mut events).await;

    handle.set_controller_state(takion_core::ControllerState {
        buttons: 0x0000_0010,
        ..Default::default()
    });
    handle.set_haptics(takion_core::HapticsState { left: 1, right: 2 });
    let layout = console.framer.layout(ContentType::FeedbackState).unwrap();
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let pkt = console.expect_media(ContentType::FeedbackState).await;
            let plain = console.keys.as_ref().unwrap().open(&pkt, &layout).unwrap();
            if plain[12..16] == [0, 0, 0, 0x10] && plain[26..28] == [1, 2] {
                return;
            }
        }
    })
    .await;
    assert!(found.is_ok(), "controller state never sent");

    handle.stop();
    expect_disconnected(&mut events, QuitReason::Stopped).await;
}

#[tokio::test]
async fn test_login_pin_flow() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.accept().await;
    let hello = console.expect_control().await;

    console
        .send_control(&ControlMessage::LoginPinRequired { incorrect: false })
        .await;
    assert_eq!(
        next_event(&mut events).await,
        Some(SessionEvent::LoginPinRequested { incorrect: false })
    );
    handle.set_login_pin("0000").unwrap();
    assert_eq!(
        console.expect_control().await,
        ControlMessage::LoginPin { pin: "0000".into() }
    );

    console
        .send_control(&ControlMessage::LoginPinRequired { incorrect: true })
        .await;
    assert_eq!(
        next_event(&mut events).await,
        Some(SessionEvent::LoginPinRequested { incorrect: true })
    );
    handle.set_login_pin("4711").unwrap();
    assert_eq!(
        console.expect_control().await,
        ControlMessage::LoginPin { pin: "4711".into() }
    );

    console.reply_to(&hello).await;
    console.open_streams().await;
    expect_streaming(&mut events).await;

    handle.stop();
    expect_disconnected(&mut events, QuitReason::Stopped).await;
}

// ── Inbound media ────────────────────────────────────────────────

#[tokio::test]
async fn test_fec_recovery_and_unrecoverable_frame() {
    let mut console = MockConsole::bind(ConsoleGeneration::Newer).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Newer),
        video.clone(),
        audio.clone(),
        Box::new(FixedEncoder),
    );
    console.serve_until_streaming().await;
    expect_streaming(&mut events).await;

    // Audio 1:2, source unit lost: rebuilt from parity.
    let mut audio_frame = vec![0u8; 3 * 40];
    audio_frame[..40].copy_from_slice(&[0xA5; 40]);
    FecCodec::new(40).encode_frame(&mut audio_frame, 1, 2).unwrap();
    console
        .send_unit(ContentType::Audio, av_header(1, 1, FecParam::AUDIO, 3, 2), &audio_frame[80..])
        .await;
    let frames = audio.wait_for(1).await;
    assert!(frames[0].recovered);
    assert_eq!(&frames[0].data[..], &[0xA5; 40]);

    // Video frame 10 loses a source unit, frame 11 loses two of three.
    let f10 = video_frame(0x10);
    console.send_unit(ContentType::Video, av_header(10, 0, two_one(), 3, 0), &f10[0]).await;
    console.send_unit(ContentType::Video, av_header(10, 1, two_one(), 3, 2), &f10[2]).await;
    let f11 = video_frame(0x11);
    console.send_unit(ContentType::Video, av_header(11, 3, two_one(), 3, 0), &f11[0]).await;

    let frames = video.wait_for(1).await;
    assert_eq!(frames[0].frame_index, 10);
    assert!(frames[0].recovered);
    assert_eq!(&frames[0].data[..16], &f10[0][..]);
    assert_eq!(&frames[0].data[16..], &f10[1][..]);

    // Later frames push 11 out of the reassembly window.
    let mut packet_index = 6;
    for frame_index in 12..=15u16 {
        let units = video_frame(frame_index as u8);
        for idx in 0..2u8 {
            console
                .send_unit(
                    ContentType::Video,
                    av_header(frame_index, packet_index, two_one(), 3, idx),
                    &units[usize::from(idx)],
                )
                .await;
            packet_index += 1;
        }
    }
    match next_event(&mut events).await {
        Some(SessionEvent::Quality(QualityEvent::FrameDropped {
            content,
            frame_index,
            reason,
        })) => {
            assert_eq!(content, ContentType::Video);
            assert_eq!(frame_index, 11);
            assert_eq!(reason, FecFailure::TooManyMissing { missing: 2, parity: 1 });
        }
        other => panic!("expected a dropped frame, got {other:?}"),
    }
    let frames = video.wait_for(5).await;
    assert_eq!(
        frames.iter().map(|f| f.frame_index).collect::<Vec<_>>(),
        vec![10, 12, 13, 14, 15]
    );
    assert_eq!(handle.phase(), SessionPhase::Streaming);

    handle.stop();
    expect_disconnected(&mut events, QuitReason::Stopped).await;
}

#[tokio::test]
async fn test_auth_failure_burst_is_connection_lost() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video.clone(),
        audio,
        Box::new(FixedEncoder),
    );
    console.serve_until_streaming().await;
    expect_streaming(&mut events).await;

    let units = video_frame(1);
    for i in 0..5u16 {
        let mut pkt = console.sealed_unit(ContentType::Video, av_header(i, i, two_one(), 3, 0), &units[0]);
        let last = pkt.len() - 1;
        pkt[last] ^= 0x01;
        console.send_raw(&pkt).await;
    }
    expect_disconnected(&mut events, QuitReason::ConnectionLost).await;
    handle.closed().await;
    assert_eq!(handle.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn test_console_rekey_keeps_stream_alive() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video.clone(),
        audio,
        Box::new(FixedEncoder),
    );
    console.serve_until_streaming().await;
    expect_streaming(&mut events).await;

    console.send_control(&ControlMessage::Rekey { epoch: 1 }).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    console.keys.as_ref().unwrap().rotate(1).unwrap();

    let units = video_frame(3);
    console.send_unit(ContentType::Video, av_header(1, 0, two_one(), 3, 0), &units[0]).await;
    console.send_unit(ContentType::Video, av_header(1, 1, two_one(), 3, 1), &units[1]).await;
    let frames = video.wait_for(1).await;
    assert!(!frames[0].recovered);

    handle.stop();
    expect_disconnected(&mut events, QuitReason::Stopped).await;
}

// ── Teardown paths ───────────────────────────────────────────────

#[tokio::test]
async fn test_handshake_timeout_reported_once() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(silent.local_addr().unwrap(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    expect_disconnected(&mut events, QuitReason::HandshakeTimeout).await;
    handle.closed().await;
    handle.stop();
    handle.stop();
    assert_eq!(handle.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn test_unanswered_hello_is_handshake_timeout() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (_handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    // INIT answered, hello never acknowledged.
    console.accept().await;
    expect_disconnected(&mut events, QuitReason::HandshakeTimeout).await;
}

#[tokio::test]
async fn test_version_mismatch() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    console.handshake = ConsoleHandshake::new(support::credentials()).with_version(7);
    let (video, audio) = sinks();
    let (_handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.accept().await;
    console.answer_hello().await;
    expect_disconnected(&mut events, QuitReason::VersionMismatch).await;
}

#[tokio::test]
async fn test_wrong_credentials() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    console.handshake = ConsoleHandshake::new(Credentials {
        regist_key: b"someone-else".to_vec(),
        morning: [0x3C; 16],
    });
    let (video, audio) = sinks();
    let (_handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.accept().await;
    console.answer_hello().await;
    expect_disconnected(&mut events, QuitReason::AuthFailed).await;
}

#[tokio::test]
async fn test_peer_disconnect() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (_handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.serve_until_streaming().await;
    expect_streaming(&mut events).await;
    console.send_disconnect("shutting down").await;
    match next_lifecycle_event(&mut events).await {
        Some(SessionEvent::Disconnected { reason, detail }) => {
            assert_eq!(reason, QuitReason::PeerDisconnect);
            assert_eq!(detail, "shutting down");
        }
        other => panic!("expected Disconnected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_instead_of_hello_ack() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (_handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.accept().await;
    let hello = console.hold_control().await;
    assert!(matches!(hello, ControlMessage::Hello { .. }), "got {hello}");
    console.send_disconnect("console busy: shutting down").await;
    match next_lifecycle_event(&mut events).await {
        Some(SessionEvent::Disconnected { reason, detail }) => {
            assert_eq!(reason, QuitReason::PeerDisconnect);
            assert_eq!(detail, "console busy: shutting down");
        }
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert_eq!(next_lifecycle_event(&mut events).await, None);
}

#[tokio::test]
async fn test_go_to_bed_refused_before_streaming() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.accept().await;
    let hello = console.expect_control().await;
    assert!(matches!(
        handle.go_to_bed(),
        Err(TakionError::InvalidState(_))
    ));

    // The refused request is not replayed once the stream is up.
    console.reply_to(&hello).await;
    console.open_streams().await;
    expect_streaming(&mut events).await;
    handle.stop();
    expect_disconnected(&mut events, QuitReason::Stopped).await;
}

#[tokio::test]
async fn test_go_to_bed_sends_standby() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.serve_until_streaming().await;
    expect_streaming(&mut events).await;

    handle.go_to_bed().unwrap();
    assert_eq!(console.expect_control().await, ControlMessage::Standby);
    expect_disconnected(&mut events, QuitReason::Standby).await;
    handle.closed().await;
}

#[tokio::test]
async fn test_stop_during_handshake() {
    let mut console = MockConsole::bind(ConsoleGeneration::Legacy).await;
    let (video, audio) = sinks();
    let (handle, mut events) = Session::start(
        connect_info(console.addr(), ConsoleGeneration::Legacy),
        video,
        audio,
        Box::new(FixedEncoder),
    );
    console.accept().await;
    let _hello = console.expect_control().await;
    console
        .send_control(&ControlMessage::LoginPinRequired { incorrect: false })
        .await;
    assert_eq!(
        next_event(&mut events).await,
        Some(SessionEvent::LoginPinRequested { incorrect: false })
    );
    handle.stop();
    expect_disconnected(&mut events, QuitReason::Stopped).await;
    assert!(!console.expect_disconnect().await.is_empty());
}
