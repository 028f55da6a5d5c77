//! WebSocket signaling channel against an in-process relay.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use voxlane_client::{SignalingChannel, SignalingEvent};
use voxlane_common::{Error, IceCandidate, SessionDescription, SignalingMessage};

const WAIT: Duration = Duration::from_secs(5);

async fn relay() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}/ws"))
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<SignalingEvent>) -> SignalingEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for signaling event")
        .expect("event stream closed")
}

#[tokio::test]
async fn test_send_uses_envelope() {
    let (listener, url) = relay().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        match ws.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            other => panic!("unexpected frame: {other:?}"),
        }
    });

    let channel = SignalingChannel::connect(&url).await.unwrap();
    assert!(channel.is_open());
    assert_eq!(channel.endpoint(), url);
    channel
        .send(SignalingMessage::Offer(SessionDescription::offer("v=0")))
        .unwrap();

    let text = timeout(WAIT, server).await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "offer");
    assert_eq!(value["payload"]["type"], "offer");
    assert_eq!(value["payload"]["sdp"], "v=0");
}

#[tokio::test]
async fn test_receive_drops_malformed_and_unknown_frames() {
    let (listener, url) = relay().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let frames = [
            r#"{"type":"answer","payload":{"type":"answer","sdp":"v=0"}}"#,
            "{not json",
            r#"{"type":"bye"}"#,
            r#"{"type":"answer","payload":{"type":"offer","sdp":"v=0"}}"#,
            r#"{"type":"ice-candidate","payload":{"candidate":"candidate:1","sdpMid":"0","sdpMLineIndex":0}}"#,
            r#"{"candidate":"candidate:2","sdpMid":null,"sdpMLineIndex":0}"#,
        ];
        for frame in frames {
            ws.send(Message::text(frame)).await.unwrap();
        }
        ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let channel = SignalingChannel::connect(&url).await.unwrap();
    let mut events = channel.event_stream().unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Message(SignalingMessage::Answer(SessionDescription::answer("v=0")))
    );
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Message(SignalingMessage::IceCandidate(IceCandidate {
            candidate: "candidate:1".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }))
    );
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Message(SignalingMessage::IceCandidate(IceCandidate {
            candidate: "candidate:2".to_string(),
            sdp_mid: None,
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }))
    );
    match next_event(&mut events).await {
        SignalingEvent::Disconnected { reason } => assert!(reason.contains("closed by relay")),
        other => panic!("expected disconnect, got {other:?}"),
    }

    assert!(!channel.is_open());
    assert_eq!(
        channel.send(SignalingMessage::Answer(SessionDescription::answer("v=0"))),
        Err(Error::NotConnected)
    );
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_local_close_reports_disconnect_once() {
    let (listener, url) = relay().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        while let Some(Ok(frame)) = ws.next().await {
            if frame.is_close() {
                break;
            }
        }
    });

    let channel = SignalingChannel::connect(&url).await.unwrap();
    let mut events = channel.event_stream().unwrap();

    channel.close();
    channel.close();
    assert!(!channel.is_open());

    match next_event(&mut events).await {
        SignalingEvent::Disconnected { reason } => assert_eq!(reason, "closed locally"),
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert!(timeout(WAIT, events.recv()).await.unwrap().is_none());

    let err = channel
        .send(SignalingMessage::Offer(SessionDescription::offer("v=0")))
        .unwrap_err();
    assert_eq!(err, Error::NotConnected);
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_single_message_handler() {
    let (listener, url) = relay().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let channel = SignalingChannel::connect(&url).await.unwrap();
    channel.on_message(|_| {}).unwrap();
    assert!(matches!(
        channel.event_stream(),
        Err(Error::Transport(_))
    ));
}

#[tokio::test]
async fn test_unreachable_relay_is_transport_error() {
    let (listener, url) = relay().await;
    drop(listener);

    let err = SignalingChannel::connect(&url).await.err().unwrap();
    assert!(matches!(err, Error::Transport(_)));

    let err = SignalingChannel::connect("http://127.0.0.1:1/ws")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Transport(_)));
}
