//! End-to-end integration tests for WebShell.
//!
//! These tests verify complete flows work correctly:
//! - Daemon startup and shutdown
//! - Terminal sessions over a real WebSocket and a real `/bin/sh`
//! - Teardown from either side
//! - File and directory endpoints

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use daemon::config::Config;
use daemon::orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
use daemon::router::{build_router, AppState};
use futures_util::{SinkExt, StreamExt};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use protocol::ServerMessage;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a test configuration with a temporary home directory.
fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.daemon.home_dir = Some(temp_dir.path().to_path_buf());
    config.server.http_addr = "127.0.0.1:0".parse().unwrap();
    config.server.static_dir = temp_dir.path().join("static");
    config.session.shell = "/bin/sh".to_string();
    config.session.shell_args = vec![];
    config.session.teardown_timeout_ms = 2000;
    (config, temp_dir)
}

async fn start_daemon(config: Config) -> (DaemonOrchestrator, SocketAddr) {
    let mut orchestrator = DaemonOrchestrator::new(config).unwrap();
    orchestrator.start().await.unwrap();
    let addr = orchestrator.http_addr().unwrap();
    (orchestrator, addr)
}

async fn connect(addr: SocketAddr, path: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{}{}", addr, path))
        .await
        .unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, json: &str) {
    ws.send(Message::Text(json.into())).await.unwrap();
}

/// Next server frame, or `None` once the server closed the channel.
async fn next_frame(ws: &mut WsStream) -> Option<ServerMessage> {
    loop {
        match timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
        {
            Some(Ok(Message::Text(text))) => {
                return Some(ServerMessage::decode(text.as_str()).unwrap())
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Collects output text until it contains `marker`.
async fn read_until(ws: &mut WsStream, marker: &str) -> (String, Vec<ServerMessage>) {
    let mut text = String::new();
    let mut frames = Vec::new();
    while !text.contains(marker) {
        let frame = next_frame(ws)
            .await
            .unwrap_or_else(|| panic!("channel closed before {:?}; saw {:?}", marker, text));
        if let Some(output) = frame.output() {
            text.push_str(output);
        }
        frames.push(frame);
    }
    (text, frames)
}

/// Waits for the server to close the channel, returning the frames seen first.
async fn read_to_close(ws: &mut WsStream) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Some(frame) = next_frame(ws).await {
        frames.push(frame);
    }
    frames
}

async fn next_session_event(
    events: &mut broadcast::Receiver<OrchestratorEvent>,
) -> OrchestratorEvent {
    loop {
        let event = timeout(FRAME_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for an event")
            .unwrap();
        match event {
            OrchestratorEvent::SessionOpened { .. } | OrchestratorEvent::SessionClosed { .. } => {
                return event
            }
            _ => continue,
        }
    }
}

async fn process_gone(pid: u32) -> bool {
    for _ in 0..40 {
        if kill(Pid::from_raw(pid as i32), None).is_err() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// =============================================================================
// Orchestrator Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_orchestrator_state_starts_stopped() {
    let (config, _temp_dir) = create_test_config();

    let orchestrator = DaemonOrchestrator::new(config).unwrap();

    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
}

#[tokio::test]
async fn test_orchestrator_start_stop() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;
    assert_eq!(orchestrator.state().await, OrchestratorState::Running);

    let stream = TcpStream::connect(addr).await;
    assert!(stream.is_ok());

    orchestrator.stop().await.unwrap();
    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
}

// =============================================================================
// Terminal Session Tests
// =============================================================================

#[tokio::test]
async fn test_echo_round_trip() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut ws = connect(addr, "/ws").await;
    send_json(&mut ws, r#"{"input":"echo e2e_$((6*7))\n"}"#).await;

    let (text, frames) = read_until(&mut ws, "e2e_42").await;
    assert!(text.contains("e2e_42"));
    assert!(frames
        .iter()
        .any(|f| matches!(f, ServerMessage::Output { .. })));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_upgrade_at_root() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut ws = connect(addr, "/").await;
    send_json(&mut ws, r#"{"input":"echo root_$((1+1))\n"}"#).await;
    let (text, _) = read_until(&mut ws, "root_2").await;
    assert!(text.contains("root_2"));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_command_is_classified_as_error() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut ws = connect(addr, "/ws").await;
    send_json(
        &mut ws,
        r#"{"input":"cat /definitely/missing/file\n"}"#,
    )
    .await;

    let (_, frames) = read_until(&mut ws, "No such file").await;
    assert!(frames
        .iter()
        .any(|f| matches!(f, ServerMessage::Error { .. })));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_resize_then_input_applies_in_order() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut ws = connect(addr, "/ws").await;
    send_json(&mut ws, r#"{"resize":[100,40]}"#).await;
    send_json(&mut ws, r#"{"input":"stty size\n"}"#).await;

    let (text, _) = read_until(&mut ws, "40 100").await;
    assert!(text.contains("40 100"));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frames_do_not_end_session() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut ws = connect(addr, "/ws").await;
    send_json(&mut ws, "this is not json").await;
    send_json(&mut ws, "{}").await;
    send_json(&mut ws, r#"{"resize":[0,0]}"#).await;
    ws.send(Message::Binary(br#"{"input":"echo bin_$((2+3))\n"}"#.to_vec().into()))
        .await
        .unwrap();

    let (text, _) = read_until(&mut ws, "bin_5").await;
    assert!(text.contains("bin_5"));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_disconnect_kills_shell() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;
    let mut events = orchestrator.subscribe();

    let mut ws = connect(addr, "/ws").await;
    let pid = match next_session_event(&mut events).await {
        OrchestratorEvent::SessionOpened { pid, .. } => pid.unwrap(),
        other => panic!("unexpected event {:?}", other),
    };

    send_json(&mut ws, r#"{"input":"echo ready_$((3*3))\n"}"#).await;
    read_until(&mut ws, "ready_9").await;

    // Abrupt close: no close frame, just the TCP connection going away.
    drop(ws);

    match next_session_event(&mut events).await {
        OrchestratorEvent::SessionClosed { .. } => {}
        other => panic!("unexpected event {:?}", other),
    }
    assert!(process_gone(pid).await, "shell {} still running", pid);
    for _ in 0..40 {
        if orchestrator.session_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(orchestrator.session_count(), 0);

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_graceful_client_close() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;
    let mut events = orchestrator.subscribe();

    let mut ws = connect(addr, "/ws").await;
    let pid = match next_session_event(&mut events).await {
        OrchestratorEvent::SessionOpened { pid, .. } => pid.unwrap(),
        other => panic!("unexpected event {:?}", other),
    };

    ws.close(None).await.unwrap();

    assert!(matches!(
        next_session_event(&mut events).await,
        OrchestratorEvent::SessionClosed { .. }
    ));
    assert!(process_gone(pid).await);

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_shell_exit_closes_channel() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;
    let mut events = orchestrator.subscribe();

    let mut ws = connect(addr, "/ws").await;
    send_json(&mut ws, r#"{"input":"echo bye_$((5+5)); exit 0\n"}"#).await;

    let frames = read_to_close(&mut ws).await;
    let text: String = frames.iter().filter_map(|f| f.output()).collect();
    assert!(text.contains("bye_10"), "output was {:?}", text);
    // Silent close by default.
    assert!(!frames
        .iter()
        .any(|f| matches!(f, ServerMessage::Exit { .. })));

    loop {
        if let OrchestratorEvent::SessionClosed { exit, .. } = next_session_event(&mut events).await
        {
            assert_eq!(exit.and_then(|e| e.code), Some(0));
            break;
        }
    }

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_exit_notification() {
    let (mut config, _temp_dir) = create_test_config();
    config.session.notify_exit = true;
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut ws = connect(addr, "/ws").await;
    send_json(&mut ws, r#"{"input":"exit 3\n"}"#).await;

    let frames = read_to_close(&mut ws).await;
    assert_eq!(
        frames.last(),
        Some(&ServerMessage::Exit {
            code: Some(3),
            signal: None
        })
    );

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure_reports_error() {
    let (mut config, _temp_dir) = create_test_config();
    config.session.shell = "/nonexistent/shell".to_string();
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut ws = connect(addr, "/ws").await;
    let frames = read_to_close(&mut ws).await;

    assert_eq!(frames.len(), 1, "frames were {:?}", frames);
    assert!(matches!(&frames[0], ServerMessage::Error { .. }));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_terminates_sessions() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;
    let mut events = orchestrator.subscribe();

    let mut ws = connect(addr, "/ws").await;
    let pid = match next_session_event(&mut events).await {
        OrchestratorEvent::SessionOpened { pid, .. } => pid.unwrap(),
        other => panic!("unexpected event {:?}", other),
    };

    orchestrator.stop().await.unwrap();

    read_to_close(&mut ws).await;
    assert!(process_gone(pid).await);
}

#[tokio::test]
async fn test_stop_waits_for_sessions_to_finish() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;
    let mut events = orchestrator.subscribe();

    // The client never reads, so the session only finishes via its own teardown.
    let _ws = connect(addr, "/ws").await;
    let pid = match next_session_event(&mut events).await {
        OrchestratorEvent::SessionOpened { pid, .. } => pid.unwrap(),
        other => panic!("unexpected event {:?}", other),
    };

    orchestrator.stop().await.unwrap();

    // Everything happened before stop() returned.
    assert_eq!(orchestrator.session_count(), 0);
    let mut closed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, OrchestratorEvent::SessionClosed { .. }) {
            closed = true;
        }
    }
    assert!(closed, "stop() returned before the session closed");
    assert!(process_gone(pid).await);
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut first = connect(addr, "/ws").await;
    let mut second = connect(addr, "/ws").await;

    send_json(&mut first, r#"{"input":"X=one; echo first_$X\n"}"#).await;
    send_json(&mut second, r#"{"input":"echo second_${X:-unset}\n"}"#).await;

    let (text, _) = read_until(&mut first, "first_one").await;
    assert!(text.contains("first_one"));
    let (text, _) = read_until(&mut second, "second_unset").await;
    assert!(text.contains("second_unset"));

    orchestrator.stop().await.unwrap();
}

// =============================================================================
// HTTP Endpoint Tests
// =============================================================================

fn test_router(config: &Config) -> axum::Router {
    let (events, _) = broadcast::channel(16);
    let state = AppState::from_config(config, CancellationToken::new(), events).unwrap();
    build_router(state, &config.server)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn max_depth(entries: &serde_json::Value) -> usize {
    entries
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e.get("contents"))
        .map(|children| 1 + max_depth(children))
        .max()
        .unwrap_or(0)
}

#[tokio::test]
async fn test_directory_depth_is_limited() {
    let (config, temp_dir) = create_test_config();
    std::fs::create_dir_all(temp_dir.path().join("tree/a/b/c/d/e/f/g")).unwrap();
    std::fs::write(temp_dir.path().join("tree/a/b/c/d/e/f/g/leaf.txt"), "x").unwrap();

    let (status, body) = get_json(test_router(&config), "/directory?dirPath=tree").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(max_depth(&body["contents"]), 5);
    assert!(!body.to_string().contains("leaf.txt"));
}

#[tokio::test]
async fn test_file_round_trip_over_http() {
    let (config, temp_dir) = create_test_config();

    let response = test_router(&config)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/file")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"filepath":"todo.txt","content":"ship it\n"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(temp_dir.path().join("todo.txt").exists());

    let (status, body) = get_json(test_router(&config), "/file?filepath=todo.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "ship it\n");
}

#[tokio::test]
async fn test_session_count_tracks_open_sessions() {
    let (config, _temp_dir) = create_test_config();
    let (mut orchestrator, addr) = start_daemon(config).await;

    let mut ws = connect(addr, "/ws").await;
    send_json(&mut ws, r#"{"input":"echo up_$((4+4))\n"}"#).await;
    read_until(&mut ws, "up_8").await;
    assert_eq!(orchestrator.session_count(), 1);

    orchestrator.stop().await.unwrap();
}
