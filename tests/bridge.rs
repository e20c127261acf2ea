//! End-to-end tests: client → bridge → h2c upstream over unix sockets, plus
//! TCP listeners in front of a unix upstream.

#![cfg(unix)]

use std::time::Duration;

use http_body_util::BodyExt;
use hyper::header::HOST;
use hyper::{StatusCode, Version};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use h2c_bridge::config::HostRewriteMode;
use h2c_bridge::lifecycle::{Lifecycle, ServerState, ShutdownError};
use h2c_bridge::BridgeError;

mod common;
use common::*;

#[tokio::test]
async fn h2_request_is_rewritten_to_localhost() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;
    let bridge = start_bridge(bridge_config(&listen, &upstream)).await;

    let mut client = h2_client(&listen).await;
    let response = client
        .send_request(get("http://original.example/echo"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.version(), Version::HTTP_2);
    assert_eq!(response.headers()[SEEN_HOST], "localhost");
    assert_eq!(response.headers()[SEEN_FORWARDED_HOST], "original.example");
    assert_eq!(response.headers()[SEEN_FORWARDED_FOR], "");

    drop(client);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn http1_request_is_forwarded_as_h2c() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;
    let bridge = start_bridge(bridge_config(&listen, &upstream)).await;

    let mut client = http1_client(&listen).await;
    let mut request = get("/echo");
    request
        .headers_mut()
        .insert(HOST, "original.example".parse().unwrap());
    let response = client.send_request(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-upstream"], "h2c");
    assert_eq!(response.headers()[SEEN_HOST], "localhost");
    assert_eq!(response.headers()[SEEN_FORWARDED_HOST], "original.example");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "hello from upstream");

    drop(client);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn host_is_kept_when_rewriting_is_off() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;

    let mut config = bridge_config(&listen, &upstream);
    config.host_rewrite.mode = HostRewriteMode::Off;
    let bridge = start_bridge(config).await;

    let mut client = h2_client(&listen).await;
    let response = client
        .send_request(get("http://original.example/echo"))
        .await
        .unwrap();

    assert_eq!(response.headers()[SEEN_HOST], "original.example");
    assert_eq!(response.headers()[SEEN_FORWARDED_HOST], "");

    drop(client);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn response_is_streamed_back_unchanged() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;
    let bridge = start_bridge(bridge_config(&listen, &upstream)).await;

    let mut client = h2_client(&listen).await;
    let response = client
        .send_request(get("http://original.example/large"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-upstream"], "h2c");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), LARGE_BODY_LEN);
    assert_eq!(body, large_body());

    drop(client);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn dead_upstream_yields_bad_gateway_and_server_keeps_serving() {
    let upstream = temp_socket("missing-upstream");
    let listen = temp_socket("bridge");
    let bridge = start_bridge(bridge_config(&listen, &upstream)).await;

    let mut client = h2_client(&listen).await;
    for _ in 0..2 {
        let response = client
            .send_request(get("http://original.example/echo"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "Upstream request failed");
    }

    assert_eq!(
        *bridge.lifecycle.state().borrow(),
        ServerState::Listening
    );

    drop(client);
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn readiness_wait_succeeds_once_upstream_appears() {
    let upstream = temp_socket("late-upstream");
    let listen = temp_socket("bridge");

    let mut config = bridge_config(&listen, &upstream);
    config.upstream.readiness_timeout_secs = 10;

    let lifecycle = Lifecycle::new();
    let mut state = lifecycle.state();
    let runner = lifecycle.clone();
    let task = tokio::spawn(async move { runner.run(config).await });

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(*state.borrow(), ServerState::Initializing);
    assert!(!listen.exists());

    let _upstream = spawn_h2c_upstream(&upstream).await;
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ServerState::Listening),
    )
    .await
    .expect("bridge did not become ready")
    .unwrap();

    lifecycle.shutdown().trigger();
    task.await.unwrap().unwrap();
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn readiness_timeout_fails_without_binding() {
    let upstream = temp_socket("never-upstream");
    let listen = temp_socket("bridge");

    let mut config = bridge_config(&listen, &upstream);
    config.upstream.readiness_timeout_secs = 1;

    let lifecycle = Lifecycle::new();
    let err = lifecycle.run(config).await.unwrap_err();

    assert!(matches!(err, BridgeError::Readiness(_)));
    assert_eq!(*lifecycle.state().borrow(), ServerState::Failed);
    assert!(!listen.exists());
}

#[tokio::test]
async fn idle_shutdown_is_clean_and_removes_socket() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;
    let bridge = start_bridge(bridge_config(&listen, &upstream)).await;
    assert!(listen.exists());

    let state = bridge.lifecycle.state();
    bridge.stop().await.unwrap();

    assert_eq!(*state.borrow(), ServerState::Stopped);
    assert!(!listen.exists());
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn in_flight_request_finishes_during_drain() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;
    let bridge = start_bridge(bridge_config(&listen, &upstream)).await;

    let mut client = h2_client(&listen).await;
    let mut request = get("http://original.example/echo");
    request
        .headers_mut()
        .insert(DELAY_MS, "800".parse().unwrap());
    let in_flight = tokio::spawn(async move {
        let response = client.send_request(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let shutdown = tokio::spawn(bridge.stop());

    let (status, body) = in_flight.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello from upstream");

    shutdown.await.unwrap().unwrap();
    assert!(!listen.exists());
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn stream_outliving_grace_period_is_reported() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;

    let mut config = bridge_config(&listen, &upstream);
    config.shutdown.grace_secs = 1;
    let bridge = start_bridge(config).await;

    let mut client = h2_client(&listen).await;
    let mut request = get("http://original.example/echo");
    request
        .headers_mut()
        .insert(DELAY_MS, "4000".parse().unwrap());
    let _in_flight = tokio::spawn(async move { client.send_request(request).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = bridge.lifecycle.state();
    let err = bridge.stop().await.unwrap_err();

    assert!(matches!(
        err,
        BridgeError::Shutdown(ShutdownError::DrainTimeout { open: 1, .. })
    ));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(*state.borrow(), ServerState::Failed);
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn http1_socket_path_host_is_rewritten_when_non_compliant() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;

    let mut config = bridge_config(&listen, &upstream);
    config.host_rewrite.mode = HostRewriteMode::OnlyIfNonCompliant;
    let bridge = start_bridge(config).await;

    let mut client = http1_client(&listen).await;
    let mut request = get("/echo");
    request
        .headers_mut()
        .insert(HOST, "/tmp/csi.sock".parse().unwrap());
    let response = client.send_request(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SEEN_HOST], "localhost");
    assert_eq!(response.headers()[SEEN_FORWARDED_HOST], "/tmp/csi.sock");

    drop(client);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}

/// HTTP/2 cannot carry a socket path as `:authority`: the stream is reset
/// before the request is proxied, even when rewriting would repair it.
#[tokio::test]
async fn h2_socket_path_authority_is_reset() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;

    let mut config = bridge_config(&listen, &upstream);
    config.host_rewrite.mode = HostRewriteMode::OnlyIfNonCompliant;
    let bridge = start_bridge(config).await;

    let mut stream = UnixStream::connect(&listen).await.unwrap();
    stream.write_all(H2_PREFACE).await.unwrap();
    stream
        .write_all(&encode_frame(FRAME_SETTINGS, 0, 0, &[]))
        .await
        .unwrap();

    // :method GET, :scheme http, :path "/echo", :authority "/tmp/csi.sock"
    let mut block = vec![0x82, 0x86, 0x04, 0x05];
    block.extend_from_slice(b"/echo");
    block.extend_from_slice(&[0x01, 0x0d]);
    block.extend_from_slice(b"/tmp/csi.sock");
    stream
        .write_all(&encode_frame(
            FRAME_HEADERS,
            FLAG_END_STREAM | FLAG_END_HEADERS,
            1,
            &block,
        ))
        .await
        .unwrap();

    let reset = read_until(&mut stream, |f| f.kind == FRAME_RST_STREAM && f.stream_id == 1).await;
    let code = u32::from_be_bytes([
        reset.payload[0],
        reset.payload[1],
        reset.payload[2],
        reset.payload[3],
    ]);
    assert_eq!(code, 0x1, "expected PROTOCOL_ERROR");

    drop(stream);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}

async fn read_stream_body(stream: &mut UnixStream, stream_id: u32) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let frame = read_until(stream, |f| f.kind == FRAME_DATA && f.stream_id == stream_id).await;
        body.extend_from_slice(&frame.payload);
        if frame.flags & FLAG_END_STREAM != 0 {
            return body;
        }
    }
}

#[tokio::test]
async fn http1_upgrade_to_h2c_answers_on_stream_one() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;
    let bridge = start_bridge(bridge_config(&listen, &upstream)).await;

    let mut stream = UnixStream::connect(&listen).await.unwrap();
    stream
        .write_all(
            b"GET /echo HTTP/1.1\r\n\
              Host: original.example\r\n\
              Connection: Upgrade, HTTP2-Settings\r\n\
              Upgrade: h2c\r\n\
              HTTP2-Settings: AAMAAABkAAQAAP__\r\n\
              \r\n",
        )
        .await
        .unwrap();

    let head = read_http1_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected head: {head}");
    assert!(head.to_ascii_lowercase().contains("upgrade: h2c"));

    stream.write_all(H2_PREFACE).await.unwrap();
    stream
        .write_all(&encode_frame(FRAME_SETTINGS, 0, 0, &[]))
        .await
        .unwrap();

    let response = read_until(&mut stream, |f| f.kind == FRAME_HEADERS && f.stream_id == 1).await;
    assert!(response.flags & FLAG_END_HEADERS != 0);
    assert_eq!(read_stream_body(&mut stream, 1).await, b"hello from upstream");

    // The connection keeps serving HTTP/2: GET / on stream 3.
    let mut block = vec![0x82, 0x86, 0x84, 0x01, 0x10];
    block.extend_from_slice(b"original.example");
    stream
        .write_all(&encode_frame(
            FRAME_HEADERS,
            FLAG_END_STREAM | FLAG_END_HEADERS,
            3,
            &block,
        ))
        .await
        .unwrap();
    assert_eq!(read_stream_body(&mut stream, 3).await, b"hello from upstream");

    drop(stream);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn upgrade_with_body_is_served_as_http1() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("bridge");
    let _upstream = spawn_h2c_upstream(&upstream).await;
    let bridge = start_bridge(bridge_config(&listen, &upstream)).await;

    let mut client = http1_client(&listen).await;
    let request = hyper::Request::post("/echo")
        .header(HOST, "original.example")
        .header("connection", "Upgrade, HTTP2-Settings")
        .header("upgrade", "h2c")
        .header("http2-settings", "AAMAAABkAAQAAP__")
        .body(http_body_util::Full::new(bytes::Bytes::from_static(b"payload")))
        .unwrap();
    let response = client.send_request(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.version(), Version::HTTP_11);
    assert_eq!(response.headers()[SEEN_HOST], "localhost");

    drop(client);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}

#[tokio::test]
async fn tcp_listener_forwards_to_unix_upstream_with_forwarded_for() {
    let upstream = temp_socket("upstream");
    let listen = temp_socket("unused");
    let _upstream = spawn_h2c_upstream(&upstream).await;

    let addr = format!("127.0.0.1:{}", free_tcp_port());
    let mut config = bridge_config(&listen, &upstream);
    config.listener.endpoint = format!("tcp://{addr}");
    let bridge = start_bridge(config).await;

    let mut h2 = h2_tcp_client(&addr).await;
    let response = h2
        .send_request(get("http://original.example/echo"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SEEN_HOST], "localhost");
    assert_eq!(response.headers()[SEEN_FORWARDED_FOR], "127.0.0.1");

    let mut http1 = http1_tcp_client(&addr).await;
    let mut request = get("/echo");
    request
        .headers_mut()
        .insert(HOST, "original.example".parse().unwrap());
    request
        .headers_mut()
        .insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
    let response = http1.send_request(request).await.unwrap();
    assert_eq!(response.headers()[SEEN_FORWARDED_FOR], "10.0.0.1, 127.0.0.1");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "hello from upstream");

    drop(h2);
    drop(http1);
    bridge.stop().await.unwrap();
    let _ = std::fs::remove_file(&upstream);
}
