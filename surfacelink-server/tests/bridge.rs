//! End-to-end tests over real TCP connections

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use surfacelink_client::Client;
use surfacelink_protocol::{ClientCodec, Decoded, Request, Response};
use surfacelink_server::{
    BridgeConfig, BridgeServer, CommandSpec, LinkStatus, ParamKind, ParamSchema, StaticCatalogHost,
};
use surfacelink_utils::BridgeError;

fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.transport.port = 0;
    config.transport.command_timeout_secs = 2;
    config.transport.monitor_interval_ms = 20;
    config
}

async fn start() -> BridgeServer {
    BridgeServer::start(test_config(), StaticCatalogHost::builtin())
        .await
        .unwrap()
}

async fn connect(server: &BridgeServer) -> Client {
    Client::connect(&server.local_addr().to_string(), Duration::from_secs(1))
        .await
        .unwrap()
}

fn error_message(response: &Response) -> &str {
    match response {
        Response::Error { message } => message,
        Response::Success { result } => panic!("expected error, got {}", result),
    }
}

#[tokio::test]
async fn test_ping() {
    let server = start().await;
    let mut client = connect(&server).await;

    let response = client.request("ping", json!({})).await.unwrap();
    assert_eq!(response, Response::success(json!({})));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let server = start().await;
    let mut client = connect(&server).await;

    let response = client.request("set_tempo", json!({"bpm": 120})).await.unwrap();
    assert_eq!(error_message(&response), "UnknownCommand: set_tempo");

    let response = client.request("ping", json!({})).await.unwrap();
    assert!(response.is_success());

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_params_name_the_field() {
    let server = start().await;
    let mut client = connect(&server).await;

    let response = client
        .request("get_browser_items_at_path", json!({"path": 7}))
        .await
        .unwrap();
    let message = error_message(&response);
    assert!(message.starts_with("InvalidParameters: path"), "{}", message);

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_stream_stays_aligned() {
    let server = start().await;
    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut framed = Framed::new(stream, ClientCodec::new());

    // A well-framed body that is not a request
    let mut raw = BytesMut::new();
    let body = b"{not json";
    raw.put_u32(body.len() as u32);
    raw.put_slice(body);
    framed.get_mut().write_all(&raw).await.unwrap();

    match framed.next().await {
        Some(Ok(Decoded::Message(response))) => {
            assert!(error_message(&response).starts_with("MalformedMessage"));
        }
        other => panic!("unexpected frame: {:?}", other.map(|r| r.is_ok())),
    }

    framed.send(Request::new("ping")).await.unwrap();
    match framed.next().await {
        Some(Ok(Decoded::Message(response))) => assert!(response.is_success()),
        other => panic!("unexpected frame: {:?}", other.map(|r| r.is_ok())),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let mut config = test_config();
    config.transport.read_buffer_size = 512;
    config.transport.max_message_size = 1024;
    let server = BridgeServer::start(config, StaticCatalogHost::builtin())
        .await
        .unwrap();

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream.write_all(&(1_000_000u32).to_be_bytes()).await.unwrap();

    let mut framed = Framed::new(stream, ClientCodec::new());
    match framed.next().await {
        Some(Ok(Decoded::Message(response))) => {
            assert!(error_message(&response).starts_with("MessageTooLarge"));
        }
        other => panic!("unexpected frame: {:?}", other.map(|r| r.is_ok())),
    }

    let mut stream = framed.into_inner();
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)), "connection should be closed");

    server.shutdown().await;
}

#[tokio::test]
async fn test_command_timeout_then_next_command_completes() {
    let server = BridgeServer::start_with(test_config(), StaticCatalogHost::builtin(), |d| {
        d.register(
            CommandSpec::new(
                "slow",
                ParamSchema::new().required("millis", ParamKind::Integer),
                |_, params| {
                    let millis = params["millis"].as_u64().unwrap_or(0);
                    std::thread::sleep(Duration::from_millis(millis));
                    Ok(json!({ "slept": millis }))
                },
            )
            .with_timeout(Duration::from_millis(100)),
        );
    })
    .await
    .unwrap();
    let mut client = connect(&server).await;

    let started = std::time::Instant::now();
    let response = client.request("slow", json!({"millis": 400})).await.unwrap();
    assert!(error_message(&response).starts_with("Timeout"));
    assert!(started.elapsed() < Duration::from_millis(350));

    // Served after the abandoned command finishes on the host thread
    let response = client.request("ping", json!({})).await.unwrap();
    assert!(response.is_success());

    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_error_is_reported_verbatim() {
    let server = BridgeServer::start_with(test_config(), StaticCatalogHost::builtin(), |d| {
        d.register(CommandSpec::new("fail", ParamSchema::new(), |_, _| {
            Err(BridgeError::command("Track index out of range"))
        }));
    })
    .await
    .unwrap();
    let mut client = connect(&server).await;

    let response = client.request("fail", json!({})).await.unwrap();
    assert_eq!(error_message(&response), "Track index out of range");

    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_clients_share_catalog_population() {
    let host = StaticCatalogHost::builtin().with_latency(Duration::from_millis(20));
    let browse_calls = host.browse_counter();
    let server = BridgeServer::start(test_config(), host).await.unwrap();
    let addr = server.local_addr().to_string();

    let requests = (0..6).map(|_| {
        let addr = addr.clone();
        tokio::spawn(async move {
            let mut client = Client::connect(&addr, Duration::from_secs(1)).await.unwrap();
            client
                .request("get_browser_items_at_path", json!({"path": "drums/kits"}))
                .await
                .unwrap()
        })
    });
    for response in futures::future::join_all(requests).await {
        let response = response.unwrap();
        assert_eq!(response.result().unwrap()["items"].as_array().unwrap().len(), 2);
    }

    // root, drums and drums/kits, each enumerated once
    assert_eq!(browse_calls.load(Ordering::SeqCst), 3);

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalidate_all_forces_repopulation() {
    let host = StaticCatalogHost::builtin();
    let browse_calls = host.browse_counter();
    let server = BridgeServer::start(test_config(), host).await.unwrap();
    let mut client = connect(&server).await;

    client
        .request("get_browser_tree", json!({"category_type": "instruments"}))
        .await
        .unwrap();
    let populated = browse_calls.load(Ordering::SeqCst);
    assert_eq!(server.state().catalog.len(), populated);

    let response = client.request("invalidate_catalog", json!({})).await.unwrap();
    assert_eq!(response.result().unwrap()["invalidated"], json!(populated));
    assert!(server.state().catalog.is_empty());

    client
        .request("get_browser_tree", json!({"category_type": "instruments"}))
        .await
        .unwrap();
    assert_eq!(browse_calls.load(Ordering::SeqCst), populated * 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_responses_arrive_in_request_order() {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);
    let server = BridgeServer::start_with(test_config(), StaticCatalogHost::builtin(), move |d| {
        d.register(CommandSpec::new("next", ParamSchema::new(), move |_, _| {
            Ok(json!(seen.fetch_add(1, Ordering::SeqCst)))
        }));
    })
    .await
    .unwrap();
    let mut client = connect(&server).await;

    for expected in 0..10 {
        let response = client.request("next", Value::Null).await.unwrap();
        assert_eq!(response.result(), Some(&json!(expected)));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 10);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let server = start().await;
    let mut client = connect(&server).await;
    assert!(client.ping().await.is_ok());

    let addr = server.local_addr();
    server.shutdown().await;

    assert!(client.ping().await.is_err());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_idle_connection_is_reclaimed() {
    let mut config = test_config();
    config.transport.idle_timeout_secs = 1;
    let server = BridgeServer::start(config, StaticCatalogHost::builtin())
        .await
        .unwrap();
    let mut client = connect(&server).await;
    assert!(client.ping().await.is_ok());
    assert_eq!(server.state().registry.count(), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(server.state().registry.count(), 0);
    assert!(client.ping().await.is_err());

    server.shutdown().await;
}

#[tokio::test]
async fn test_slowly_arriving_frame_is_not_idle() {
    let mut config = test_config();
    config.transport.idle_timeout_secs = 1;
    let server = BridgeServer::start(config, StaticCatalogHost::builtin())
        .await
        .unwrap();

    let mut body = br#"{"type":"ping","params":{}}"#.to_vec();
    body.resize(60, b' ');
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();

    // Takes well over the idle timeout, but bytes keep arriving
    for chunk in body.chunks(10) {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stream.write_all(chunk).await.unwrap();
    }

    let mut framed = Framed::new(stream, ClientCodec::new());
    match framed.next().await {
        Some(Ok(Decoded::Message(response))) => assert!(response.is_success()),
        other => panic!("unexpected frame: {:?}", other.map(|r| r.is_ok())),
    }
    assert_eq!(server.state().registry.count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_outbound_link_is_served() {
    let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = test_config();
    config.transport.outbound = vec![peer.local_addr().unwrap().to_string()];
    let server = BridgeServer::start(config, StaticCatalogHost::builtin())
        .await
        .unwrap();

    // The bridge dials us; we then act as its client over that socket
    let (stream, _) = tokio::time::timeout(Duration::from_secs(2), peer.accept())
        .await
        .unwrap()
        .unwrap();
    let mut framed = Framed::new(stream, ClientCodec::new());
    framed.send(Request::new("ping")).await.unwrap();
    match framed.next().await {
        Some(Ok(Decoded::Message(response))) => assert!(response.is_success()),
        other => panic!("unexpected frame: {:?}", other.map(|r| r.is_ok())),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_outbound_retry_exhaustion_is_reported() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap().to_string();
    drop(unused);

    let mut config = test_config();
    config.transport.outbound = vec![dead_addr.clone()];
    config.transport.retry_delay_ms = 10;
    config.transport.max_retries = 3;
    let server = BridgeServer::start(config, StaticCatalogHost::builtin())
        .await
        .unwrap();

    let mut status = server.link_status(&dead_addr).unwrap();
    let failed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let LinkStatus::Failed { attempts, .. } = &*status.borrow_and_update() {
                return *attempts;
            }
            if status.changed().await.is_err() {
                return 0;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failed, 3);

    // Other connections are unaffected
    let mut client = connect(&server).await;
    assert!(client.ping().await.is_ok());

    server.shutdown().await;
}
