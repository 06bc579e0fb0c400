//! End-to-end tunnel tests: a live server, a fake box over WebSocket, and
//! real HTTP callers

use boxgate_api::{ApiServer, ApiServerConfig};
use boxgate_control::{Gateway, GatewayConfig, MemoryStatusStore};
use boxgate_identity::MemoryIdentityProvider;
use boxgate_proto::{Frame, ResponsePayload, CLOSE_INVALID_IDENTITY, CLOSE_SUPERSEDED};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server(
    store: Arc<MemoryStatusStore>,
    config: GatewayConfig,
) -> (SocketAddr, Arc<Gateway>) {
    let gateway = Arc::new(Gateway::new(store, config));
    let identity = Arc::new(MemoryIdentityProvider::new(b"test-secret"));

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            enable_cors: false,
        },
        gateway.clone(),
        identity,
    );
    let router = server.build_router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, gateway)
}

async fn connect_box(
    addr: SocketAddr,
    identify: &str,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/box", addr))
        .await
        .unwrap();
    ws.send(Message::Text(identify.to_string())).await.unwrap();
    ws
}

async fn wait_for_registration(gateway: &Gateway, box_id: &str) {
    for _ in 0..200 {
        if gateway.connections().lookup(box_id).is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("box '{}' never registered", box_id);
}

#[tokio::test]
async fn identify_is_provisioned_with_canonical_id() {
    let store = Arc::new(MemoryStatusStore::new(false));
    store.seed_alias("X", "B1");
    let (addr, gateway) = spawn_server(store, GatewayConfig::default()).await;

    let mut ws = connect_box(addr, r#"{"type":"IDENTIFY","box_id":"X"}"#).await;

    // The gateway corrects the box's id before traffic flows
    match ws.next().await.unwrap().unwrap() {
        Message::Text(text) => {
            assert_eq!(
                Frame::decode(&text).unwrap(),
                Frame::Provision {
                    box_id: "B1".to_string()
                }
            );
        }
        other => panic!("expected PROVISION, got {:?}", other),
    }

    wait_for_registration(&gateway, "B1").await;
}

#[tokio::test]
async fn proxy_round_trip() {
    let store = Arc::new(MemoryStatusStore::new(true));
    let (addr, gateway) = spawn_server(store, GatewayConfig::default()).await;

    let mut ws = connect_box(addr, r#"{"type":"IDENTIFY","box_id":"B1"}"#).await;
    wait_for_registration(&gateway, "B1").await;

    // Fake box: answer the first REQUEST with a JSON body
    let box_task = tokio::spawn(async move {
        while let Some(message) = ws.next().await {
            if let Message::Text(text) = message.unwrap() {
                match Frame::decode(&text).unwrap() {
                    Frame::Request {
                        request_id,
                        method,
                        path,
                        query,
                        ..
                    } => {
                        assert_eq!(method, "GET");
                        assert_eq!(path, "/items");
                        assert_eq!(query, "x=1");

                        let response = Frame::Response {
                            request_id,
                            payload: ResponsePayload {
                                status: 200,
                                headers: vec![(
                                    "content-type".to_string(),
                                    "application/json".to_string(),
                                )],
                                body: Some("[]".to_string()),
                            },
                        };
                        ws.send(Message::Text(response.encode().unwrap()))
                            .await
                            .unwrap();
                        return;
                    }
                    other => panic!("expected REQUEST, got {:?}", other),
                }
            }
        }
    });

    let response = reqwest::get(format!("http://{}/proxy/B1/items?x=1", addr))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(response.text().await.unwrap(), "[]");

    box_task.await.unwrap();
    assert_eq!(gateway.pending().count(), 0);
}

#[tokio::test]
async fn unknown_identity_is_closed_with_4001() {
    let store = Arc::new(MemoryStatusStore::new(false));
    let (addr, _gateway) = spawn_server(store, GatewayConfig::default()).await;

    let mut ws = connect_box(addr, r#"{"type":"IDENTIFY","box_id":"ghost"}"#).await;

    match ws.next().await.unwrap().unwrap() {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), CLOSE_INVALID_IDENTITY);
        }
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test]
async fn first_frame_other_than_identify_fails_the_handshake() {
    let store = Arc::new(MemoryStatusStore::new(true));
    let (addr, gateway) = spawn_server(store, GatewayConfig::default()).await;

    let mut ws = connect_box(
        addr,
        r#"{"type":"RESPONSE","request_id":"r-1","payload":{"status":200}}"#,
    )
    .await;

    match ws.next().await.unwrap().unwrap() {
        Message::Close(Some(_)) => {}
        other => panic!("expected close, got {:?}", other),
    }
    assert_eq!(gateway.connections().count(), 0);
}

#[tokio::test]
async fn silent_box_yields_504_and_no_leaked_slot() {
    let store = Arc::new(MemoryStatusStore::new(true));
    let config = GatewayConfig {
        response_timeout: Duration::from_millis(200),
    };
    let (addr, gateway) = spawn_server(store, config).await;

    // Connected box that never replies; keep the socket open for the test
    let _ws = connect_box(addr, r#"{"type":"IDENTIFY","box_id":"sleepy"}"#).await;
    wait_for_registration(&gateway, "sleepy").await;

    let response = reqwest::get(format!("http://{}/proxy/sleepy/anything", addr))
        .await
        .unwrap();

    assert_eq!(response.status(), 504);
    assert_eq!(gateway.pending().count(), 0);
}

#[tokio::test]
async fn new_identification_supersedes_the_old_channel() {
    let store = Arc::new(MemoryStatusStore::new(true));
    let (addr, gateway) = spawn_server(store, GatewayConfig::default()).await;

    let mut first = connect_box(addr, r#"{"type":"IDENTIFY","box_id":"B9"}"#).await;
    wait_for_registration(&gateway, "B9").await;
    let first_conn = gateway.connections().lookup("B9").unwrap().conn_id();

    let _second = connect_box(addr, r#"{"type":"IDENTIFY","box_id":"B9"}"#).await;
    for _ in 0..200 {
        if gateway.connections().lookup("B9").unwrap().conn_id() != first_conn {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_ne!(gateway.connections().lookup("B9").unwrap().conn_id(), first_conn);

    // The superseded channel is forcibly closed
    loop {
        match first.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), CLOSE_SUPERSEDED);
                break;
            }
            Some(Ok(_)) => continue,
            other => panic!("expected close, got {:?}", other),
        }
    }

    // Exactly one registration remains
    assert_eq!(gateway.connections().count(), 1);
}

#[tokio::test]
async fn box_disconnect_marks_it_unreachable() {
    let store = Arc::new(MemoryStatusStore::new(true));
    let (addr, gateway) = spawn_server(store.clone(), GatewayConfig::default()).await;

    let ws = connect_box(addr, r#"{"type":"IDENTIFY","box_id":"B3"}"#).await;
    wait_for_registration(&gateway, "B3").await;

    drop(ws);
    for _ in 0..200 {
        if gateway.connections().lookup("B3").is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(gateway.connections().lookup("B3").is_none());

    let response = reqwest::get(format!("http://{}/proxy/B3/items", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
