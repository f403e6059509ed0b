//! WebSocket Relay Integration Tests
//!
//! Real clients over `tokio-tungstenite` against the axum route, with a
//! scripted upstream provider.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use common::{Call, Harness, ScriptedConnector, sym, wait_until};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, symbol: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/market/{symbol}"))
        .await
        .unwrap();
    client
}

/// Next JSON text frame, skipping control frames.
async fn next_json(client: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame within 2s")
}

async fn send_json(client: &mut Client, value: &Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn client_lifecycle_end_to_end() {
    let connector = ScriptedConnector::new();
    let upstream = connector.accept();
    let harness = Harness::new(connector.clone(), 0);
    harness.start_listening().await;
    let addr = harness.serve(16).await;

    let mut client = connect(addr, "aapl").await;

    assert_eq!(
        next_json(&mut client).await,
        json!({
            "type": "connection",
            "status": "connected",
            "symbol": "AAPL",
            "message": "Subscribed to AAPL"
        })
    );
    let observed = connector.clone();
    wait_until(move || observed.count(&Call::Subscribe(vec!["AAPL".into()])) == 1).await;

    upstream
        .send(Some(Ok(json!({"id": "AAPL", "price": 150.25, "change": 1.5}))))
        .unwrap();
    assert_eq!(
        next_json(&mut client).await,
        json!({
            "symbol": "AAPL",
            "price": 150.25,
            "change": 1.5,
            "change_percent": null,
            "volume": null,
            "timestamp": null
        })
    );

    send_json(&mut client, &json!({"type": "ping", "timestamp": 123})).await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "pong", "timestamp": 123})
    );

    send_json(&mut client, &json!({"type": "subscribe", "symbol": "msft"})).await;
    assert_eq!(
        next_json(&mut client).await,
        json!({
            "type": "subscription_changed",
            "symbol": "MSFT",
            "message": "Switched to MSFT"
        })
    );
    let observed = connector.clone();
    wait_until(move || {
        observed.count(&Call::Unsubscribe(vec!["AAPL".into()])) == 1
            && observed.count(&Call::Subscribe(vec!["MSFT".into()])) == 1
    })
    .await;

    client.close(None).await.unwrap();

    let observed = connector.clone();
    wait_until(move || observed.count(&Call::Unsubscribe(vec!["MSFT".into()])) == 1).await;
    let registry = harness.relay.registry().clone();
    wait_until(move || registry.symbols().is_empty()).await;

    // no duplicate cleanup
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.count(&Call::Unsubscribe(vec!["MSFT".into()])), 1);
}

#[tokio::test]
async fn shared_symbol_uses_one_upstream_subscription() {
    let connector = ScriptedConnector::new();
    let upstream = connector.accept();
    let harness = Harness::new(connector.clone(), 0);
    harness.start_listening().await;
    let addr = harness.serve(16).await;

    let mut first = connect(addr, "AAPL").await;
    let mut second = connect(addr, "aapl").await;
    next_json(&mut first).await;
    next_json(&mut second).await;

    let registry = harness.relay.registry().clone();
    wait_until(move || registry.listener_count(&sym("AAPL")) == 2).await;

    upstream
        .send(Some(Ok(json!({"id": "AAPL", "price": 10.0}))))
        .unwrap();
    assert_eq!(next_json(&mut first).await["price"], 10.0);
    assert_eq!(next_json(&mut second).await["price"], 10.0);

    drop(first);
    let registry = harness.relay.registry().clone();
    wait_until(move || registry.listener_count(&sym("AAPL")) == 1).await;

    upstream
        .send(Some(Ok(json!({"id": "AAPL", "price": 11.0}))))
        .unwrap();
    assert_eq!(next_json(&mut second).await["price"], 11.0);

    assert_eq!(connector.count(&Call::Subscribe(vec!["AAPL".into()])), 1);
    assert_eq!(connector.count(&Call::Unsubscribe(vec!["AAPL".into()])), 0);
}

#[tokio::test]
async fn malformed_client_frames_keep_connection_open() {
    let connector = ScriptedConnector::new();
    let _upstream = connector.accept();
    let harness = Harness::new(connector.clone(), 0);
    harness.start_listening().await;
    let addr = harness.serve(16).await;

    let mut client = connect(addr, "AAPL").await;
    next_json(&mut client).await;

    client
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    client
        .send(Message::Binary(vec![1_u8, 2, 3].into()))
        .await
        .unwrap();
    send_json(&mut client, &json!({"type": "subscribe", "symbol": ""})).await;
    send_json(&mut client, &json!({"type": "ping", "timestamp": "still-here"})).await;

    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "pong", "timestamp": "still-here"})
    );
    assert_eq!(harness.relay.registry().listener_count(&sym("AAPL")), 1);
}

#[tokio::test]
async fn invalid_symbol_is_rejected_before_upgrade() {
    let connector = ScriptedConnector::new();
    let harness = Harness::new(connector, 0);
    let addr = harness.serve(16).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/market/AA%20PL"))
        .await
        .unwrap_err();

    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
    assert!(harness.relay.registry().symbols().is_empty());
}

#[tokio::test]
async fn shutdown_closes_connected_clients() {
    let connector = ScriptedConnector::new();
    let _upstream = connector.accept();
    let harness = Harness::new(connector, 0);
    harness.start_listening().await;
    let addr = harness.serve(16).await;

    let mut client = connect(addr, "AAPL").await;
    next_json(&mut client).await;

    harness.relay.shutdown().await;

    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "client was not closed");
    assert!(harness.relay.registry().symbols().is_empty());

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/market/AAPL")).await;
    if let Ok((mut late, _)) = err {
        // late clients are closed immediately instead of registered
        let closed = tokio::time::timeout(Duration::from_secs(2), late.next()).await;
        assert!(matches!(
            closed,
            Ok(Some(Ok(Message::Close(_)) | Err(_)) | None)
        ));
    }
    assert!(harness.relay.registry().symbols().is_empty());
}
