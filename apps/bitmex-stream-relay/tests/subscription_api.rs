//! Subscription API Integration Tests
//!
//! Exercises the PATCH endpoint through the router and the delivery socket
//! through a real listener.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use bitmex_stream_relay::application::ports::{
    CatalogError, CatalogSource, FeedControl, FeedControlError,
};
use bitmex_stream_relay::infrastructure::api::{
    BearerTokenIdentity, SESSION_PATH, SUBSCRIPTION_PATH, create_router,
};
use bitmex_stream_relay::infrastructure::persistence::InMemorySubscriberRepository;
use bitmex_stream_relay::{
    ApiServer, ApiState, ConnectionRegistry, FanoutRouter, RouteOutcome, SubscriberId,
    SubscriptionIndex, SubscriptionService, Symbol, SymbolRegistry, SymbolSet, TradeEvent,
};

const STEP: Duration = Duration::from_secs(5);

// =============================================================================
// Fixture
// =============================================================================

struct FixedCatalog(Vec<Symbol>);

#[async_trait]
impl CatalogSource for FixedCatalog {
    async fn fetch_symbols(&self) -> Result<Vec<Symbol>, CatalogError> {
        Ok(self.0.clone())
    }
}

struct IgnoreFeed;

#[async_trait]
impl FeedControl for IgnoreFeed {
    async fn subscribe(&self, _symbols: &[Symbol]) -> Result<(), FeedControlError> {
        Ok(())
    }
}

struct Api {
    state: Arc<ApiState>,
    connections: Arc<ConnectionRegistry>,
    router: FanoutRouter,
    shutdown: CancellationToken,
}

fn api() -> Api {
    let index = Arc::new(SubscriptionIndex::new());
    let connections = Arc::new(ConnectionRegistry::new());
    let registry = Arc::new(SymbolRegistry::new(
        Arc::new(SymbolSet::new()),
        Arc::clone(&index),
        Arc::new(FixedCatalog(vec!["XBTUSD".into(), "ETHUSD".into()])),
        Arc::new(IgnoreFeed),
    ));
    let subscriptions = Arc::new(SubscriptionService::new(
        Arc::clone(&registry),
        Arc::clone(&index),
        Arc::new(InMemorySubscriberRepository::with_auto_provision()),
    ));
    let router = FanoutRouter::new(registry, index, Arc::clone(&connections));
    let shutdown = CancellationToken::new();
    let state = Arc::new(ApiState::new(
        subscriptions,
        Arc::clone(&connections),
        Arc::new(BearerTokenIdentity),
        8,
        shutdown.clone(),
    ));
    Api {
        state,
        connections,
        router,
        shutdown,
    }
}

async fn patch(api: &Api, token: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("PATCH")
        .uri(SUBSCRIPTION_PATH)
        .header("content-type", "application/json");
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {token}"));
    }

    let response = create_router(Arc::clone(&api.state))
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn serve(api: &Api) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ApiServer::new(0, Arc::clone(&api.state), api.shutdown.clone());
    tokio::spawn(server.serve(listener));
    addr
}

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: std::net::SocketAddr, subscriber: SubscriberId) -> Client {
    let url = format!("ws://{addr}{SESSION_PATH}?token={subscriber}");
    let (client, _) = timeout(STEP, tokio_tungstenite::connect_async(url))
        .await
        .unwrap()
        .unwrap();
    client
}

/// Poll until `condition` holds.
async fn eventually(condition: impl Fn() -> bool) {
    timeout(STEP, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

fn trade(symbol: &str) -> TradeEvent {
    TradeEvent::new(
        symbol,
        Decimal::from_str("50000.5").unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
}

// =============================================================================
// PATCH /subscription
// =============================================================================

#[tokio::test]
async fn subscribe_returns_success_with_state() {
    let api = api();
    let subscriber = SubscriberId::random();

    let (status, body) = patch(
        &api,
        Some(&subscriber.to_string()),
        r#"{"action":"subscribe","symbols":["XBTUSD"]}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "success": true,
            "userId": subscriber.to_string(),
            "subscription": true,
            "subscriptionSymbols": ["XBTUSD"],
        })
    );
}

#[tokio::test]
async fn unknown_symbol_is_bad_request() {
    let api = api();
    let subscriber = SubscriberId::random().to_string();

    let (status, body) = patch(
        &api,
        Some(&subscriber),
        r#"{"action":"subscribe","symbols":["NOPE"]}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
    assert_eq!(body["reason"], "incorrect_symbol");
}

#[tokio::test]
async fn repeated_subscribe_is_rejected() {
    let api = api();
    let subscriber = SubscriberId::random().to_string();
    let request = r#"{"action":"subscribe","symbols":["ETHUSD"]}"#;

    let (first, _) = patch(&api, Some(&subscriber), request).await;
    let (second, body) = patch(&api, Some(&subscriber), request).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "already_subscribed");
}

#[tokio::test]
async fn unsubscribe_without_subscription_is_rejected() {
    let api = api();
    let subscriber = SubscriberId::random().to_string();

    let (status, body) = patch(&api, Some(&subscriber), r#"{"action":"unsubscribe"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "already_unsubscribed");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let api = api();

    let (status, body) = patch(&api, None, r#"{"action":"subscribe"}"#).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "unauthorized");
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let api = api();
    let subscriber = SubscriberId::random().to_string();

    let (status, body) = patch(&api, Some(&subscriber), r#"{"action":"resubscribe"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "invalid_body");
}

// =============================================================================
// Delivery socket
// =============================================================================

#[tokio::test]
async fn socket_receives_routed_trades() {
    let api = api();
    let addr = serve(&api).await;
    let subscriber = SubscriberId::random();

    let (status, _) = patch(
        &api,
        Some(&subscriber.to_string()),
        r#"{"action":"subscribe","symbols":["XBTUSD"]}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut client = connect(addr, subscriber).await;
    eventually(|| api.connections.lookup(subscriber).is_some()).await;

    let outcome = api.router.route(&trade("XBTUSD")).await;
    assert!(matches!(outcome, RouteOutcome::Routed(report) if report.delivered == 1));

    let message = timeout(STEP, client.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = message else {
        panic!("expected text frame, got {message:?}");
    };
    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(frame["symbol"], "XBTUSD");
    assert_eq!(frame["price"], 50000.5);

    api.shutdown.cancel();
}

#[tokio::test]
async fn socket_without_credentials_is_refused() {
    let api = api();
    let addr = serve(&api).await;

    let url = format!("ws://{addr}{SESSION_PATH}");
    let result = tokio_tungstenite::connect_async(url).await;

    assert!(result.is_err());
    assert!(api.connections.is_empty());
    api.shutdown.cancel();
}

#[tokio::test]
async fn second_socket_supersedes_the_first() {
    let api = api();
    let addr = serve(&api).await;
    let subscriber = SubscriberId::random();

    let mut first = connect(addr, subscriber).await;
    eventually(|| api.connections.len() == 1).await;
    let first_id = api.connections.lookup(subscriber).unwrap().id();

    let _second = connect(addr, subscriber).await;
    eventually(|| {
        api.connections
            .lookup(subscriber)
            .is_some_and(|c| c.id() != first_id)
    })
    .await;

    let message = timeout(STEP, first.next()).await.unwrap();
    match message {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::Normal);
            assert_eq!(frame.reason.as_str(), "superseded");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(api.connections.len(), 1);

    api.shutdown.cancel();
}

#[tokio::test]
async fn closing_the_socket_unbinds_the_subscriber() {
    let api = api();
    let addr = serve(&api).await;
    let subscriber = SubscriberId::random();
    patch(&api, Some(&subscriber.to_string()), r#"{"action":"subscribe"}"#).await;

    let mut client = connect(addr, subscriber).await;
    eventually(|| api.connections.lookup(subscriber).is_some()).await;

    client.close(None).await.unwrap();

    eventually(|| api.connections.is_empty()).await;
    let outcome = api.router.route(&trade("XBTUSD")).await;
    assert!(matches!(
        outcome,
        RouteOutcome::Routed(report) if report.matched == 1 && report.offline == 1
    ));

    api.shutdown.cancel();
}

#[tokio::test]
async fn shutdown_closes_open_sockets() {
    let api = api();
    let addr = serve(&api).await;
    let subscriber = SubscriberId::random();

    let mut client = connect(addr, subscriber).await;
    eventually(|| api.connections.len() == 1).await;

    api.shutdown.cancel();

    match timeout(STEP, client.next()).await.unwrap() {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {other:?}"),
    }
    eventually(|| api.connections.is_empty()).await;
}
