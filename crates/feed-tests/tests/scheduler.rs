//! Scheduler tick tests against a live server.

use feed_client::{HistoryQuery, ServerMessage, price_room};
use feed_tests::{TestServer, test_config};
use price_feed_backend::simulation::FixedShock;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_tick_report_covers_every_instrument() {
    let server = TestServer::spawn().await;
    let instruments = server.state().config.instruments.len();

    let report = server.tick().await;

    assert_eq!(report.instruments, instruments);
    assert_eq!(report.published, instruments);
    assert_eq!(report.persisted, instruments);
    assert_eq!(report.publish_failed, 0);
    assert_eq!(report.persist_failed, 0);
    assert_eq!(report.delivered, 0);
}

#[tokio::test]
async fn test_unpriced_instrument_starts_from_fallback() {
    let server = TestServer::spawn().await;
    server.tick().await;

    let history = server
        .client()
        .price_history("MSFT", &HistoryQuery::default())
        .await
        .expect("Failed to get history");

    assert_eq!(history.points.len(), 1);
    // fallback 100.00 * 1.005
    assert_eq!(history.points[0].close, 100.5);
}

#[tokio::test]
async fn test_last_price_follows_ticks() {
    let server = TestServer::spawn().await;
    server.tick().await;

    let list = server
        .client()
        .list_instruments()
        .await
        .expect("Failed to list instruments");
    let aapl = list
        .instruments
        .iter()
        .find(|i| i.symbol == "AAPL")
        .expect("AAPL missing");

    assert_eq!(aapl.last_price, Some(150.75));
}

#[tokio::test]
async fn test_stats_count_ticks_and_deliveries() {
    let server = TestServer::spawn().await;
    let room = price_room("BTC-USD");

    let mut ws = server.connect_as("demo").await;
    ws.subscribe(&room).await.expect("Failed to subscribe");
    server.wait_for_members(&room, 1).await;

    server.tick().await;
    server.tick().await;

    let stats = server
        .client()
        .realtime_stats()
        .await
        .expect("Failed to get stats");

    assert_eq!(stats.scheduler.ticks_completed, 2);
    assert_eq!(stats.scheduler.ticks_abandoned, 0);
    assert!(stats.scheduler.last_tick_at.is_some());
    assert_eq!(stats.broadcaster.delivered, 2);
    assert_eq!(stats.broadcaster.failed, 0);
    assert_eq!(stats.members_of(&room), 1);

    let mut prices = Vec::new();
    while prices.len() < 2 {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.recv())
            .await
            .expect("Timeout waiting for update")
            .expect("WebSocket closed unexpectedly");
        if let ServerMessage::PriceUpdate(update) = message {
            assert_eq!(update.symbol, "BTC-USD");
            prices.push(update.price);
        }
    }
    assert_eq!(prices, vec![100.5, 101.0]);
}

#[tokio::test]
async fn test_background_loop_publishes() {
    let mut config = test_config();
    config.scheduler.enabled = true;
    config.scheduler.interval_ms = 20;
    let server = TestServer::spawn_with(config, Box::new(FixedShock::new(dec!(0.005)))).await;
    let room = price_room("AAPL");

    let mut ws = server.connect_as("demo").await;
    ws.subscribe(&room).await.expect("Failed to subscribe");
    server.wait_for_members(&room, 1).await;

    let scheduler = std::sync::Arc::clone(&server.state().scheduler);
    let handle = tokio::spawn(scheduler.run());

    let update = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.recv().await {
                Some(ServerMessage::PriceUpdate(update)) => return update,
                Some(_) => {}
                None => panic!("WebSocket closed unexpectedly"),
            }
        }
    })
    .await
    .expect("No update from the background loop");
    handle.abort();

    assert_eq!(update.symbol, "AAPL");
    assert!(update.price >= 150.75);
}
