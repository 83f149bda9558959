mod support;

use barter_cache::{
    CacheError, StreamCache,
    model::{OrderStatus, Position, PositionSide},
};
use barter_stream::{
    FuturePolicy, Resolved, StreamError, Topic, WatchRequest,
    client::ConnectionStatus,
    config::{ReconnectPolicy, StreamConfig},
    transport::WsMessage,
};
use rust_decimal_macros::dec;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use support::{
    config, eventually, session, session_with,
    venue::{MockFetcher, PRIVATE_URL, PUBLIC_URL},
};
use url::Url;

fn trade(id: &str, symbol: &str, price: f64) -> serde_json::Value {
    json!({
        "id": id,
        "symbol": symbol,
        "time": "2024-01-01T00:00:00Z",
        "side": "buy",
        "price": price,
        "amount": 0.5,
    })
}

fn order(id: &str, status: &str, filled: f64) -> serde_json::Value {
    json!({
        "id": id,
        "symbol": "BTC/USDT",
        "time": "2024-01-01T00:00:00Z",
        "status": status,
        "side": "sell",
        "price": 42000.0,
        "amount": 1.0,
        "filled": filled,
    })
}

#[tokio::test]
async fn test_concurrent_watchers_share_one_subscription() {
    let (session, mut server) = session();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("BTC/USDT").await }
    });
    let second = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("BTC/USDT").await }
    });

    let mut connection = server.accept().await;
    assert_eq!(connection.url.as_str(), PUBLIC_URL);
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "trades:BTC/USDT" })
    );

    // Let the second watcher reach the subscription check before publishing
    let client = session.client(&Url::parse(PUBLIC_URL).unwrap());
    eventually(|| client.is_pending("trades:BTC/USDT")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(connection.try_recv(Duration::from_millis(50)).await.is_none());

    connection.push(json!({
        "channel": "trades",
        "data": [trade("1", "BTC/USDT", 100.0), trade("2", "BTC/USDT", 101.0)],
    }));

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.read().len(), 2);
    assert_eq!(server.connects(), 1);
}

#[tokio::test]
async fn test_shared_subscription_resolves_each_message_hash() {
    let (session, mut server) = session();
    let url = Url::parse(PUBLIC_URL).unwrap();

    let request = |message_hash: &str| {
        WatchRequest::new(url.clone(), message_hash)
            .with_payload(WsMessage::text(
                json!({ "op": "subscribe", "topic": "trades:*" }).to_string(),
            ))
            .with_subscription("trades:*")
            .with_policy(FuturePolicy::Shared)
    };

    let btc = tokio::spawn({
        let session = session.clone();
        let request = request("trades:BTC/USDT");
        async move { session.watch(request).await }
    });
    let eth = tokio::spawn({
        let session = session.clone();
        let request = request("trades:ETH/USDT");
        async move { session.watch(request).await }
    });

    let mut connection = server.accept().await;
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "trades:*" })
    );

    let client = session.client(&url);
    eventually(|| client.is_pending("trades:BTC/USDT") && client.is_pending("trades:ETH/USDT")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(connection.try_recv(Duration::from_millis(50)).await.is_none());

    // Each message hash resolves on its own data only
    connection.push(json!({ "channel": "trades", "data": [trade("1", "ETH/USDT", 2000.0)] }));
    let eth = eth.await.unwrap().unwrap();
    assert!(matches!(eth, Resolved::Trades(trades) if trades.read().len() == 1));
    assert!(client.is_pending("trades:BTC/USDT"));
    assert!(!btc.is_finished());

    connection.push(json!({ "channel": "trades", "data": [trade("2", "BTC/USDT", 42000.0)] }));
    let btc = btc.await.unwrap().unwrap();
    assert!(matches!(
        btc,
        Resolved::Trades(trades) if trades.read().iter().all(|trade| trade.symbol == "BTC/USDT")
    ));
    assert!(client.is_subscribed("trades:*"));
}

#[tokio::test]
async fn test_push_without_waiter_updates_cache() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("ETH/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    connection.push(json!({ "channel": "trades", "data": [trade("1", "ETH/USDT", 2000.0)] }));
    let trades = watcher.await.unwrap().unwrap();

    // Nobody awaits these, the cache still absorbs them
    connection.push(json!({ "channel": "trades", "data": [trade("2", "ETH/USDT", 2001.0)] }));
    connection.push(json!({ "channel": "trades", "data": [trade("3", "BTC/USDT", 42000.0)] }));

    eventually(|| trades.read().len() == 2).await;
    eventually(|| session.store().trades("BTC/USDT").is_some()).await;

    let last = trades.read().iter().last().map(|trade| trade.id.clone());
    assert_eq!(last.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_connection_drop_rejects_pending_and_resubscribes() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_ticker("BTC/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    let client = session.client(&Url::parse(PUBLIC_URL).unwrap());
    assert!(client.is_subscribed("ticker:BTC/USDT"));

    connection.disconnect();

    let error = watcher.await.unwrap().unwrap_err();
    assert!(error.is_terminal(), "unexpected error: {error:?}");
    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert!(!client.is_subscribed("ticker:BTC/USDT"));

    // A fresh client re-sends the subscribe request
    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_ticker("BTC/USDT").await }
    });

    let mut connection = server.accept().await;
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "ticker:BTC/USDT" })
    );
    connection.push(json!({
        "channel": "ticker",
        "data": { "symbol": "BTC/USDT", "time": "2024-01-01T00:00:00Z", "last": 42000.5 },
    }));

    let ticker = watcher.await.unwrap().unwrap();
    assert_eq!(ticker.last, Some(42000.5));
    assert_eq!(server.connects(), 2);
    assert!(!Arc::ptr_eq(
        &client,
        &session.client(&Url::parse(PUBLIC_URL).unwrap())
    ));
}

#[tokio::test]
async fn test_connect_retries_with_backoff() {
    let (session, mut server) = session_with(config(), None, 2);

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("BTC/USDT").await }
    });

    let mut connection = server.accept().await;
    assert_eq!(server.connects(), 3);
    connection.recv().await;
    connection.push(json!({ "channel": "trades", "data": [trade("1", "BTC/USDT", 1.0)] }));
    assert!(watcher.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_close_interrupts_connect_retries() {
    let config = StreamConfig::default().with_reconnect(
        ReconnectPolicy::default()
            .with_base_delay(Duration::from_secs(2))
            .with_jitter(0.0)
            .with_max_attempts(4),
    );
    let (session, server) = session_with(config, None, usize::MAX);

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("BTC/USDT").await }
    });
    eventually(|| server.connects() >= 1).await;

    tokio::time::timeout(Duration::from_millis(500), session.close())
        .await
        .expect("close waited out the connect backoff");

    let error = watcher.await.unwrap().unwrap_err();
    assert!(error.is_terminal(), "unexpected error: {error:?}");
    assert_eq!(server.connects(), 1);
}

#[tokio::test]
async fn test_connect_failure_rejects_watch() {
    let (session, _server) = session_with(config(), None, usize::MAX);

    let error = session.watch_trades("BTC/USDT").await.unwrap_err();
    assert!(error.is_terminal(), "unexpected error: {error:?}");
}

#[tokio::test]
async fn test_order_book_snapshot_replays_buffered_deltas() {
    let (fetcher, snapshots) = MockFetcher::new();
    let (session, mut server) = session_with(config(), Some(fetcher), 0);

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_order_book("BTC/USDT").await }
    });

    let mut connection = server.accept().await;
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "orderbook:BTC/USDT" })
    );

    connection.push(json!({
        "channel": "delta", "symbol": "BTC/USDT", "first_nonce": 101, "nonce": 101,
        "bids": [["10.0", "0"]], "asks": [],
    }));
    connection.push(json!({
        "channel": "delta", "symbol": "BTC/USDT", "first_nonce": 102, "nonce": 102,
        "bids": [["10.1", "3"]], "asks": [],
    }));

    let store_book = session.store().order_book("BTC/USDT").unwrap();
    eventually(|| store_book.read().buffered().len() == 2).await;
    assert!(!store_book.read().is_synced());

    snapshots
        .send(Ok(barter_cache::books::BookSnapshot::new(
            100,
            None,
            vec![(dec!(10.0), dec!(5)).into()],
            vec![(dec!(10.5), dec!(1)).into()],
        )))
        .unwrap();

    let book = watcher.await.unwrap().unwrap();
    {
        let book = book.read();
        assert_eq!(book.nonce(), Some(102));
        assert_eq!(book.bids().get(&dec!(10.1)), Some(dec!(3)));
        assert_eq!(book.bids().get(&dec!(10.0)), None);
        assert_eq!(book.asks().get(&dec!(10.5)), Some(dec!(1)));
        assert!(book.buffered().is_empty());
    }

    // Synchronised books apply deltas directly
    connection.push(json!({
        "channel": "delta", "symbol": "BTC/USDT", "first_nonce": 103, "nonce": 103,
        "bids": [], "asks": [["10.4", "2"]],
    }));
    eventually(|| book.read().nonce() == Some(103)).await;
    assert_eq!(book.read().asks().best().map(|level| level.price), Some(dec!(10.4)));
}

#[tokio::test]
async fn test_order_book_gap_rejects_and_resets() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_order_book("ETH/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    connection.push(json!({
        "channel": "snapshot", "symbol": "ETH/USDT", "nonce": 10,
        "bids": [["2000", "1"]], "asks": [["2001", "1"]],
    }));
    let book = watcher.await.unwrap().unwrap();
    assert_eq!(book.read().nonce(), Some(10));

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_order_book("ETH/USDT").await }
    });
    let client = session.client(&Url::parse(PUBLIC_URL).unwrap());
    eventually(|| client.is_pending("orderbook:ETH/USDT")).await;

    connection.push(json!({
        "channel": "delta", "symbol": "ETH/USDT", "first_nonce": 15, "nonce": 16,
        "bids": [], "asks": [],
    }));

    assert_eq!(
        watcher.await.unwrap().unwrap_err(),
        StreamError::Cache(CacheError::InvalidSequence {
            prev_nonce: 10,
            first_nonce: 15
        })
    );
    assert!(session.store().order_book("ETH/USDT").is_none());
    assert!(!client.is_subscribed("orderbook:ETH/USDT"));
    assert!(!book.read().is_synced());

    // The next watch subscribes again
    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_order_book("ETH/USDT").await }
    });
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "orderbook:ETH/USDT" })
    );
    connection.push(json!({
        "channel": "snapshot", "symbol": "ETH/USDT", "nonce": 20,
        "bids": [["1999", "4"]], "asks": [],
    }));
    let book = watcher.await.unwrap().unwrap();
    assert_eq!(book.read().bids().get(&dec!(1999)), Some(dec!(4)));
}

#[tokio::test]
async fn test_order_book_snapshot_retries_exhausted() {
    let (fetcher, snapshots) = MockFetcher::new();
    let config = config().with_snapshot_max_retries(2);
    let (session, mut server) = session_with(config, Some(fetcher), 0);

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_order_book("BTC/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    connection.push(json!({
        "channel": "delta", "symbol": "BTC/USDT", "first_nonce": 101, "nonce": 105,
        "bids": [["10.0", "1"]], "asks": [],
    }));

    let store_book = session.store().order_book("BTC/USDT").unwrap();
    eventually(|| store_book.read().buffered().len() == 1).await;

    // Both snapshots end before the first buffered delta begins
    for nonce in [90, 95] {
        snapshots
            .send(Ok(barter_cache::books::BookSnapshot::new(nonce, None, vec![], vec![])))
            .unwrap();
    }

    assert_eq!(
        watcher.await.unwrap().unwrap_err(),
        StreamError::SnapshotBehind {
            symbol: "BTC/USDT".into(),
            attempts: 2
        }
    );
    assert!(session.store().order_book("BTC/USDT").is_none());
    let client = session.client(&Url::parse(PUBLIC_URL).unwrap());
    assert!(!client.is_subscribed("orderbook:BTC/USDT"));
}

#[tokio::test]
async fn test_watch_order_book_for_symbols_warms_up_each_book() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .watch_order_book_for_symbols(&["BTC/USDT", "ETH/USDT"])
                .await
        }
    });

    let mut connection = server.accept().await;
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topics": ["orderbook:BTC/USDT", "orderbook:ETH/USDT"] })
    );

    connection.push(json!({
        "channel": "delta", "symbol": "ETH/USDT", "first_nonce": 11, "nonce": 11,
        "bids": [["2000", "2"]], "asks": [],
    }));
    let eth_book = session.store().order_book("ETH/USDT").unwrap();
    eventually(|| eth_book.read().buffered().len() == 1).await;

    connection.push(json!({
        "channel": "snapshot", "symbol": "ETH/USDT", "nonce": 10,
        "bids": [["2000", "1"]], "asks": [["2001", "1"]],
    }));

    let (symbol, book) = watcher.await.unwrap().unwrap();
    assert_eq!(symbol, "ETH/USDT");
    assert!(Arc::ptr_eq(&book, &eth_book));
    assert_eq!(book.read().nonce(), Some(11));
    assert_eq!(book.read().bids().get(&dec!(2000)), Some(dec!(2)));

    let btc_book = session.store().order_book("BTC/USDT").unwrap();
    assert!(!btc_book.read().is_synced());
}

#[tokio::test]
async fn test_candle_upsert_replaces_same_timestamp() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_ohlcv("BTC/USDT", "1m").await }
    });

    let mut connection = server.accept().await;
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "ohlcv:1m:BTC/USDT" })
    );

    let candle = |close: f64| {
        json!({
            "time": "1970-01-01T00:00:01Z",
            "open": 10.0, "high": 11.0, "low": 9.5, "close": close, "volume": 3.0,
        })
    };

    connection.push(json!({ "channel": "ohlcv", "symbol": "BTC/USDT", "timeframe": "1m", "data": [candle(10.5)] }));
    let candles = watcher.await.unwrap().unwrap();
    assert_eq!(candles.read().len(), 1);

    connection.push(json!({ "channel": "ohlcv", "symbol": "BTC/USDT", "timeframe": "1m", "data": [candle(10.8)] }));
    eventually(|| candles.read().last().is_some_and(|candle| candle.close == 10.8)).await;
    assert_eq!(candles.read().len(), 1);
}

#[tokio::test]
async fn test_private_orders_authenticate_then_upsert() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_orders(None).await }
    });

    let mut connection = server.accept().await;
    assert_eq!(connection.url.as_str(), PRIVATE_URL);
    assert_eq!(
        connection.recv().await,
        json!({ "op": "login", "key": "test-key" })
    );
    connection.push(json!({ "channel": "login", "success": true }));
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "orders" })
    );

    connection.push(json!({ "channel": "orders", "data": [order("1", "open", 0.0)] }));
    let orders = watcher.await.unwrap().unwrap();
    assert_eq!(orders.read().len(), 1);

    // A symbol scoped watch reuses the authenticated connection without logging in again
    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_orders(Some("BTC/USDT")).await }
    });
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "orders:BTC/USDT" })
    );

    connection.push(json!({ "channel": "orders", "data": [order("1", "closed", 1.0)] }));
    let symbol_orders = watcher.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&orders, &symbol_orders));

    let orders = orders.read();
    assert_eq!(orders.len(), 1);
    let order = orders.get("BTC/USDT", "1").unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.remaining(), 0.0);
}

#[tokio::test]
async fn test_private_positions_replace_per_side() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_positions(None).await }
    });

    let mut connection = server.accept().await;
    assert_eq!(connection.url.as_str(), PRIVATE_URL);
    assert_eq!(
        connection.recv().await,
        json!({ "op": "login", "key": "test-key" })
    );
    connection.push(json!({ "channel": "login", "success": true }));
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "positions" })
    );

    let position = |side: &str, contracts: f64| {
        json!({
            "symbol": "BTC/USDT:USDT",
            "time": "2024-01-01T00:00:00Z",
            "side": side,
            "contracts": contracts,
            "entry_price": 42000.0,
        })
    };

    connection.push(json!({ "channel": "positions", "data": [position("long", 1.0), position("short", 2.0)] }));
    let positions = watcher.await.unwrap().unwrap();
    assert_eq!(positions.read().len(), 2);

    // A closed long replaces the open one, the short is untouched
    connection.push(json!({ "channel": "positions", "data": [position("long", 0.0)] }));
    eventually(|| {
        positions
            .read()
            .get_side("BTC/USDT:USDT", PositionSide::Long)
            .is_some_and(Position::is_flat)
    })
    .await;

    let positions = positions.read();
    assert_eq!(positions.len(), 2);
    assert_eq!(
        positions
            .get_side("BTC/USDT:USDT", PositionSide::Short)
            .map(|position| position.contracts),
        Some(2.0)
    );
}

#[tokio::test]
async fn test_authentication_failure_allows_retry() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_balance().await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    connection.push(json!({ "channel": "login", "success": false, "reason": "bad signature" }));
    assert_eq!(
        watcher.await.unwrap().unwrap_err(),
        StreamError::Authentication("bad signature".to_string())
    );

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_balance().await }
    });

    assert_eq!(
        connection.recv().await,
        json!({ "op": "login", "key": "test-key" })
    );
    connection.push(json!({ "channel": "login", "success": true }));
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "balance" })
    );
    connection.push(json!({
        "channel": "balance",
        "data": { "assets": { "USDT": { "free": 90.0, "used": 10.0, "total": 100.0 } } },
    }));

    let balance = watcher.await.unwrap().unwrap();
    assert_eq!(balance.get("USDT").map(|asset| asset.total), Some(100.0));
    assert_eq!(server.connects(), 1);
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_ticker("ETH/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    connection.push_frame(WsMessage::text("{not json"));
    connection.push(json!({ "channel": "unknown_channel" }));
    connection.push(json!({
        "channel": "ticker",
        "data": { "symbol": "ETH/USDT", "time": "2024-01-01T00:00:00Z", "bid": 1999.5 },
    }));

    let ticker = watcher.await.unwrap().unwrap();
    assert_eq!(ticker.bid, Some(1999.5));
    assert_eq!(session.store().ticker("ETH/USDT"), Some(ticker));
}

#[tokio::test]
async fn test_exchange_error_rejects_topic() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("NOPE/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    connection.push(json!({ "channel": "error", "topic": "trades:NOPE/USDT", "message": "unknown symbol" }));

    assert_eq!(
        watcher.await.unwrap().unwrap_err(),
        StreamError::Exchange("unknown symbol".to_string())
    );
    let client = session.client(&Url::parse(PUBLIC_URL).unwrap());
    assert!(!client.is_subscribed("trades:NOPE/USDT"));
    assert_eq!(client.status(), ConnectionStatus::Open);
}

#[tokio::test]
async fn test_exclusive_request_rejects_duplicate() {
    let (session, mut server) = session();
    let url = Url::parse(PUBLIC_URL).unwrap();
    let request = WatchRequest::new(url.clone(), "request:1")
        .with_payload(WsMessage::text(json!({ "op": "time", "id": "request:1" }).to_string()));

    let first = tokio::spawn({
        let session = session.clone();
        let request = request.clone();
        async move { session.watch(request).await }
    });

    let mut connection = server.accept().await;
    assert_eq!(
        connection.recv().await,
        json!({ "op": "time", "id": "request:1" })
    );

    assert_eq!(
        session.watch(request.clone()).await.unwrap_err(),
        StreamError::DuplicateRequest("request:1".into())
    );

    // Shared policy joins the pending request instead
    let joined = tokio::spawn({
        let session = session.clone();
        let request = request.with_policy(FuturePolicy::Shared);
        async move { session.watch(request).await }
    });
    connection.recv().await;

    connection.push(json!({ "channel": "response", "id": "request:1", "result": { "time": 1704067200000u64 } }));

    for outcome in [first.await.unwrap(), joined.await.unwrap()] {
        match outcome {
            Ok(Resolved::Response(value)) => assert_eq!(value["time"], 1704067200000u64),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_watch_multiple_resolves_first() {
    let (session, mut server) = session();
    let url = Url::parse(PUBLIC_URL).unwrap();

    let watcher = tokio::spawn({
        let session = session.clone();
        let url = url.clone();
        async move {
            let payload = WsMessage::text(json!({ "op": "subscribe", "topic": "trades:*" }).to_string());
            session
                .watch_multiple(
                    &url,
                    &["trades:BTC/USDT", "trades:ETH/USDT"],
                    Some(payload),
                    &["trades:BTC/USDT", "trades:ETH/USDT"],
                )
                .await
        }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    connection.push(json!({ "channel": "trades", "data": [trade("7", "ETH/USDT", 2000.0)] }));

    let (message_hash, resolved) = watcher.await.unwrap().unwrap();
    assert_eq!(message_hash, "trades:ETH/USDT");
    assert!(matches!(resolved, Resolved::Trades(trades) if trades.read().len() == 1));

    assert_eq!(
        session.watch_multiple(&url, &[], None, &[]).await.unwrap_err(),
        StreamError::EmptyWatch
    );
}

#[tokio::test]
async fn test_watch_trades_for_symbols_batches_new_topics() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .watch_trades_for_symbols(&["BTC/USDT", "ETH/USDT"])
                .await
        }
    });

    let mut connection = server.accept().await;
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topics": ["trades:BTC/USDT", "trades:ETH/USDT"] })
    );
    connection.push(json!({ "channel": "trades", "data": [trade("1", "ETH/USDT", 2000.0)] }));

    let (symbol, trades) = watcher.await.unwrap().unwrap();
    assert_eq!(symbol, "ETH/USDT");
    assert_eq!(trades.read().len(), 1);

    // Only the symbol without an active subscription is requested
    let watcher = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .watch_trades_for_symbols(&["ETH/USDT", "SOL/USDT"])
                .await
        }
    });
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topics": ["trades:SOL/USDT"] })
    );
    connection.push(json!({ "channel": "trades", "data": [trade("2", "SOL/USDT", 150.0)] }));

    let (symbol, _) = watcher.await.unwrap().unwrap();
    assert_eq!(symbol, "SOL/USDT");

    assert_eq!(
        session.watch_trades_for_symbols(&[]).await.unwrap_err(),
        StreamError::EmptyWatch
    );
    assert_eq!(
        session
            .watch_topics(&[Topic::trades("BTC/USDT"), Topic::Balance])
            .await
            .unwrap_err(),
        StreamError::MixedUrls("balance".into())
    );
}

#[tokio::test]
async fn test_unwatch_drops_cached_records() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("SOL/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    connection.push(json!({ "channel": "trades", "data": [trade("old", "SOL/USDT", 150.0)] }));
    let stale = watcher.await.unwrap().unwrap();

    session.unwatch(&Topic::trades("SOL/USDT")).unwrap();
    assert_eq!(
        connection.recv().await,
        json!({ "op": "unsubscribe", "topic": "trades:SOL/USDT" })
    );
    assert!(session.store().trades("SOL/USDT").is_none());

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("SOL/USDT").await }
    });
    assert_eq!(
        connection.recv().await,
        json!({ "op": "subscribe", "topic": "trades:SOL/USDT" })
    );
    connection.push(json!({ "channel": "trades", "data": [trade("new", "SOL/USDT", 151.0)] }));
    let fresh = watcher.await.unwrap().unwrap();

    let ids = fresh
        .read()
        .iter()
        .map(|trade| trade.id.clone())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["new"]);
    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert_eq!(stale.read().len(), 1);
}

#[tokio::test]
async fn test_unwatch_rejects_pending_and_unsubscribes() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("SOL/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;

    session.unwatch(&Topic::trades("SOL/USDT")).unwrap();
    assert_eq!(
        connection.recv().await,
        json!({ "op": "unsubscribe", "topic": "trades:SOL/USDT" })
    );
    assert_eq!(
        watcher.await.unwrap().unwrap_err(),
        StreamError::Unsubscribed("trades:SOL/USDT".into())
    );
}

#[tokio::test]
async fn test_close_rejects_pending() {
    let (session, mut server) = session();

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_my_trades(Some("BTC/USDT")).await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    let client = session.client(&Url::parse(PRIVATE_URL).unwrap());

    session.close().await;

    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert!(watcher.await.unwrap().unwrap_err().is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_watch_is_swept() {
    let config = config()
        .with_sweep_interval(Duration::from_secs(1))
        .with_future_ttl(Duration::from_secs(5));
    let (session, mut server) = session_with(config, None, 0);

    let watcher = tokio::spawn({
        let session = session.clone();
        async move { session.watch_trades("BTC/USDT").await }
    });

    let mut connection = server.accept().await;
    connection.recv().await;
    let client = session.client(&Url::parse(PUBLIC_URL).unwrap());
    assert!(client.is_pending("trades:BTC/USDT"));

    // Nobody resolves the watch, so the ttl expires it
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(
        watcher.await.unwrap().unwrap_err(),
        StreamError::Expired("trades:BTC/USDT".into())
    );
    assert_eq!(client.status(), ConnectionStatus::Open);
    drop(connection);
}
