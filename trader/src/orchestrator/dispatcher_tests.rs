use super::{TaskDispatcher, TaskOutcome, WorkHandler, WorkItem};
use crate::{
    engine::TradingEngine,
    gateway::InMemoryCredentialProvider,
    models::{Credential, MarketKind, OrderSide, Signal},
    testing::{MockConnector, MockGateway, USER, test_config},
};
use async_trait::async_trait;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;

#[test]
fn test_work_item_wire_format() {
    let item = WorkItem::from_json(
        r#"{"task": "signal", "user_id": 7,
            "signal": {"symbol": "BTC/USDT", "side": "buy", "market": "futures"}}"#,
    )
    .unwrap();
    assert!(matches!(item, WorkItem::Signal { user_id: 7, .. }));

    let item =
        WorkItem::from_json(r#"{"task": "reconcile_position", "user_id": 1, "position_id": 3}"#)
            .unwrap();
    assert_eq!(
        item,
        WorkItem::ReconcilePosition {
            user_id: 1,
            position_id: 3
        }
    );

    assert_eq!(
        WorkItem::from_json(r#"{"task": "reconcile_all"}"#).unwrap(),
        WorkItem::ReconcileAll
    );
    // 旧版任务名
    assert_eq!(
        WorkItem::from_json(r#"{"task": "update_trade_status", "trade_id": 5}"#).unwrap(),
        WorkItem::Unsupported
    );
    assert!(WorkItem::from_json(r#"{"user_id": 1}"#).is_err());
}

struct SlowCounter {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl WorkHandler for SlowCounter {
    async fn handle(&self, item: WorkItem) -> TaskOutcome {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        match item {
            WorkItem::Unsupported => TaskOutcome::Unsupported,
            other => TaskOutcome::Completed(other.name().to_string()),
        }
    }
}

#[tokio::test]
async fn test_dispatcher_bounds_concurrency() {
    let handler = Arc::new(SlowCounter {
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = TaskDispatcher::new(handler.clone(), 2, 16).with_outcome_sink(tx);
    dispatcher.start().await.unwrap();
    assert!(dispatcher.start().await.is_err());

    for _ in 0..5 {
        dispatcher.submit(WorkItem::ReconcileAll).await.unwrap();
    }
    dispatcher
        .submit_json(r#"{"task": "legacy_cleanup"}"#)
        .await
        .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.push(rx.recv().await.unwrap());
    }
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(
        outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == TaskOutcome::Unsupported)
            .count(),
        1
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_engine_fans_signal_out_to_active_users() {
    let gateway = Arc::new(MockGateway::new());
    let credentials = Arc::new(InMemoryCredentialProvider::new());
    for user_id in [USER, 2, 3] {
        credentials
            .insert(
                user_id,
                Credential {
                    api_key: format!("key-{}", user_id),
                    api_secret: "secret".to_string(),
                },
            )
            .await;
    }
    credentials.set_active(3, false).await.unwrap();

    let engine = TradingEngine::new(
        test_config(),
        credentials,
        Arc::new(MockConnector {
            gateway: gateway.clone(),
        }),
    )
    .unwrap();
    engine.start().await.unwrap();

    let users = engine
        .submit_signal(Signal {
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            market: MarketKind::Futures,
            stop_price: None,
            target_price: None,
            target_ladder: None,
        })
        .await
        .unwrap();
    assert_eq!(users, 2);

    let mut opened = 0;
    for _ in 0..100 {
        opened = [USER, 2]
            .iter()
            .map(|user_id| engine.positions(*user_id).unwrap().len())
            .sum::<usize>();
        if opened == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(opened, 2);
    assert!(engine.positions(3).unwrap().is_empty());

    // 平仓后按需对账返回已关闭
    let position = engine.positions(USER).unwrap().remove(0);
    engine.close_position(USER, position.id).await.unwrap();
    let report = engine.refresh_position(USER, position.id).await.unwrap();
    assert_eq!(report.transitions, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_engine_from_config_file() {
    let mut config_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    std::io::Write::write_all(
        &mut config_file,
        br#"{ "db_path": ":memory:", "log_level": "debug", "worker_count": 2 }"#,
    )
    .unwrap();

    let engine = TradingEngine::from_config_file(
        config_file.path().to_str().unwrap(),
        Arc::new(InMemoryCredentialProvider::new()),
        Arc::new(MockConnector {
            gateway: Arc::new(MockGateway::new()),
        }),
    )
    .unwrap();
    assert!(engine.positions(USER).unwrap().is_empty());

    let missing = TradingEngine::from_config_file(
        "/nonexistent/trader.toml",
        Arc::new(InMemoryCredentialProvider::new()),
        Arc::new(MockConnector {
            gateway: Arc::new(MockGateway::new()),
        }),
    );
    assert!(missing.is_err());
}
