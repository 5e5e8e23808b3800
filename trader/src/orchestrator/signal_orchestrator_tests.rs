use super::SignalOutcome;
use crate::{
    errors::TradeError,
    models::{Direction, LadderStep, MarketKind, OrderSide, Signal, TradeStatus},
    testing::{USER, harness},
};
use rust_decimal_macros::dec;
use std::time::Duration;

fn signal(side: OrderSide, market: MarketKind) -> Signal {
    Signal {
        symbol: "BTC/USDT".to_string(),
        side,
        market,
        stop_price: None,
        target_price: None,
        target_ladder: None,
    }
}

#[tokio::test]
async fn test_first_signal_opens_position() {
    let h = harness().await;
    let outcome = h
        .orchestrator()
        .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
        .await
        .unwrap();
    match outcome {
        SignalOutcome::Opened(entry) => assert_eq!(entry.position.direction, Direction::Long),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_same_direction_signal_is_suppressed() {
    let h = harness().await;
    let orchestrator = h.orchestrator();
    orchestrator
        .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
        .await
        .unwrap();
    let outcome = orchestrator
        .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
        .await
        .unwrap();
    assert!(matches!(outcome, SignalOutcome::Duplicate { .. }));
    assert_eq!(h.gateway.market_orders().len(), 1);
}

#[tokio::test]
async fn test_opposite_signal_reverses() {
    let h = harness().await;
    let orchestrator = h.orchestrator();
    orchestrator
        .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
        .await
        .unwrap();
    h.gateway.set_price("BTC/USDT", dec!(110));

    let outcome = orchestrator
        .handle_signal(USER, &signal(OrderSide::Sell, MarketKind::Futures))
        .await
        .unwrap();
    let SignalOutcome::Reversed { closed, opened } = outcome else {
        panic!("expected reversal");
    };
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].status, TradeStatus::Closed);
    assert_eq!(closed[0].pnl, dec!(125));
    assert_eq!(opened.position.direction, Direction::Short);

    let open = h
        .store
        .list_open_positions_for(USER, "BTC/USDT", MarketKind::Futures)
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, opened.position.id);
}

#[tokio::test]
async fn test_pinned_position_ignores_opposite_signal() {
    let h = harness().await;
    let orchestrator = h.orchestrator();
    let SignalOutcome::Opened(entry) = orchestrator
        .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
        .await
        .unwrap()
    else {
        panic!("expected entry");
    };
    h.store
        .set_ignore_opposite_signal(USER, entry.position.id, true)
        .unwrap();
    let orders_before = h.gateway.remote_order_count();

    let outcome = orchestrator
        .handle_signal(USER, &signal(OrderSide::Sell, MarketKind::Futures))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SignalOutcome::Pinned { position_id } if position_id == entry.position.id
    ));
    assert_eq!(h.gateway.remote_order_count(), orders_before);
    assert!(h.gateway.cancelled_orders().is_empty());
    assert!(h.store.get_position(entry.position.id).unwrap().is_open());
}

#[tokio::test]
async fn test_concurrent_opposite_signals_leave_one_position() {
    let h = harness().await;
    h.gateway.set_delay(Duration::from_millis(20));
    let orchestrator = h.orchestrator();

    let buy = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
                .await
        })
    };
    let sell = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .handle_signal(USER, &signal(OrderSide::Sell, MarketKind::Futures))
                .await
        })
    };
    let first = buy.await.unwrap().unwrap();
    let second = sell.await.unwrap().unwrap();

    let reversals = [&first, &second]
        .iter()
        .filter(|o| matches!(o, SignalOutcome::Reversed { .. }))
        .count();
    assert_eq!(reversals, 1);

    let open = h
        .store
        .list_open_positions_for(USER, "BTC/USDT", MarketKind::Futures)
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(h.store.list_user_positions(USER).unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_duplicate_reversals_close_once() {
    let h = harness().await;
    let orchestrator = h.orchestrator();
    orchestrator
        .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
        .await
        .unwrap();
    h.gateway.set_delay(Duration::from_millis(20));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_signal(USER, &signal(OrderSide::Sell, MarketKind::Futures))
                    .await
            })
        })
        .collect();
    let mut reversed = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            SignalOutcome::Reversed { .. } => reversed += 1,
            SignalOutcome::Duplicate { .. } => duplicates += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!((reversed, duplicates), (1, 2));

    let open = h
        .store
        .list_open_positions_for(USER, "BTC/USDT", MarketKind::Futures)
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].direction, Direction::Short);
}

#[tokio::test]
async fn test_transient_entry_failure_is_retried() {
    let h = harness().await;
    h.gateway.fail_next_market_orders(2);
    let outcome = h
        .orchestrator()
        .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
        .await
        .unwrap();
    assert!(matches!(outcome, SignalOutcome::Opened(_)));
    assert_eq!(h.gateway.market_orders().len(), 1);
}

#[tokio::test]
async fn test_persistent_gateway_failure_surfaces() {
    let h = harness().await;
    h.gateway.fail_next_market_orders(5);
    let err = h
        .orchestrator()
        .handle_signal(USER, &signal(OrderSide::Buy, MarketKind::Futures))
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::GatewayError { .. }));
    assert!(h.store.list_user_positions(USER).unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_ladder_signal_places_nothing() {
    let h = harness().await;
    let mut oversized = signal(OrderSide::Buy, MarketKind::Futures);
    oversized.target_ladder = Some(vec![
        LadderStep {
            price: dec!(110),
            percent: dec!(100),
        },
        LadderStep {
            price: dec!(120),
            percent: dec!(50),
        },
    ]);
    let err = h
        .orchestrator()
        .handle_signal(USER, &oversized)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::ValidationError { .. }));
    assert_eq!(h.gateway.remote_order_count(), 0);
}

#[tokio::test]
async fn test_spot_sell_liquidates_all_longs() {
    let h = harness().await;
    let orchestrator = h.orchestrator();
    let buy = signal(OrderSide::Buy, MarketKind::Spot);
    orchestrator.handle_signal(USER, &buy).await.unwrap();
    orchestrator.handle_signal(USER, &buy).await.unwrap();
    assert_eq!(
        h.store
            .list_open_positions_for(USER, "BTC/USDT", MarketKind::Spot)
            .unwrap()
            .len(),
        2
    );

    let outcome = orchestrator
        .handle_signal(USER, &signal(OrderSide::Sell, MarketKind::Spot))
        .await
        .unwrap();
    let SignalOutcome::Liquidated { closed } = outcome else {
        panic!("expected liquidation");
    };
    assert_eq!(closed.len(), 2);
    assert!(
        h.store
            .list_open_positions_for(USER, "BTC/USDT", MarketKind::Spot)
            .unwrap()
            .is_empty()
    );

    let outcome = orchestrator
        .handle_signal(USER, &signal(OrderSide::Sell, MarketKind::Spot))
        .await
        .unwrap();
    assert!(matches!(outcome, SignalOutcome::NothingToClose));
}

#[tokio::test]
async fn test_spot_buy_with_targets_opens_without_targets() {
    let h = harness().await;
    let mut buy = signal(OrderSide::Buy, MarketKind::Spot);
    buy.target_price = Some(dec!(120));
    let outcome = h.orchestrator().handle_signal(USER, &buy).await.unwrap();
    let SignalOutcome::Opened(entry) = outcome else {
        panic!("expected spot entry");
    };
    assert!(entry.legs.is_empty());
    assert_eq!(h.gateway.market_orders().len(), 1);
    assert!(h.gateway.conditional_orders().is_empty());

    // 现货止盈阶梯同样被忽略，即使比例不合法
    let mut buy = signal(OrderSide::Buy, MarketKind::Spot);
    buy.target_ladder = Some(vec![
        LadderStep {
            price: dec!(110),
            percent: dec!(100),
        },
        LadderStep {
            price: dec!(120),
            percent: dec!(50),
        },
    ]);
    let outcome = h.orchestrator().handle_signal(USER, &buy).await.unwrap();
    assert!(matches!(outcome, SignalOutcome::Opened(_)));
    assert_eq!(h.gateway.market_orders().len(), 2);
}
