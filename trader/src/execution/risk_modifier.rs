use crate::{
    errors::{Result, TradeError},
    execution::{Reconciler, entry_engine::place_target, pnl, sizing},
    gateway::{SessionFactory, cancel_best_effort},
    models::{
        ConditionalKind, ConditionalOrderRequest, LadderStep, MarketKind, NewProfitLeg, Position,
        PositionId, ProfitLeg, TradeStatus, UserId,
    },
    store::PositionStore,
};
use rust_decimal::Decimal;

/// 替换或移除未平仓持仓的止损与止盈
#[derive(Clone)]
pub struct RiskModifier {
    store: PositionStore,
    sessions: SessionFactory,
    reconciler: Reconciler,
}

fn ensure_open(position: &Position) -> Result<()> {
    if !position.is_open() {
        return Err(TradeError::validation(format!(
            "position {} is {}",
            position.id,
            position.status.as_str()
        )));
    }
    Ok(())
}

impl RiskModifier {
    pub fn new(store: PositionStore, sessions: SessionFactory) -> Self {
        let reconciler = Reconciler::new(store.clone(), sessions.clone());
        Self {
            store,
            sessions,
            reconciler,
        }
    }

    /// 设置新止损；`None` 表示撤销止损
    ///
    /// 新止损按剩余未平数量下单。
    pub async fn set_stop(
        &self,
        user_id: UserId,
        position_id: PositionId,
        stop_price: Option<Decimal>,
    ) -> Result<Position> {
        let position = self.store.get_user_position(user_id, position_id)?;
        ensure_open(&position)?;
        let symbol = position.symbol.as_str();
        let gateway = self.sessions.open(user_id, position.market).await?;

        let Some(stop_price) = stop_price else {
            self.reconciler
                .settle_before_change(gateway.as_ref(), &position)
                .await?;
            if let Some(order_id) = position.live_stop_order_id() {
                cancel_best_effort(gateway.as_ref(), order_id, symbol).await;
            }
            log::info!("Stop removed from position {}", position.id);
            return self
                .store
                .update_stop(position.id, None, None, TradeStatus::Cancelled)?
                .ok_or_else(|| {
                    TradeError::validation(format!("position {} closed concurrently", position.id))
                });
        };

        let reference = gateway.get_last_price(symbol).await?;
        sizing::validate_stop(position.direction, stop_price, reference)?;
        let limits = gateway.get_market_limits(symbol).await?;
        let stop_price = sizing::round_price(stop_price, limits.price_precision);
        let legs = self.store.get_legs(position.id)?;
        let quantity = sizing::round_quantity(
            pnl::open_quantity(&position, &legs),
            limits.quantity_precision,
        );
        if quantity <= Decimal::ZERO {
            return Err(TradeError::validation(format!(
                "position {} has no open quantity to protect",
                position.id
            )));
        }

        // 旧止损或止盈腿可能已在交易所成交
        self.reconciler
            .settle_before_change(gateway.as_ref(), &position)
            .await?;
        if let Some(order_id) = position.live_stop_order_id() {
            cancel_best_effort(gateway.as_ref(), order_id, symbol).await;
        }

        let order = match gateway
            .place_conditional_order(&ConditionalOrderRequest {
                symbol: symbol.to_string(),
                side: position.direction.exit_side(),
                kind: ConditionalKind::Stop,
                trigger_price: stop_price,
                quantity,
                reduce_only: position.market == MarketKind::Futures,
            })
            .await
        {
            Ok(order) => order,
            Err(e) => {
                log::warn!(
                    "Position {} left unprotected, new stop at {} failed: {}",
                    position.id,
                    stop_price,
                    e
                );
                self.store
                    .update_stop(position.id, None, None, TradeStatus::Cancelled)?;
                return Err(e);
            }
        };

        match self.store.update_stop(
            position.id,
            Some(&order.order_id),
            Some(order.trigger_price),
            TradeStatus::Position,
        )? {
            Some(updated) => {
                log::info!(
                    "Stop of position {} replaced: {} at {}",
                    position.id,
                    order.order_id,
                    order.trigger_price
                );
                Ok(updated)
            }
            None => {
                cancel_best_effort(gateway.as_ref(), &order.order_id, symbol).await;
                Err(TradeError::validation(format!(
                    "position {} closed concurrently",
                    position.id
                )))
            }
        }
    }

    /// 以新阶梯替换全部未成交的止盈腿，已成交的腿保留
    ///
    /// 空阶梯表示撤销全部止盈。新阶梯按剩余未平数量拆分。
    pub async fn set_targets(
        &self,
        user_id: UserId,
        position_id: PositionId,
        ladder: &[LadderStep],
    ) -> Result<Vec<ProfitLeg>> {
        sizing::validate_ladder(ladder)?;
        let position = self.store.get_user_position(user_id, position_id)?;
        ensure_open(&position)?;
        if position.market == MarketKind::Spot {
            return Err(TradeError::validation(
                "profit ladders are only supported on futures",
            ));
        }
        let symbol = position.symbol.as_str();
        let gateway = self.sessions.open(user_id, position.market).await?;

        let reference = gateway.get_last_price(symbol).await?;
        for step in ladder {
            sizing::validate_target(position.direction, step.price, reference)?;
        }
        let limits = gateway.get_market_limits(symbol).await?;
        let legs = self.store.get_legs(position.id)?;
        let base_quantity = pnl::open_quantity(&position, &legs);
        let planned = sizing::plan_ladder(ladder, base_quantity, &limits);

        self.reconciler
            .settle_before_change(gateway.as_ref(), &position)
            .await?;
        for leg in legs.iter().filter(|leg| leg.is_live()) {
            cancel_best_effort(gateway.as_ref(), &leg.order_id, symbol).await;
        }

        let mut placed = Vec::with_capacity(planned.len());
        for leg in &planned {
            match place_target(gateway.as_ref(), symbol, position.direction, leg).await {
                Ok(order_id) => placed.push(NewProfitLeg {
                    order_id,
                    price: leg.price,
                    percent: leg.percent,
                    quantity: leg.quantity,
                }),
                Err(e) => log::warn!(
                    "Position {} target at {} not placed: {}",
                    position.id,
                    leg.price,
                    e
                ),
            }
        }

        match self.store.replace_live_legs(position.id, &placed) {
            Ok(legs) => {
                log::info!(
                    "Targets of position {} replaced with {} legs",
                    position.id,
                    placed.len()
                );
                Ok(legs)
            }
            Err(e) => {
                for leg in &placed {
                    cancel_best_effort(gateway.as_ref(), &leg.order_id, symbol).await;
                }
                Err(e)
            }
        }
    }
}
