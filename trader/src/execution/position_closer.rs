use crate::{
    errors::{Result, TradeError},
    execution::{pnl, sizing},
    gateway::{SessionFactory, cancel_best_effort},
    models::{CloseReason, ExitFill, MarketKind, Position, PositionId, UserId},
    store::PositionStore,
};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub enum CloseOutcome {
    Closed(Position),
    /// 持仓此前已被关闭（对账或并发平仓），未做任何修改
    AlreadyClosed(Position),
}

impl CloseOutcome {
    pub fn position(&self) -> &Position {
        match self {
            CloseOutcome::Closed(position) | CloseOutcome::AlreadyClosed(position) => position,
        }
    }
}

/// 市价立即平仓
#[derive(Clone)]
pub struct PositionCloser {
    store: PositionStore,
    sessions: SessionFactory,
}

impl PositionCloser {
    pub fn new(store: PositionStore, sessions: SessionFactory) -> Self {
        Self { store, sessions }
    }

    pub async fn close_by_id(&self, user_id: UserId, position_id: PositionId) -> Result<CloseOutcome> {
        let position = self.store.get_user_position(user_id, position_id)?;
        self.close(&position).await
    }

    /// 先以市价平掉剩余数量，再尽力撤销止损与未成交的止盈腿
    pub async fn close(&self, position: &Position) -> Result<CloseOutcome> {
        let position = self.store.get_position(position.id)?;
        if !position.is_open() {
            return Ok(CloseOutcome::AlreadyClosed(position));
        }
        let symbol = position.symbol.as_str();
        let gateway = self.sessions.open(position.user_id, position.market).await?;
        let limits = gateway.get_market_limits(symbol).await?;
        let legs = self.store.get_legs(position.id)?;
        let quantity = sizing::round_quantity(
            pnl::open_quantity(&position, &legs),
            limits.quantity_precision,
        );

        if position.market == MarketKind::Spot && quantity < limits.min_quantity {
            return Err(TradeError::validation(format!(
                "position {} quantity {} below minimum {}",
                position.id, quantity, limits.min_quantity
            )));
        }

        let exit = if quantity > Decimal::ZERO {
            let fill = gateway
                .place_market_order(
                    symbol,
                    position.direction.exit_side(),
                    quantity,
                    position.market == MarketKind::Futures,
                )
                .await?;
            log::info!(
                "Position {} flattened: {} {} @ {} (order {})",
                position.id,
                fill.quantity,
                symbol,
                fill.avg_price,
                fill.order_id
            );
            Some(ExitFill {
                price: fill.avg_price,
                quantity: fill.quantity,
                fee: fill.fee,
            })
        } else {
            None
        };

        if let Some(order_id) = position.live_stop_order_id() {
            cancel_best_effort(gateway.as_ref(), order_id, symbol).await;
        }
        for leg in legs.iter().filter(|leg| leg.is_live()) {
            cancel_best_effort(gateway.as_ref(), &leg.order_id, symbol).await;
        }

        match self
            .store
            .close_position(position.id, CloseReason::Manual, exit)?
        {
            Some(closed) => {
                log::info!(
                    "Position {} closed, pnl {} ({}%)",
                    closed.id,
                    closed.pnl,
                    closed.pnl_percentage
                );
                Ok(CloseOutcome::Closed(closed))
            }
            None => {
                log::warn!(
                    "Position {} was closed concurrently while flattening",
                    position.id
                );
                Ok(CloseOutcome::AlreadyClosed(
                    self.store.get_position(position.id)?,
                ))
            }
        }
    }
}
