use crate::{
    config::EngineConfig,
    errors::Result,
    execution::{
        CloseOutcome, EntryEngine, EntryOutcome, EntryRequest, PositionCloser,
        retry::retry_with_backoff, sizing,
    },
    models::{Direction, MarketKind, OrderSide, Position, PositionId, Signal, UserId},
    orchestrator::SymbolLocks,
    store::PositionStore,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Opened(EntryOutcome),
    /// 平掉反向持仓后按新方向开仓
    Reversed {
        closed: Vec<Position>,
        opened: EntryOutcome,
    },
    /// 已有同向持仓，信号被忽略
    Duplicate { position_id: PositionId },
    /// 反向持仓被固定，信号被忽略
    Pinned { position_id: PositionId },
    /// 现货卖出信号平掉的持仓
    Liquidated { closed: Vec<Position> },
    NothingToClose,
}

impl SignalOutcome {
    pub fn describe(&self) -> String {
        match self {
            SignalOutcome::Opened(outcome) => format!("opened position {}", outcome.position.id),
            SignalOutcome::Reversed { closed, opened } => format!(
                "closed {} position(s), opened position {}",
                closed.len(),
                opened.position.id
            ),
            SignalOutcome::Duplicate { position_id } => {
                format!("position {} already in signal direction", position_id)
            }
            SignalOutcome::Pinned { position_id } => {
                format!("position {} ignores opposite signals", position_id)
            }
            SignalOutcome::Liquidated { closed } => {
                format!("closed {} spot position(s)", closed.len())
            }
            SignalOutcome::NothingToClose => "no open spot position to close".to_string(),
        }
    }
}

/// 根据信号决定开仓、忽略或反手
#[derive(Clone)]
pub struct SignalOrchestrator {
    config: Arc<EngineConfig>,
    store: PositionStore,
    locks: SymbolLocks,
    entry: EntryEngine,
    closer: PositionCloser,
}

impl SignalOrchestrator {
    pub fn new(
        config: Arc<EngineConfig>,
        store: PositionStore,
        locks: SymbolLocks,
        entry: EntryEngine,
        closer: PositionCloser,
    ) -> Self {
        Self {
            config,
            store,
            locks,
            entry,
            closer,
        }
    }

    pub async fn handle_signal(&self, user_id: UserId, signal: &Signal) -> Result<SignalOutcome> {
        if signal.market == MarketKind::Futures {
            sizing::validate_ladder(&signal.ladder())?;
        }
        let _guard = self.locks.acquire(user_id, &signal.symbol).await;
        log::info!(
            "Handle {} {} signal on {} for user {}",
            signal.market.as_str(),
            signal.side.as_str(),
            signal.symbol,
            user_id
        );

        match signal.market {
            MarketKind::Futures => self.handle_futures(user_id, signal).await,
            MarketKind::Spot => self.handle_spot(user_id, signal).await,
        }
    }

    async fn handle_futures(&self, user_id: UserId, signal: &Signal) -> Result<SignalOutcome> {
        let direction = signal.direction();
        let open =
            self.store
                .list_open_positions_for(user_id, &signal.symbol, MarketKind::Futures)?;

        if let Some(existing) = open.iter().find(|p| p.direction == direction) {
            log::info!(
                "Duplicate {} signal on {} suppressed, position {} open",
                direction.as_str(),
                signal.symbol,
                existing.id
            );
            return Ok(SignalOutcome::Duplicate {
                position_id: existing.id,
            });
        }
        if let Some(pinned) = open.iter().find(|p| p.ignore_opposite_signal) {
            log::info!(
                "Opposite signal on {} ignored, position {} is pinned",
                signal.symbol,
                pinned.id
            );
            return Ok(SignalOutcome::Pinned {
                position_id: pinned.id,
            });
        }

        let mut closed = Vec::with_capacity(open.len());
        for position in &open {
            let outcome = self.close_with_retry(position).await?;
            closed.push(outcome.position().clone());
        }

        let opened = self.open_with_retry(user_id, signal).await?;
        if closed.is_empty() {
            Ok(SignalOutcome::Opened(opened))
        } else {
            log::info!(
                "Reversed {} to {} on {} for user {}",
                closed.len(),
                direction.as_str(),
                signal.symbol,
                user_id
            );
            Ok(SignalOutcome::Reversed { closed, opened })
        }
    }

    /// 现货只做多：买入信号总是开新仓，卖出信号平掉该交易对全部多头
    async fn handle_spot(&self, user_id: UserId, signal: &Signal) -> Result<SignalOutcome> {
        if signal.side == OrderSide::Buy {
            let opened = self.open_with_retry(user_id, signal).await?;
            return Ok(SignalOutcome::Opened(opened));
        }

        let open: Vec<Position> = self
            .store
            .list_open_positions_for(user_id, &signal.symbol, MarketKind::Spot)?
            .into_iter()
            .filter(|p| p.direction == Direction::Long)
            .collect();
        if open.is_empty() {
            return Ok(SignalOutcome::NothingToClose);
        }

        let mut closed = Vec::with_capacity(open.len());
        let mut last_error = None;
        for position in &open {
            match self.close_with_retry(position).await {
                Ok(outcome) => closed.push(outcome.position().clone()),
                Err(e) => {
                    log::error!("Fail to liquidate spot position {}: {}", position.id, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if closed.is_empty() => Err(e),
            _ => Ok(SignalOutcome::Liquidated { closed }),
        }
    }

    async fn open_with_retry(&self, user_id: UserId, signal: &Signal) -> Result<EntryOutcome> {
        let req = EntryRequest::from_signal(user_id, signal);
        retry_with_backoff(&self.config.retry, "open position", || {
            self.entry.open_position(&req)
        })
        .await
    }

    async fn close_with_retry(&self, position: &Position) -> Result<CloseOutcome> {
        retry_with_backoff(&self.config.retry, "close position", || {
            self.closer.close(position)
        })
        .await
    }
}
