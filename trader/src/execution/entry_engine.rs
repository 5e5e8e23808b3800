use crate::{
    config::EngineConfig,
    errors::{Result, TradeError},
    execution::sizing::{self, PlannedLeg},
    gateway::{ExchangeGateway, SessionFactory},
    models::{
        ConditionalKind, ConditionalOrderRequest, Direction, LadderStep, MarketKind, NewPosition,
        NewProfitLeg, OrderSide, Position, ProfitLeg, Signal, TradeStatus, UserId,
    },
    store::PositionStore,
    utils::split_symbol,
};
use rust_decimal::Decimal;
use std::{fmt, sync::Arc};

/// 开仓请求
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub user_id: UserId,
    pub symbol: String,
    pub side: OrderSide,
    pub market: MarketKind,
    pub stop_price: Option<Decimal>,
    pub ladder: Vec<LadderStep>,
    /// 覆盖配置中的杠杆（仅合约）
    pub leverage: Option<u32>,
    /// 覆盖配置中的仓位比例
    pub allocation_percent: Option<Decimal>,
}

impl EntryRequest {
    /// 现货信号上的止盈被忽略
    pub fn from_signal(user_id: UserId, signal: &Signal) -> Self {
        let ladder = match signal.market {
            MarketKind::Futures => signal.ladder(),
            MarketKind::Spot => {
                if signal.target_price.is_some() || signal.target_ladder.is_some() {
                    log::warn!(
                        "Spot targets on {} ignored for user {}",
                        signal.symbol,
                        user_id
                    );
                }
                Vec::new()
            }
        };
        Self {
            user_id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            market: signal.market,
            stop_price: signal.stop_price,
            ladder,
            leverage: None,
            allocation_percent: None,
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::from_side(self.side)
    }

    /// 不需要行情即可完成的校验
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(TradeError::validation("symbol is empty"));
        }
        if self.market == MarketKind::Spot {
            if self.side == OrderSide::Sell {
                return Err(TradeError::validation("spot entries are long only"));
            }
            if !self.ladder.is_empty() {
                return Err(TradeError::validation(
                    "profit ladders are only supported on futures",
                ));
            }
        }
        if self.leverage == Some(0) {
            return Err(TradeError::validation("leverage must be at least 1"));
        }
        if let Some(price) = self.stop_price {
            if price <= Decimal::ZERO {
                return Err(TradeError::validation(format!(
                    "stop price {} must be positive",
                    price
                )));
            }
        }
        sizing::validate_ladder(&self.ladder)
    }
}

/// 入场已成交但保护单未能全部挂出
#[derive(Debug, Clone, PartialEq)]
pub enum PartialExecutionWarning {
    /// 显式止损/止盈方向不合法，保护单全部放弃
    ProtectionAborted { reason: String },
    StopNotPlaced { reason: String },
    TargetNotPlaced { price: Decimal, reason: String },
}

impl fmt::Display for PartialExecutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialExecutionWarning::ProtectionAborted { reason } => {
                write!(f, "protection aborted: {}", reason)
            }
            PartialExecutionWarning::StopNotPlaced { reason } => {
                write!(f, "stop not placed: {}", reason)
            }
            PartialExecutionWarning::TargetNotPlaced { price, reason } => {
                write!(f, "target at {} not placed: {}", price, reason)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub position: Position,
    pub legs: Vec<ProfitLeg>,
    pub warnings: Vec<PartialExecutionWarning>,
}

impl EntryOutcome {
    pub fn is_fully_protected(&self) -> bool {
        self.warnings.is_empty()
    }
}

struct PlacedStop {
    order_id: String,
    price: Decimal,
}

#[derive(Clone)]
pub struct EntryEngine {
    config: Arc<EngineConfig>,
    store: PositionStore,
    sessions: SessionFactory,
}

impl EntryEngine {
    pub fn new(config: Arc<EngineConfig>, store: PositionStore, sessions: SessionFactory) -> Self {
        Self {
            config,
            store,
            sessions,
        }
    }

    /// 计算数量、市价入场、挂止损与止盈阶梯并落库
    ///
    /// 市价单成交后不再返回错误（落库失败除外），保护单问题以警告形式返回。
    pub async fn open_position(&self, req: &EntryRequest) -> Result<EntryOutcome> {
        req.validate()?;
        let direction = req.direction();
        let symbol = req.symbol.as_str();

        let gateway = self.sessions.open(req.user_id, req.market).await?;
        let last_price = gateway.get_last_price(symbol).await?;
        let balances = gateway.get_balance().await?;
        let limits = gateway.get_market_limits(symbol).await?;

        let (base_asset, quote_asset) = split_symbol(symbol);
        let quote_asset = if quote_asset.is_empty() {
            self.config.quote_asset.clone()
        } else {
            quote_asset
        };
        let free_balance = balances
            .get(&quote_asset)
            .copied()
            .unwrap_or(Decimal::ZERO);

        let (leverage, allocation_percent) = match req.market {
            MarketKind::Futures => (
                req.leverage.unwrap_or(self.config.futures.leverage),
                req.allocation_percent
                    .unwrap_or(self.config.futures.allocation_percent),
            ),
            MarketKind::Spot => (
                1,
                req.allocation_percent
                    .unwrap_or(self.config.spot.allocation_percent),
            ),
        };
        let quantity = sizing::order_quantity(
            free_balance,
            allocation_percent,
            leverage,
            last_price,
            &limits,
        )?;

        if req.market == MarketKind::Futures {
            self.prepare_futures_account(gateway.as_ref(), symbol, leverage)
                .await;
        }

        let fill = gateway
            .place_market_order(symbol, direction.entry_side(), quantity, false)
            .await?;
        log::info!(
            "Entry filled for user {}: {} {} {} @ {} (order {})",
            req.user_id,
            direction.as_str(),
            fill.quantity,
            symbol,
            fill.avg_price,
            fill.order_id
        );

        let net_quantity = match req.market {
            MarketKind::Spot if fill.fee_currency == base_asset => {
                sizing::round_quantity(fill.quantity - fill.fee, limits.quantity_precision)
            }
            _ => fill.quantity,
        };
        let tradable_quantity = match req.market {
            MarketKind::Spot => net_quantity,
            MarketKind::Futures => fill.quantity,
        };

        let mut warnings = Vec::new();
        let mut stop = None;
        let mut placed_legs = Vec::new();

        let reference = match gateway.get_last_price(symbol).await {
            Ok(price) => price,
            Err(e) => {
                log::warn!("Fail to refresh price for {}, use fill average: {}", symbol, e);
                fill.avg_price
            }
        };

        match self.validate_protection(req, direction, reference) {
            Err(e) => warnings.push(PartialExecutionWarning::ProtectionAborted {
                reason: e.to_string(),
            }),
            Ok(()) => {
                let stop_price = match (req.market, req.stop_price) {
                    (_, Some(price)) => Some(sizing::round_price(price, limits.price_precision)),
                    (MarketKind::Futures, None) => Some(sizing::default_stop_price(
                        direction,
                        fill.avg_price,
                        self.config.default_stop_percent,
                        limits.price_precision,
                    )),
                    (MarketKind::Spot, None) => None,
                };
                if let Some(stop_price) = stop_price {
                    match self
                        .place_stop(
                            gateway.as_ref(),
                            req,
                            direction,
                            stop_price,
                            tradable_quantity,
                        )
                        .await
                    {
                        Ok(placed) => stop = Some(placed),
                        Err(e) => warnings.push(PartialExecutionWarning::StopNotPlaced {
                            reason: e.to_string(),
                        }),
                    }
                }

                let planned = sizing::plan_ladder(&req.ladder, tradable_quantity, &limits);
                for leg in planned {
                    match place_target(gateway.as_ref(), symbol, direction, &leg).await {
                        Ok(order_id) => placed_legs.push(NewProfitLeg {
                            order_id,
                            price: leg.price,
                            percent: leg.percent,
                            quantity: leg.quantity,
                        }),
                        Err(e) => {
                            log::warn!("Fail to place target at {} for {}: {}", leg.price, symbol, e);
                            warnings.push(PartialExecutionWarning::TargetNotPlaced {
                                price: leg.price,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        let new_position = NewPosition {
            user_id: req.user_id,
            entry_order_id: fill.order_id.clone(),
            symbol: symbol.to_string(),
            market: req.market,
            direction,
            leverage,
            quantity: fill.quantity,
            net_quantity,
            entry_price: fill.avg_price,
            entry_fee: fill.fee,
            entry_fee_currency: fill.fee_currency.clone(),
            stop_order_id: stop.as_ref().map(|s| s.order_id.clone()),
            stop_price: stop.as_ref().map(|s| s.price),
            stop_status: if stop.is_some() {
                TradeStatus::Position
            } else {
                TradeStatus::Cancelled
            },
        };
        let (position, legs) = self
            .store
            .insert_position_with_legs(&new_position, &placed_legs)
            .map_err(|e| {
                log::error!(
                    "Entry order {} filled on {} but not recorded: {}",
                    fill.order_id,
                    symbol,
                    e
                );
                e
            })?;

        for warning in &warnings {
            log::warn!(
                "Position {} ({} {}) left unprotected: {}",
                position.id,
                symbol,
                direction.as_str(),
                warning
            );
        }
        log::info!(
            "Position {} opened: {} {} x{}, stop {:?}, {} target legs",
            position.id,
            symbol,
            direction.as_str(),
            leverage,
            position.stop_price,
            legs.len()
        );

        Ok(EntryOutcome {
            position,
            legs,
            warnings,
        })
    }

    async fn prepare_futures_account(
        &self,
        gateway: &dyn ExchangeGateway,
        symbol: &str,
        leverage: u32,
    ) {
        let mode = self.config.futures.margin_mode;
        if let Err(e) = gateway.set_margin_mode(symbol, mode).await {
            log::warn!("Fail to set {} margin on {}: {}", mode.as_str(), symbol, e);
        }
        if let Err(e) = gateway.set_leverage(symbol, leverage).await {
            log::warn!("Fail to set leverage {} on {}: {}", leverage, symbol, e);
        }
    }

    /// 显式给出的止损与止盈需与当前价格方向一致
    fn validate_protection(
        &self,
        req: &EntryRequest,
        direction: Direction,
        reference: Decimal,
    ) -> Result<()> {
        if let Some(stop_price) = req.stop_price {
            sizing::validate_stop(direction, stop_price, reference)?;
        }
        for step in &req.ladder {
            sizing::validate_target(direction, step.price, reference)?;
        }
        Ok(())
    }

    async fn place_stop(
        &self,
        gateway: &dyn ExchangeGateway,
        req: &EntryRequest,
        direction: Direction,
        stop_price: Decimal,
        quantity: Decimal,
    ) -> Result<PlacedStop> {
        let order = gateway
            .place_conditional_order(&ConditionalOrderRequest {
                symbol: req.symbol.clone(),
                side: direction.exit_side(),
                kind: ConditionalKind::Stop,
                trigger_price: stop_price,
                quantity,
                reduce_only: req.market == MarketKind::Futures,
            })
            .await?;
        log::info!(
            "Stop {} placed for {} at {}",
            order.order_id,
            req.symbol,
            order.trigger_price
        );
        Ok(PlacedStop {
            order_id: order.order_id,
            price: order.trigger_price,
        })
    }
}

/// 挂一档止盈，返回订单号
pub(crate) async fn place_target(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    direction: Direction,
    leg: &PlannedLeg,
) -> Result<String> {
    let order = gateway
        .place_conditional_order(&ConditionalOrderRequest {
            symbol: symbol.to_string(),
            side: direction.exit_side(),
            kind: ConditionalKind::Target,
            trigger_price: leg.price,
            quantity: leg.quantity,
            reduce_only: true,
        })
        .await?;
    log::info!(
        "Target {} placed for {} at {} qty {}",
        order.order_id,
        symbol,
        leg.price,
        leg.quantity
    );
    Ok(order.order_id)
}

