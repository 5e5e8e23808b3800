use crate::{
    errors::{Result, TradeError},
    execution::pnl,
    gateway::{ExchangeGateway, SessionFactory, cancel_best_effort},
    models::{
        CloseReason, ClosedOrder, ExitFill, MarketKind, Position, PositionId, ProfitLeg, UserId,
    },
    store::PositionStore,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// 一次对账的统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub positions_closed: usize,
    pub legs_closed: usize,
    /// 持仓与腿的状态迁移总数
    pub transitions: usize,
    /// 本轮查询失败、留待下一轮的订单数
    pub errors: usize,
}

/// 把交易所订单状态同步到本地账本
///
/// 单个订单查询失败只计入 `errors`，不影响同一轮中的其它订单。
#[derive(Clone)]
pub struct Reconciler {
    store: PositionStore,
    sessions: SessionFactory,
}

impl Reconciler {
    pub fn new(store: PositionStore, sessions: SessionFactory) -> Self {
        Self { store, sessions }
    }

    /// 对全部未平仓持仓执行一轮对账，按 (用户, 市场) 复用网关会话
    pub async fn reconcile_all(&self) -> Result<ReconcileReport> {
        let positions = self.store.list_open_positions()?;
        let mut groups: BTreeMap<(UserId, MarketKind), Vec<Position>> = BTreeMap::new();
        for position in positions {
            groups
                .entry((position.user_id, position.market))
                .or_default()
                .push(position);
        }

        let mut report = ReconcileReport::default();
        for ((user_id, market), positions) in groups {
            let gateway = match self.sessions.open(user_id, market).await {
                Ok(gateway) => gateway,
                Err(e) => {
                    log::warn!(
                        "Skip reconciliation of {} {} positions for user {}: {}",
                        positions.len(),
                        market.as_str(),
                        user_id,
                        e
                    );
                    report.examined += positions.len();
                    report.errors += positions.len();
                    continue;
                }
            };
            for position in positions {
                self.reconcile_with(gateway.as_ref(), position, &mut report)
                    .await;
            }
        }

        log::debug!("Reconciliation pass finished: {:?}", report);
        Ok(report)
    }

    /// 按需刷新单个持仓
    pub async fn reconcile_position(
        &self,
        user_id: UserId,
        position_id: PositionId,
    ) -> Result<ReconcileReport> {
        let position = self.store.get_user_position(user_id, position_id)?;
        let mut report = ReconcileReport::default();
        if !position.is_open() {
            report.examined = 1;
            return Ok(report);
        }
        let gateway = self.sessions.open(user_id, position.market).await?;
        self.reconcile_with(gateway.as_ref(), position, &mut report)
            .await;
        Ok(report)
    }

    /// 修改保护单前同步远端成交
    ///
    /// 有订单已成交时先记账再返回错误，查询失败时同样拒绝修改。
    pub(crate) async fn settle_before_change(
        &self,
        gateway: &dyn ExchangeGateway,
        position: &Position,
    ) -> Result<()> {
        let mut report = ReconcileReport::default();
        self.reconcile_with(gateway, position.clone(), &mut report)
            .await;
        if report.errors > 0 {
            return Err(TradeError::gateway(format!(
                "orders of position {} could not be verified",
                position.id
            )));
        }
        if report.transitions > 0 {
            log::warn!(
                "Position {} changed on the exchange before modification: {:?}",
                position.id,
                report
            );
            return Err(TradeError::validation(format!(
                "position {} changed on the exchange, {} targets filled, {} closed",
                position.id, report.legs_closed, report.positions_closed
            )));
        }
        Ok(())
    }

    async fn reconcile_with(
        &self,
        gateway: &dyn ExchangeGateway,
        position: Position,
        report: &mut ReconcileReport,
    ) {
        report.examined += 1;
        let id = position.id;
        let result = match position.market {
            MarketKind::Futures => self.reconcile_futures(gateway, position, report).await,
            MarketKind::Spot => self.reconcile_spot(gateway, position, report).await,
        };
        if let Err(e) = result {
            report.errors += 1;
            log::error!("Reconciliation of position {} failed: {}", id, e);
        }
    }

    /// 止损成交即视为终态；返回 true 表示持仓已被关闭
    async fn check_stop(
        &self,
        gateway: &dyn ExchangeGateway,
        position: &Position,
        legs: &[ProfitLeg],
        report: &mut ReconcileReport,
    ) -> Result<bool> {
        let Some(stop_id) = position.live_stop_order_id() else {
            return Ok(false);
        };
        let state = match gateway.get_order_status(stop_id, &position.symbol).await {
            Ok(state) => state,
            Err(e) => {
                report.errors += 1;
                log::warn!("Fail to query stop {} of position {}: {}", stop_id, position.id, e);
                return Ok(false);
            }
        };
        if !state.filled {
            return Ok(false);
        }

        let Some(price) = state.avg_price.or(position.stop_price) else {
            report.errors += 1;
            log::warn!(
                "Stop {} of position {} filled without a price, retry next pass",
                stop_id,
                position.id
            );
            return Ok(true);
        };
        let exit = ExitFill {
            price,
            quantity: pnl::open_quantity(position, legs),
            fee: state.fee,
        };
        if let Some(closed) = self
            .store
            .close_position(position.id, CloseReason::StopFilled, Some(exit))?
        {
            let cancelled = legs.iter().filter(|leg| leg.is_live()).count();
            for leg in legs.iter().filter(|leg| leg.is_live()) {
                cancel_best_effort(gateway, &leg.order_id, &position.symbol).await;
            }
            report.positions_closed += 1;
            report.transitions += 1 + cancelled;
            log::info!(
                "Position {} stopped out at {}, pnl {} ({}%)",
                closed.id,
                price,
                closed.pnl,
                closed.pnl_percentage
            );
        }
        Ok(true)
    }

    async fn reconcile_futures(
        &self,
        gateway: &dyn ExchangeGateway,
        position: Position,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let legs = self.store.get_legs(position.id)?;
        if self.check_stop(gateway, &position, &legs, report).await? {
            return Ok(());
        }

        for leg in legs.iter().filter(|leg| leg.is_live()) {
            let state = match gateway.get_order_status(&leg.order_id, &position.symbol).await {
                Ok(state) => state,
                Err(e) => {
                    report.errors += 1;
                    log::warn!(
                        "Fail to query target {} of position {}: {}",
                        leg.order_id,
                        position.id,
                        e
                    );
                    continue;
                }
            };
            if !state.filled {
                continue;
            }
            let fill_price = state.avg_price.unwrap_or(leg.price);
            if let Some(updated) = self.store.apply_leg_fill(leg.id, fill_price, state.fee)? {
                report.legs_closed += 1;
                report.transitions += 1;
                log::info!(
                    "Target {} of position {} filled at {} qty {}, pnl now {}",
                    leg.order_id,
                    position.id,
                    fill_price,
                    leg.quantity,
                    updated.pnl
                );
            }
        }

        let position = self.store.get_position(position.id)?;
        let legs = self.store.get_legs(position.id)?;
        if position.is_open() && pnl::closed_leg_quantity(&legs) >= position.tradable_quantity() {
            if let Some(stop_id) = position.live_stop_order_id() {
                cancel_best_effort(gateway, stop_id, &position.symbol).await;
            }
            if let Some(closed) =
                self.store
                    .close_position(position.id, CloseReason::TargetsFilled, None)?
            {
                report.positions_closed += 1;
                report.transitions += 1;
                log::info!(
                    "Position {} fully taken profit, pnl {} ({}%)",
                    closed.id,
                    closed.pnl,
                    closed.pnl_percentage
                );
            }
        }

        self.check_consistency(position.id)
    }

    /// 以已成交腿与平仓成交重新计算盈亏，不一致时覆盖
    fn check_consistency(&self, position_id: PositionId) -> Result<()> {
        let position = self.store.get_position(position_id)?;
        let legs = self.store.get_legs(position_id)?;
        let (pnl, percentage) = pnl::recompute(&position, &legs);
        if pnl != position.pnl || percentage != position.pnl_percentage {
            log::warn!(
                "Position {} pnl drifted: stored {} ({}%), recomputed {} ({}%)",
                position.id,
                position.pnl,
                position.pnl_percentage,
                pnl,
                percentage
            );
            self.store.overwrite_pnl(position.id, pnl, percentage)?;
        }
        Ok(())
    }

    async fn reconcile_spot(
        &self,
        gateway: &dyn ExchangeGateway,
        position: Position,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        if position.has_live_stop() {
            self.check_stop(gateway, &position, &[], report).await?;
            return self.check_consistency(position.id);
        }

        // 无止损单时在成交历史中寻找建仓后的第一笔反向成交
        let orders = match gateway
            .list_recent_closed_orders(&position.symbol, position.created_at)
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                report.errors += 1;
                log::warn!(
                    "Fail to list closed orders of {} for position {}: {}",
                    position.symbol,
                    position.id,
                    e
                );
                return Ok(());
            }
        };
        let exit_side = position.direction.exit_side();
        let mut matches: Vec<&ClosedOrder> = orders
            .iter()
            .filter(|order| {
                order.filled
                    && order.side == exit_side
                    && order.timestamp >= position.created_at
                    && order.order_id != position.entry_order_id
            })
            .collect();
        matches.sort_by_key(|order| order.timestamp);
        let Some(order) = matches.first() else {
            return Ok(());
        };

        let quantity = order
            .quantity
            .min(pnl::open_quantity(&position, &[]))
            .max(Decimal::ZERO);
        let exit = ExitFill {
            price: order.avg_price,
            quantity,
            fee: order.fee,
        };
        if let Some(closed) =
            self.store
                .close_position(position.id, CloseReason::ExternalFill, Some(exit))?
        {
            report.positions_closed += 1;
            report.transitions += 1;
            log::info!(
                "Spot position {} closed by order {} at {}, pnl {} ({}%)",
                closed.id,
                order.order_id,
                order.avg_price,
                closed.pnl,
                closed.pnl_percentage
            );
        }
        self.check_consistency(position.id)
    }
}
