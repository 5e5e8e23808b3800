use crate::{
    errors::Result,
    models::{
        ClosedOrder, ConditionalOrder, ConditionalOrderRequest, Credential, MarginMode,
        MarketFill, MarketKind, MarketLimits, OrderSide, OrderState,
    },
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::{collections::HashMap, sync::Arc};

/// 交易所能力抽象，一个实例绑定一组凭证与一个市场
///
/// 实现方负责为每个调用设置超时；网络、超时与限频类错误返回
/// `TradeError::GatewayError`，交易所明确拒绝返回 `TradeError::GatewayRejected`。
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// 各资产可用余额
    async fn get_balance(&self) -> Result<HashMap<String, Decimal>>;

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal>;

    async fn get_market_limits(&self, symbol: &str) -> Result<MarketLimits>;

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<()>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<MarketFill>;

    /// 止损/止盈触发单
    async fn place_conditional_order(
        &self,
        req: &ConditionalOrderRequest,
    ) -> Result<ConditionalOrder>;

    async fn get_order_status(&self, order_id: &str, symbol: &str) -> Result<OrderState>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()>;

    /// `since` 之后（毫秒时间戳）已结束的订单
    async fn list_recent_closed_orders(&self, symbol: &str, since: u64)
    -> Result<Vec<ClosedOrder>>;
}

/// 为单次操作建立网关会话
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(
        &self,
        market: MarketKind,
        credential: &Credential,
    ) -> Result<Arc<dyn ExchangeGateway>>;
}

/// 尽力撤单，失败仅记录日志
pub async fn cancel_best_effort(gateway: &dyn ExchangeGateway, order_id: &str, symbol: &str) {
    if let Err(e) = gateway.cancel_order(order_id, symbol).await {
        log::warn!("Failed to cancel order {} on {}: {}", order_id, symbol, e);
    }
}
