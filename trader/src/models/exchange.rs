use crate::models::{ConditionalKind, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 交易所 API 凭证
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}

/// 交易对下单限制
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketLimits {
    pub min_quantity: Decimal,
    pub min_notional: Decimal,
    /// 价格小数位数
    pub price_precision: u32,
    /// 数量小数位数
    pub quantity_precision: u32,
}

/// 市价单成交结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketFill {
    pub order_id: String,
    pub avg_price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: ConditionalKind,
    pub trigger_price: Decimal,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalOrder {
    pub order_id: String,
    pub trigger_price: Decimal,
}

/// 订单远端状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderState {
    /// 是否已全部成交
    pub filled: bool,
    pub avg_price: Option<Decimal>,
    pub fee: Decimal,
}

/// 交易所历史中已结束的订单
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub filled: bool,
    pub avg_price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub timestamp: u64,
}
