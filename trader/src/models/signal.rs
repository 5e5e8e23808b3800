use crate::{
    errors::{Result, TradeError},
    models::{Direction, MarketKind, OrderSide},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 止盈阶梯中的一档
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LadderStep {
    pub price: Decimal,
    /// 占基础数量的百分比
    pub percent: Decimal,
}

/// 外部方向信号，不落库
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub symbol: String,
    pub side: OrderSide,
    pub market: MarketKind,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub target_price: Option<Decimal>,
    #[serde(default)]
    pub target_ladder: Option<Vec<LadderStep>>,
}

impl Signal {
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| {
            TradeError::validation(format!("Invalid signal payload: {}", e))
        })
    }

    pub fn direction(&self) -> Direction {
        Direction::from_side(self.side)
    }

    /// 单一目标价视为一档 100% 的阶梯，阶梯优先
    pub fn ladder(&self) -> Vec<LadderStep> {
        match (&self.target_ladder, self.target_price) {
            (Some(ladder), _) if !ladder.is_empty() => ladder.clone(),
            (_, Some(price)) => vec![LadderStep {
                price,
                percent: Decimal::ONE_HUNDRED,
            }],
            _ => Vec::new(),
        }
    }
}
