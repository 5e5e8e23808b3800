use crate::models::{Direction, MarketKind, TradeStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

pub type UserId = i64;
pub type PositionId = i64;

/// SQLite 中布尔以整数存储
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

/// 一次成交入场形成的持仓记录（现货或合约）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    /// 入场市价单的交易所订单号，全局唯一
    pub entry_order_id: String,
    pub symbol: String,
    pub market: MarketKind,
    pub direction: Direction,
    pub status: TradeStatus,
    /// 合约杠杆，现货恒为 1
    pub leverage: u32,

    pub quantity: Decimal,
    /// 现货扣除入场手续费后的净数量，合约与 quantity 相同
    pub net_quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_fee: Decimal,
    pub entry_fee_currency: String,

    /// 最终平仓成交（止损触发、手动平仓或现货外部卖出）
    pub exit_price: Option<Decimal>,
    pub exit_quantity: Decimal,
    pub exit_fee: Decimal,

    pub stop_order_id: Option<String>,
    pub stop_price: Option<Decimal>,
    pub stop_status: TradeStatus,
    pub stop_fee: Decimal,

    pub pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub total_fee: Decimal,

    #[serde(deserialize_with = "deserialize_flag")]
    pub ignore_opposite_signal: bool,

    pub created_at: u64,
    pub updated_at: u64,
    pub closed_at: Option<u64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Position
    }

    /// 可平仓的基础数量：合约为下单数量，现货为净数量
    pub fn tradable_quantity(&self) -> Decimal {
        match self.market {
            MarketKind::Spot => self.net_quantity,
            MarketKind::Futures => self.quantity,
        }
    }

    pub fn has_live_stop(&self) -> bool {
        self.live_stop_order_id().is_some()
    }

    pub fn live_stop_order_id(&self) -> Option<&str> {
        self.stop_order_id
            .as_deref()
            .filter(|_| !self.stop_status.is_terminal())
    }
}

/// 合约分批止盈腿
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfitLeg {
    pub id: i64,
    pub position_id: PositionId,
    pub order_id: String,
    pub price: Decimal,
    /// 仅作展示，盈亏计算以 quantity 为准
    pub percent: Decimal,
    pub quantity: Decimal,
    pub status: TradeStatus,
    pub fee: Decimal,
    pub fill_price: Option<Decimal>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ProfitLeg {
    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// 待写入的新持仓
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub user_id: UserId,
    pub entry_order_id: String,
    pub symbol: String,
    pub market: MarketKind,
    pub direction: Direction,
    pub leverage: u32,
    pub quantity: Decimal,
    pub net_quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_fee: Decimal,
    pub entry_fee_currency: String,
    pub stop_order_id: Option<String>,
    pub stop_price: Option<Decimal>,
    pub stop_status: TradeStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProfitLeg {
    pub order_id: String,
    pub price: Decimal,
    pub percent: Decimal,
    pub quantity: Decimal,
}

/// 平仓成交
#[derive(Debug, Clone, PartialEq)]
pub struct ExitFill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
}

/// 持仓关闭的原因，决定止损腿的最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 止损单成交
    StopFilled,
    /// 主动市价平仓（手动或反手）
    Manual,
    /// 止盈腿累计成交覆盖了全部数量
    TargetsFilled,
    /// 现货在交易所历史中发现的反向成交
    ExternalFill,
}

impl CloseReason {
    pub fn stop_status(&self) -> TradeStatus {
        match self {
            CloseReason::StopFilled => TradeStatus::Closed,
            _ => TradeStatus::Cancelled,
        }
    }
}
