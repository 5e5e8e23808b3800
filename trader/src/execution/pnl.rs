use crate::models::{Direction, Position, ProfitLeg};
use rust_decimal::Decimal;

/// 单笔平仓成交的盈亏
pub fn fill_pnl(direction: Direction, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    match direction {
        Direction::Long => (exit - entry) * quantity,
        Direction::Short => (entry - exit) * quantity,
    }
}

/// 相对入场名义价值的盈亏百分比，保留两位小数
pub fn pnl_percentage(pnl: Decimal, entry: Decimal, quantity: Decimal) -> Decimal {
    let notional = entry * quantity;
    if notional.is_zero() {
        return Decimal::ZERO;
    }
    (pnl / notional * Decimal::ONE_HUNDRED).round_dp(2)
}

pub fn closed_leg_quantity(legs: &[ProfitLeg]) -> Decimal {
    legs.iter()
        .filter(|leg| leg.is_closed())
        .map(|leg| leg.quantity)
        .sum()
}

/// 尚未被止盈腿或最终平仓覆盖的数量
pub fn open_quantity(position: &Position, legs: &[ProfitLeg]) -> Decimal {
    (position.tradable_quantity() - closed_leg_quantity(legs) - position.exit_quantity)
        .max(Decimal::ZERO)
}

/// 仅由已成交的止盈腿与最终平仓成交推导出的已实现盈亏
pub fn realized_pnl(position: &Position, legs: &[ProfitLeg]) -> Decimal {
    let legs_pnl: Decimal = legs
        .iter()
        .filter(|leg| leg.is_closed())
        .filter_map(|leg| {
            leg.fill_price.map(|fill| {
                fill_pnl(position.direction, position.entry_price, fill, leg.quantity)
            })
        })
        .sum();
    let exit_pnl = position
        .exit_price
        .map(|exit| {
            fill_pnl(
                position.direction,
                position.entry_price,
                exit,
                position.exit_quantity,
            )
        })
        .unwrap_or(Decimal::ZERO);
    legs_pnl + exit_pnl
}

/// (pnl, pnl_percentage)
pub fn recompute(position: &Position, legs: &[ProfitLeg]) -> (Decimal, Decimal) {
    let pnl = realized_pnl(position, legs);
    let percentage = pnl_percentage(pnl, position.entry_price, position.tradable_quantity());
    (pnl, percentage)
}
