use crate::{
    errors::{Result, TradeError},
    models::{Direction, LadderStep, MarketLimits},
};
use rust_decimal::{Decimal, RoundingStrategy};

/// 数量按精度向零截断，避免超出可用余额
pub fn round_quantity(quantity: Decimal, precision: u32) -> Decimal {
    quantity.round_dp_with_strategy(precision, RoundingStrategy::ToZero)
}

pub fn round_price(price: Decimal, precision: u32) -> Decimal {
    price.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

/// 检查数量与名义价值是否满足交易所最小下单限制
pub fn check_minimums(quantity: Decimal, price: Decimal, limits: &MarketLimits) -> Result<()> {
    if quantity <= Decimal::ZERO || quantity < limits.min_quantity {
        return Err(TradeError::validation(format!(
            "Quantity {} below minimum {}",
            quantity, limits.min_quantity
        )));
    }
    let notional = quantity * price;
    if notional < limits.min_notional {
        return Err(TradeError::validation(format!(
            "Notional {} below minimum {}",
            notional, limits.min_notional
        )));
    }
    Ok(())
}

/// 可用名义价值 = 可用余额 × 仓位比例 × 杠杆，再按最新价折算为下单数量
pub fn order_quantity(
    free_balance: Decimal,
    allocation_percent: Decimal,
    leverage: u32,
    last_price: Decimal,
    limits: &MarketLimits,
) -> Result<Decimal> {
    if last_price <= Decimal::ZERO {
        return Err(TradeError::validation(format!(
            "Invalid last price {}",
            last_price
        )));
    }
    if allocation_percent <= Decimal::ZERO || allocation_percent > Decimal::ONE_HUNDRED {
        return Err(TradeError::validation(format!(
            "Allocation percent {} out of range (0, 100]",
            allocation_percent
        )));
    }

    let notional =
        free_balance * allocation_percent / Decimal::ONE_HUNDRED * Decimal::from(leverage.max(1));
    let quantity = round_quantity(notional / last_price, limits.quantity_precision);
    check_minimums(quantity, last_price, limits)?;
    Ok(quantity)
}

/// 默认止损：做多低于成交均价 `percent`%，做空高于
pub fn default_stop_price(
    direction: Direction,
    fill_price: Decimal,
    percent: Decimal,
    price_precision: u32,
) -> Decimal {
    let offset = fill_price * percent / Decimal::ONE_HUNDRED;
    let price = match direction {
        Direction::Long => fill_price - offset,
        Direction::Short => fill_price + offset,
    };
    round_price(price, price_precision)
}

pub fn validate_stop(direction: Direction, stop_price: Decimal, reference: Decimal) -> Result<()> {
    let valid = stop_price > Decimal::ZERO
        && match direction {
            Direction::Long => stop_price < reference,
            Direction::Short => stop_price > reference,
        };
    if !valid {
        return Err(TradeError::validation(format!(
            "{} stop {} invalid against current price {}",
            direction.as_str(),
            stop_price,
            reference
        )));
    }
    Ok(())
}

pub fn validate_target(
    direction: Direction,
    target_price: Decimal,
    reference: Decimal,
) -> Result<()> {
    let valid = target_price > Decimal::ZERO
        && match direction {
            Direction::Long => target_price > reference,
            Direction::Short => target_price < reference,
        };
    if !valid {
        return Err(TradeError::validation(format!(
            "{} target {} invalid against current price {}",
            direction.as_str(),
            target_price,
            reference
        )));
    }
    Ok(())
}

/// 阶梯形状校验，不依赖价格，必须在任何远程调用之前执行
pub fn validate_ladder(ladder: &[LadderStep]) -> Result<()> {
    if ladder.is_empty() {
        return Ok(());
    }
    let mut total = Decimal::ZERO;
    for step in ladder {
        if step.price <= Decimal::ZERO {
            return Err(TradeError::validation(format!(
                "Ladder price {} must be positive",
                step.price
            )));
        }
        if step.percent <= Decimal::ZERO {
            return Err(TradeError::validation(format!(
                "Ladder percent {} must be positive",
                step.percent
            )));
        }
        total += step.percent;
    }
    if total > Decimal::ONE_HUNDRED {
        return Err(TradeError::validation(format!(
            "Ladder percents sum to {}, must be within (0, 100]",
            total
        )));
    }
    Ok(())
}

/// 计划下单的一档止盈
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLeg {
    pub price: Decimal,
    pub percent: Decimal,
    pub quantity: Decimal,
}

/// 按基础数量拆分阶梯
///
/// 合计恰为 100% 时最后一档取剩余数量，保证全部成交后覆盖整个仓位，
/// 其 `percent` 记为剩余比例（包含被跳过档位的份额）；
/// 低于最小下单限制的档位被跳过。
pub fn plan_ladder(
    ladder: &[LadderStep],
    base_quantity: Decimal,
    limits: &MarketLimits,
) -> Vec<PlannedLeg> {
    let total: Decimal = ladder.iter().map(|step| step.percent).sum();
    let mut planned = Vec::with_capacity(ladder.len());
    let mut allocated = Decimal::ZERO;
    let mut allocated_percent = Decimal::ZERO;

    for (index, step) in ladder.iter().enumerate() {
        let price = round_price(step.price, limits.price_precision);
        let takes_remainder = index + 1 == ladder.len() && total == Decimal::ONE_HUNDRED;
        let (quantity, percent) = if takes_remainder {
            (
                round_quantity(base_quantity - allocated, limits.quantity_precision),
                Decimal::ONE_HUNDRED - allocated_percent,
            )
        } else {
            (
                round_quantity(
                    base_quantity * step.percent / Decimal::ONE_HUNDRED,
                    limits.quantity_precision,
                ),
                step.percent,
            )
        };

        if let Err(e) = check_minimums(quantity, price, limits) {
            log::warn!("Skip ladder step at {}: {}", price, e);
            continue;
        }

        allocated += quantity;
        allocated_percent += percent;
        planned.push(PlannedLeg {
            price,
            percent,
            quantity,
        });
    }
    planned
}
