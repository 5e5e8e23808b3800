use crate::{
    errors::{Result, TradeError},
    execution::pnl,
    models::{
        CloseReason, ExitFill, MarketKind, NewPosition, NewProfitLeg, Position, PositionId,
        ProfitLeg, TradeStatus, UserId,
    },
    store::queries::{self, Executor},
    utils::now_millis,
};
use ::db::{SQLiteDB, SqliteTx};
use rust_decimal::Decimal;

/// 持仓与止盈腿的持久化
///
/// 所有状态迁移都带 `status` 条件，已关闭的持仓或腿再次迁移时返回 `None`，
/// 单腿成交与其盈亏累加在同一事务内提交。
#[derive(Clone)]
pub struct PositionStore {
    db: SQLiteDB,
}

fn load_position<E: Executor>(ex: &E, id: PositionId) -> Result<Position> {
    queries::get_position(ex, id)?
        .ok_or_else(|| TradeError::not_found(format!("position {} not found", id)))
}

impl PositionStore {
    pub fn new(db: SQLiteDB) -> Result<Self> {
        queries::create_tables(&db)?;
        Ok(Self { db })
    }

    pub fn open(db_path: &str) -> Result<Self> {
        Self::new(SQLiteDB::new(db_path)?)
    }

    /// 持仓与其止盈腿一并写入，父记录提交前腿不可见
    pub fn insert_position_with_legs(
        &self,
        new: &NewPosition,
        legs: &[NewProfitLeg],
    ) -> Result<(Position, Vec<ProfitLeg>)> {
        let now = now_millis();
        self.db.transaction(|tx: &SqliteTx<'_>| -> Result<(Position, Vec<ProfitLeg>)> {
            let id = queries::insert_position(tx, new, now)?;
            for leg in legs {
                queries::insert_leg(tx, id, leg, now)?;
            }
            let position = load_position(tx, id)?;
            let legs = queries::get_legs(tx, id)?;
            Ok((position, legs))
        })
    }

    pub fn get_position(&self, id: PositionId) -> Result<Position> {
        load_position(&self.db, id)
    }

    /// 按所有者读取，非本人持仓视为不存在
    pub fn get_user_position(&self, user_id: UserId, id: PositionId) -> Result<Position> {
        let position = self.get_position(id)?;
        if position.user_id != user_id {
            return Err(TradeError::not_found(format!(
                "position {} not found for user {}",
                id, user_id
            )));
        }
        Ok(position)
    }

    pub fn list_open_positions(&self) -> Result<Vec<Position>> {
        queries::query_positions(&self.db, "status = 'POSITION'", &[])
    }

    pub fn list_open_positions_for(
        &self,
        user_id: UserId,
        symbol: &str,
        market: MarketKind,
    ) -> Result<Vec<Position>> {
        queries::query_positions(
            &self.db,
            "status = 'POSITION' AND user_id = ?1 AND symbol = ?2 AND market = ?3",
            &[&user_id, &symbol, &market.as_str()],
        )
    }

    /// 用户全部持仓（含历史），新的在前
    pub fn list_user_positions(&self, user_id: UserId) -> Result<Vec<Position>> {
        queries::query_positions(&self.db, "user_id = ?1", &[&user_id])
    }

    pub fn get_legs(&self, position_id: PositionId) -> Result<Vec<ProfitLeg>> {
        queries::get_legs(&self.db, position_id)
    }

    /// 止盈腿成交：腿置为 CLOSED 并把其盈亏与手续费累加到持仓
    ///
    /// 腿已结束或持仓已关闭时不做任何修改，返回 `None`。
    pub fn apply_leg_fill(
        &self,
        leg_id: i64,
        fill_price: Decimal,
        fee: Decimal,
    ) -> Result<Option<Position>> {
        let now = now_millis() as i64;
        self.db.transaction(|tx: &SqliteTx<'_>| -> Result<Option<Position>> {
            let leg = queries::get_leg(tx, leg_id)?
                .ok_or_else(|| TradeError::not_found(format!("profit leg {} not found", leg_id)))?;
            let position = load_position(tx, leg.position_id)?;
            if !leg.is_live() || !position.is_open() {
                return Ok(None);
            }

            let changed = tx.execute_update(
                "UPDATE profit_legs SET status = 'CLOSED', fee = ?1, fill_price = ?2, updated_at = ?3
                 WHERE id = ?4 AND status NOT IN ('CLOSED', 'CANCELLED');",
                &[&fee.to_string(), &fill_price.to_string(), &now, &leg_id],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            let leg_pnl = pnl::fill_pnl(
                position.direction,
                position.entry_price,
                fill_price,
                leg.quantity,
            );
            let total_pnl = position.pnl + leg_pnl;
            let percentage = pnl::pnl_percentage(
                total_pnl,
                position.entry_price,
                position.tradable_quantity(),
            );
            let total_fee = position.total_fee + fee;
            tx.execute_update(
                "UPDATE positions SET pnl = ?1, pnl_percentage = ?2, total_fee = ?3, updated_at = ?4
                 WHERE id = ?5;",
                &[
                    &total_pnl.to_string(),
                    &percentage.to_string(),
                    &total_fee.to_string(),
                    &now,
                    &position.id,
                ],
            )?;
            load_position(tx, position.id).map(Some)
        })
    }

    /// 关闭持仓：记录平仓成交、累加盈亏，撤销仍存活的止盈腿
    ///
    /// 持仓已不在 POSITION 状态时返回 `None`。
    pub fn close_position(
        &self,
        id: PositionId,
        reason: CloseReason,
        exit: Option<ExitFill>,
    ) -> Result<Option<Position>> {
        let now = now_millis() as i64;
        self.db.transaction(|tx: &SqliteTx<'_>| -> Result<Option<Position>> {
            let position = load_position(tx, id)?;
            if !position.is_open() {
                return Ok(None);
            }

            let mut total_pnl = position.pnl;
            let mut total_fee = position.total_fee;
            let mut stop_fee = position.stop_fee;
            let (exit_price, exit_quantity, exit_fee) = match &exit {
                Some(fill) => {
                    total_pnl += pnl::fill_pnl(
                        position.direction,
                        position.entry_price,
                        fill.price,
                        fill.quantity,
                    );
                    total_fee += fill.fee;
                    if reason == CloseReason::StopFilled {
                        stop_fee += fill.fee;
                    }
                    (
                        Some(fill.price.to_string()),
                        position.exit_quantity + fill.quantity,
                        position.exit_fee + fill.fee,
                    )
                }
                None => (
                    position.exit_price.map(|p| p.to_string()),
                    position.exit_quantity,
                    position.exit_fee,
                ),
            };
            let stop_status = if position.has_live_stop() {
                reason.stop_status()
            } else {
                position.stop_status
            };
            let percentage = pnl::pnl_percentage(
                total_pnl,
                position.entry_price,
                position.tradable_quantity(),
            );

            let changed = tx.execute_update(
                "UPDATE positions SET status = 'CLOSED', exit_price = ?1, exit_quantity = ?2,
                     exit_fee = ?3, stop_status = ?4, stop_fee = ?5, pnl = ?6, pnl_percentage = ?7,
                     total_fee = ?8, updated_at = ?9, closed_at = ?9
                 WHERE id = ?10 AND status = 'POSITION';",
                &[
                    &exit_price,
                    &exit_quantity.to_string(),
                    &exit_fee.to_string(),
                    &stop_status.as_str(),
                    &stop_fee.to_string(),
                    &total_pnl.to_string(),
                    &percentage.to_string(),
                    &total_fee.to_string(),
                    &now,
                    &id,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            tx.execute_update(
                "UPDATE profit_legs SET status = 'CANCELLED', updated_at = ?1
                 WHERE position_id = ?2 AND status NOT IN ('CLOSED', 'CANCELLED');",
                &[&now, &id],
            )?;
            load_position(tx, id).map(Some)
        })
    }

    /// 更新止损引用，仅对未关闭持仓生效
    pub fn update_stop(
        &self,
        id: PositionId,
        stop_order_id: Option<&str>,
        stop_price: Option<Decimal>,
        stop_status: TradeStatus,
    ) -> Result<Option<Position>> {
        let now = now_millis() as i64;
        let stop_price = stop_price.map(|p| p.to_string());
        let changed = self.db.execute_update(
            "UPDATE positions SET stop_order_id = ?1, stop_price = ?2, stop_status = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'POSITION';",
            &[&stop_order_id, &stop_price, &stop_status.as_str(), &now, &id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_position(id).map(Some)
    }

    /// 删除全部未成交的止盈腿（保留 CLOSED 历史）并写入新阶梯
    pub fn replace_live_legs(
        &self,
        id: PositionId,
        legs: &[NewProfitLeg],
    ) -> Result<Vec<ProfitLeg>> {
        let now = now_millis();
        self.db.transaction(|tx: &SqliteTx<'_>| -> Result<Vec<ProfitLeg>> {
            let position = load_position(tx, id)?;
            if !position.is_open() {
                return Err(TradeError::validation(format!(
                    "position {} is {}, targets not replaced",
                    id,
                    position.status.as_str()
                )));
            }
            tx.execute_update(
                "DELETE FROM profit_legs WHERE position_id = ?1 AND status != 'CLOSED';",
                &[&id],
            )?;
            for leg in legs {
                queries::insert_leg(tx, id, leg, now)?;
            }
            queries::get_legs(tx, id)
        })
    }

    /// 用重新计算的值覆盖已实现盈亏
    pub fn overwrite_pnl(
        &self,
        id: PositionId,
        pnl: Decimal,
        pnl_percentage: Decimal,
    ) -> Result<bool> {
        let now = now_millis() as i64;
        let changed = self.db.execute_update(
            "UPDATE positions SET pnl = ?1, pnl_percentage = ?2, updated_at = ?3 WHERE id = ?4;",
            &[&pnl.to_string(), &pnl_percentage.to_string(), &now, &id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_ignore_opposite_signal(
        &self,
        user_id: UserId,
        id: PositionId,
        ignore: bool,
    ) -> Result<Position> {
        self.get_user_position(user_id, id)?;
        let now = now_millis() as i64;
        self.db.execute_update(
            "UPDATE positions SET ignore_opposite_signal = ?1, updated_at = ?2 WHERE id = ?3;",
            &[&ignore, &now, &id],
        )?;
        self.get_position(id)
    }
}
