use crate::{
    errors::{Result, TradeError},
    models::{NewPosition, NewProfitLeg, Position, PositionId, ProfitLeg},
};
use db::{DBError, QueryResult, SQLiteDB, SqliteTx};
use rusqlite::ToSql;

/// 连接与事务共用的执行接口
pub trait Executor {
    fn query(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<QueryResult>;
    fn update(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<usize>;
    fn insert_row(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<i64>;
}

impl Executor for SQLiteDB {
    fn query(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<QueryResult> {
        self.execute_query(sql, params)
    }

    fn update(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<usize> {
        self.execute_update(sql, params)
    }

    fn insert_row(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<i64> {
        self.insert(sql, params)
    }
}

impl Executor for SqliteTx<'_> {
    fn query(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<QueryResult> {
        self.execute_query(sql, params)
    }

    fn update(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<usize> {
        self.execute_update(sql, params)
    }

    fn insert_row(&self, sql: &str, params: &[&dyn ToSql]) -> db::Result<i64> {
        self.insert(sql, params)
    }
}

pub fn create_tables(db: &SQLiteDB) -> Result<()> {
    let sql = r#"
    CREATE TABLE IF NOT EXISTS positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        entry_order_id TEXT NOT NULL UNIQUE,
        symbol TEXT NOT NULL,
        market TEXT NOT NULL,
        direction TEXT NOT NULL,
        status TEXT NOT NULL,
        leverage INTEGER NOT NULL DEFAULT 1,
        quantity TEXT NOT NULL,
        net_quantity TEXT NOT NULL,
        entry_price TEXT NOT NULL,
        entry_fee TEXT NOT NULL DEFAULT '0',
        entry_fee_currency TEXT NOT NULL DEFAULT 'USDT',
        exit_price TEXT,
        exit_quantity TEXT NOT NULL DEFAULT '0',
        exit_fee TEXT NOT NULL DEFAULT '0',
        stop_order_id TEXT,
        stop_price TEXT,
        stop_status TEXT NOT NULL,
        stop_fee TEXT NOT NULL DEFAULT '0',
        pnl TEXT NOT NULL DEFAULT '0',
        pnl_percentage TEXT NOT NULL DEFAULT '0',
        total_fee TEXT NOT NULL DEFAULT '0',
        ignore_opposite_signal INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        closed_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_positions_user_status ON positions (user_id, status);
    CREATE INDEX IF NOT EXISTS idx_positions_symbol_created ON positions (symbol, created_at);

    CREATE TABLE IF NOT EXISTS profit_legs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        position_id INTEGER NOT NULL REFERENCES positions (id),
        order_id TEXT NOT NULL,
        price TEXT NOT NULL,
        percent TEXT NOT NULL,
        quantity TEXT NOT NULL,
        status TEXT NOT NULL,
        fee TEXT NOT NULL DEFAULT '0',
        fill_price TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_profit_legs_position_status ON profit_legs (position_id, status);
    "#;
    db.execute_batch(sql)
        .map_err(|e| TradeError::StoreError {
            message: format!("Fail to create position tables: {}", e),
        })
}

pub fn insert_position<E: Executor>(ex: &E, new: &NewPosition, now: u64) -> Result<PositionId> {
    let sql = r#"
    INSERT INTO positions (
        user_id, entry_order_id, symbol, market, direction, status, leverage,
        quantity, net_quantity, entry_price, entry_fee, entry_fee_currency,
        stop_order_id, stop_price, stop_status, total_fee, created_at, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, 'POSITION', ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?10, ?15, ?15);
    "#;
    let stop_price = new.stop_price.map(|p| p.to_string());
    let now = now as i64;
    let result = ex.insert_row(
        sql,
        &[
            &new.user_id,
            &new.entry_order_id,
            &new.symbol,
            &new.market.as_str(),
            &new.direction.as_str(),
            &new.leverage,
            &new.quantity.to_string(),
            &new.net_quantity.to_string(),
            &new.entry_price.to_string(),
            &new.entry_fee.to_string(),
            &new.entry_fee_currency,
            &new.stop_order_id,
            &stop_price,
            &new.stop_status.as_str(),
            &now,
        ],
    );
    match result {
        Ok(id) => Ok(id),
        Err(DBError::ConstraintViolation { message }) => Err(TradeError::validation(format!(
            "entry order {} already recorded: {}",
            new.entry_order_id, message
        ))),
        Err(e) => Err(e.into()),
    }
}

pub fn insert_leg<E: Executor>(
    ex: &E,
    position_id: PositionId,
    leg: &NewProfitLeg,
    now: u64,
) -> Result<i64> {
    let sql = r#"
    INSERT INTO profit_legs (
        position_id, order_id, price, percent, quantity, status, created_at, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, 'POSITION', ?6, ?6);
    "#;
    let now = now as i64;
    let id = ex.insert_row(
        sql,
        &[
            &position_id,
            &leg.order_id,
            &leg.price.to_string(),
            &leg.percent.to_string(),
            &leg.quantity.to_string(),
            &now,
        ],
    )?;
    Ok(id)
}

pub fn query_positions<E: Executor>(
    ex: &E,
    where_clause: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<Position>> {
    let sql = format!(
        "SELECT * FROM positions WHERE {} ORDER BY created_at DESC, id DESC;",
        where_clause
    );
    let result = ex.query(&sql, params)?;
    result
        .into_struct::<Position>()
        .map_err(|e| TradeError::StoreError {
            message: format!("Fail to into positions: {}", e),
        })
}

pub fn get_position<E: Executor>(ex: &E, id: PositionId) -> Result<Option<Position>> {
    Ok(query_positions(ex, "id = ?1", &[&id])?.into_iter().next())
}

pub fn get_legs<E: Executor>(ex: &E, position_id: PositionId) -> Result<Vec<ProfitLeg>> {
    let result = ex.query(
        "SELECT * FROM profit_legs WHERE position_id = ?1 ORDER BY id;",
        &[&position_id],
    )?;
    result
        .into_struct::<ProfitLeg>()
        .map_err(|e| TradeError::StoreError {
            message: format!("Fail to into profit legs: {}", e),
        })
}

pub fn get_leg<E: Executor>(ex: &E, leg_id: i64) -> Result<Option<ProfitLeg>> {
    let result = ex.query("SELECT * FROM profit_legs WHERE id = ?1;", &[&leg_id])?;
    let legs = result
        .into_struct::<ProfitLeg>()
        .map_err(|e| TradeError::StoreError {
            message: format!("Fail to into profit leg: {}", e),
        })?;
    Ok(legs.into_iter().next())
}
