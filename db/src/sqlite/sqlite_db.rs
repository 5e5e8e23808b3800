use crate::common::{QueryResult, Row, Value};
use crate::errors::{DBError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ToSql};
use std::sync::{Arc, Mutex, MutexGuard};

fn run_query(conn: &Connection, query: &str, params: &[&dyn ToSql]) -> Result<QueryResult> {
    let mut stmt = conn.prepare(query)?;

    let column_count = stmt.column_count();
    let mut columns = Vec::with_capacity(column_count);
    for i in 0..column_count {
        columns.push(stmt.column_name(i)?.to_string());
    }

    let mut result = QueryResult::with_columns(columns.clone());
    let rows = stmt.query_map(params, |row| {
        let mut result_row = Row::new();
        for (i, column_name) in columns.iter().enumerate() {
            let value = match row.get_ref(i)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => Value::Integer(i),
                ValueRef::Real(f) => Value::Real(f),
                ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_string()),
                ValueRef::Blob(b) => Value::Blob(b.to_vec()),
            };
            result_row.insert(column_name.clone(), value);
        }
        Ok(result_row)
    })?;

    for row in rows {
        result.add_row(row?);
    }
    Ok(result)
}

/// 共享的 SQLite 连接，克隆后指向同一连接
#[derive(Clone)]
pub struct SQLiteDB {
    connection: Arc<Mutex<Connection>>,
}

impl SQLiteDB {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(|e| DBError::ConnectionError {
            message: format!("Failed to open {}: {}", db_path, e),
        })?;

        let _ = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()));
        let _ = conn.execute("PRAGMA synchronous = NORMAL", []);
        let _ = conn.execute("PRAGMA foreign_keys = ON", []);
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        log::debug!("sqlite opened at {}", db_path);
        Ok(SQLiteDB {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection.lock().map_err(|e| DBError::LockError {
            message: format!("Failed to acquire lock: {}", e),
        })
    }

    pub fn execute_query(&self, query: &str, params: &[&dyn ToSql]) -> Result<QueryResult> {
        let conn = self.lock()?;
        run_query(&conn, query, params)
    }

    pub fn execute_update(&self, query: &str, params: &[&dyn ToSql]) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(query, params)?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.lock()?;
        Ok(conn.execute_batch(sql)?)
    }

    pub fn insert(&self, query: &str, params: &[&dyn ToSql]) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(query, params)?;
        Ok(conn.last_insert_rowid())
    }

    /// 在单个事务内执行 `operation`
    ///
    /// 整个闭包期间持有连接锁，其它调用方看不到中间状态；
    /// 闭包返回错误时事务回滚。
    pub fn transaction<F, T, E>(&self, operation: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&SqliteTx<'_>) -> std::result::Result<T, E>,
        E: From<DBError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(DBError::from)?;
        let result = operation(&SqliteTx { conn: &tx })?;
        tx.commit().map_err(DBError::from)?;
        Ok(result)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let result = self.execute_query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
            &[&table_name],
        )?;
        Ok(!result.is_empty())
    }
}

/// 事务内的操作句柄
pub struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl SqliteTx<'_> {
    pub fn execute_query(&self, query: &str, params: &[&dyn ToSql]) -> Result<QueryResult> {
        run_query(self.conn, query, params)
    }

    pub fn execute_update(&self, query: &str, params: &[&dyn ToSql]) -> Result<usize> {
        Ok(self.conn.execute(query, params)?)
    }

    pub fn insert(&self, query: &str, params: &[&dyn ToSql]) -> Result<i64> {
        self.conn.execute(query, params)?;
        Ok(self.conn.last_insert_rowid())
    }
}
