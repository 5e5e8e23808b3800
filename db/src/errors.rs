#[derive(Debug, thiserror::Error)]
pub enum DBError {
    #[error("Database connection error: {message}")]
    ConnectionError { message: String },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("SQLite error: {0}")]
    SQLiteError(rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Lock error: {message}")]
    LockError { message: String },
}

impl From<rusqlite::Error> for DBError {
    fn from(e: rusqlite::Error) -> Self {
        // 唯一约束冲突单独区分，上层据此识别重复写入
        if let rusqlite::Error::SqliteFailure(err, msg) = &e {
            if err.code == rusqlite::ErrorCode::ConstraintViolation {
                return DBError::ConstraintViolation {
                    message: msg.clone().unwrap_or_else(|| err.to_string()),
                };
            }
        }
        DBError::SQLiteError(e)
    }
}

pub type Result<T> = std::result::Result<T, DBError>;
