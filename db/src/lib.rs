pub mod common;
pub mod errors;
pub mod sqlite;

pub use common::{QueryResult, Row, Value};
pub use errors::{DBError, Result};
pub use sqlite::{SQLiteDB, SqliteTx};
