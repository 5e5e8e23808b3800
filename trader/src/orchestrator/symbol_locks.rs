use crate::models::UserId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 每个 (用户, 交易对) 一把互斥锁，开仓与平仓决策在锁内串行
#[derive(Clone, Default)]
pub struct SymbolLocks {
    locks: Arc<DashMap<(UserId, String), Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: UserId, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry((user_id, symbol.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
