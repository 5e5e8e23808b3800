use crate::orchestrator::{TaskDispatcher, WorkItem};
use std::{sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// 周期性投递全量对账任务
pub struct ReconcileScheduler {
    dispatcher: Arc<TaskDispatcher>,
    interval: Duration,
    shutdown_token: CancellationToken,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl ReconcileScheduler {
    pub fn new(dispatcher: Arc<TaskDispatcher>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
            shutdown_token: CancellationToken::new(),
            task: RwLock::new(None),
        }
    }

    pub async fn start(&self) {
        let dispatcher = self.dispatcher.clone();
        let interval = self.interval;
        let shutdown_token = self.shutdown_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.submit(WorkItem::ReconcileAll).await {
                            log::error!("Fail to schedule reconciliation: {}", e);
                            break;
                        }
                    }
                }
            }
        });
        *self.task.write().await = Some(handle);
        log::info!("Reconciliation scheduled every {:?}", self.interval);
    }

    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        if let Some(task) = self.task.write().await.take() {
            task.abort();
        }
    }
}
