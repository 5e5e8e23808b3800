use crate::{
    errors::{Result, TradeError},
    models::{PositionId, Signal, UserId},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, RwLock, Semaphore, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// 工作项消息，`task` 字段区分类型
///
/// 未知的任务名反序列化为 `Unsupported`，处理结果明确标记为不支持。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum WorkItem {
    Signal { user_id: UserId, signal: Signal },
    ReconcilePosition { user_id: UserId, position_id: PositionId },
    ReconcileAll,
    #[serde(other)]
    Unsupported,
}

impl WorkItem {
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| TradeError::validation(format!("Invalid work item: {}", e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkItem::Signal { .. } => "signal",
            WorkItem::ReconcilePosition { .. } => "reconcile_position",
            WorkItem::ReconcileAll => "reconcile_all",
            WorkItem::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(String),
    Failed(String),
    Unsupported,
}

#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(&self, item: WorkItem) -> TaskOutcome;
}

/// 有界队列 + 并发上限的工作池
pub struct TaskDispatcher {
    handler: Arc<dyn WorkHandler>,
    sender: mpsc::Sender<WorkItem>,
    receiver: Mutex<Option<mpsc::Receiver<WorkItem>>>,
    worker_count: usize,
    outcome_tx: Option<mpsc::UnboundedSender<(String, TaskOutcome)>>,
    shutdown_token: CancellationToken,
    tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl TaskDispatcher {
    pub fn new(handler: Arc<dyn WorkHandler>, worker_count: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            handler,
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker_count: worker_count.max(1),
            outcome_tx: None,
            shutdown_token: CancellationToken::new(),
            tasks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 每个工作项完成后把 (任务名, 结果) 发往该通道
    pub fn with_outcome_sink(mut self, sink: mpsc::UnboundedSender<(String, TaskOutcome)>) -> Self {
        self.outcome_tx = Some(sink);
        self
    }

    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.receiver.lock().await.take().ok_or_else(|| {
            TradeError::validation("task dispatcher already started")
        })?;
        let handler = self.handler.clone();
        let permits = Arc::new(Semaphore::new(self.worker_count));
        let outcome_tx = self.outcome_tx.clone();
        let shutdown_token = self.shutdown_token.clone();
        let tasks = self.tasks.clone();

        let handle = tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    item = receiver.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let handler = handler.clone();
                let outcome_tx = outcome_tx.clone();
                let worker = tokio::spawn(async move {
                    let name = item.name();
                    let outcome = handler.handle(item).await;
                    match &outcome {
                        TaskOutcome::Completed(detail) => log::debug!("Task {} done: {}", name, detail),
                        TaskOutcome::Failed(reason) => log::error!("Task {} failed: {}", name, reason),
                        TaskOutcome::Unsupported => log::warn!("Task {} ignored as unsupported", name),
                    }
                    if let Some(tx) = outcome_tx {
                        let _ = tx.send((name.to_string(), outcome));
                    }
                    drop(permit);
                });
                let mut tasks = tasks.write().await;
                tasks.retain(|task| !task.is_finished());
                tasks.push(worker);
            }
            log::info!("Task dispatcher stopped");
        });
        self.tasks.write().await.push(handle);
        log::info!("Task dispatcher started with {} workers", self.worker_count);
        Ok(())
    }

    pub async fn submit(&self, item: WorkItem) -> Result<()> {
        self.sender.send(item).await.map_err(|e| {
            TradeError::validation(format!("task queue closed, {} dropped", e.0.name()))
        })
    }

    pub async fn submit_json(&self, payload: &str) -> Result<()> {
        self.submit(WorkItem::from_json(payload)?).await
    }

    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let mut tasks = self.tasks.write().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}
