use crate::{
    config::{Config, EngineConfig},
    errors::{Result, TradeError},
    execution::{
        CloseOutcome, EntryEngine, PositionCloser, ReconcileReport, Reconciler, RiskModifier,
        retry::retry_with_backoff,
    },
    gateway::{CredentialProvider, GatewayConnector, SessionFactory},
    models::{LadderStep, Position, PositionId, ProfitLeg, Signal, UserId},
    orchestrator::{
        ReconcileScheduler, SignalOrchestrator, SignalOutcome, SymbolLocks, TaskDispatcher,
        TaskOutcome, WorkHandler, WorkItem,
    },
    logger,
    store::PositionStore,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::{path::Path, sync::Arc, time::Duration};

/// 工作项到编排器与对账器的路由
pub struct EngineWorkHandler {
    orchestrator: SignalOrchestrator,
    reconciler: Reconciler,
}

#[async_trait]
impl WorkHandler for EngineWorkHandler {
    async fn handle(&self, item: WorkItem) -> TaskOutcome {
        match item {
            WorkItem::Signal { user_id, signal } => {
                match self.orchestrator.handle_signal(user_id, &signal).await {
                    Ok(outcome) => TaskOutcome::Completed(outcome.describe()),
                    Err(e) => TaskOutcome::Failed(format!(
                        "{} signal on {} for user {}: {}",
                        signal.side.as_str(),
                        signal.symbol,
                        user_id,
                        e
                    )),
                }
            }
            WorkItem::ReconcilePosition {
                user_id,
                position_id,
            } => match self
                .reconciler
                .reconcile_position(user_id, position_id)
                .await
            {
                Ok(report) => TaskOutcome::Completed(format!("{:?}", report)),
                Err(e) => TaskOutcome::Failed(format!("refresh position {}: {}", position_id, e)),
            },
            WorkItem::ReconcileAll => match self.reconciler.reconcile_all().await {
                Ok(report) => TaskOutcome::Completed(format!("{:?}", report)),
                Err(e) => TaskOutcome::Failed(format!("reconciliation pass: {}", e)),
            },
            WorkItem::Unsupported => TaskOutcome::Unsupported,
        }
    }
}

/// 引擎入口：信号、手动操作、对账与后台任务
pub struct TradingEngine {
    config: Arc<EngineConfig>,
    store: PositionStore,
    credentials: Arc<dyn CredentialProvider>,
    locks: SymbolLocks,
    orchestrator: SignalOrchestrator,
    risk: RiskModifier,
    closer: PositionCloser,
    reconciler: Reconciler,
    dispatcher: Arc<TaskDispatcher>,
    scheduler: ReconcileScheduler,
}

impl TradingEngine {
    /// 读取配置文件（按扩展名识别 JSON/YAML/TOML）、初始化日志并打开数据库
    pub fn from_config_file(
        path: &str,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn GatewayConnector>,
    ) -> Result<Self> {
        let config = match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Config::from_yaml(path),
            Some("toml") => Config::from_toml(path),
            _ => Config::from_json(path),
        }
        .map_err(|e| TradeError::ConfigError {
            message: e.to_string(),
        })?;
        let engine_config = EngineConfig::from_config(config)?;
        if let Err(e) = logger::init(engine_config.log_file.as_deref(), &engine_config.log_level) {
            log::warn!("Logger not initialised: {}", e);
        }
        Self::new(engine_config, credentials, connector)
    }

    /// 按配置打开数据库
    pub fn new(
        config: EngineConfig,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn GatewayConnector>,
    ) -> Result<Self> {
        let store = PositionStore::open(&config.db_path)?;
        Ok(Self::with_store(config, store, credentials, connector))
    }

    pub fn with_store(
        config: EngineConfig,
        store: PositionStore,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn GatewayConnector>,
    ) -> Self {
        let config = Arc::new(config);
        let sessions = SessionFactory::new(credentials.clone(), connector);
        let locks = SymbolLocks::new();
        let entry = EntryEngine::new(config.clone(), store.clone(), sessions.clone());
        let closer = PositionCloser::new(store.clone(), sessions.clone());
        let risk = RiskModifier::new(store.clone(), sessions.clone());
        let reconciler = Reconciler::new(store.clone(), sessions);
        let orchestrator = SignalOrchestrator::new(
            config.clone(),
            store.clone(),
            locks.clone(),
            entry,
            closer.clone(),
        );

        let handler = Arc::new(EngineWorkHandler {
            orchestrator: orchestrator.clone(),
            reconciler: reconciler.clone(),
        });
        let dispatcher = Arc::new(TaskDispatcher::new(
            handler,
            config.worker_count,
            config.task_queue_capacity,
        ));
        let scheduler = ReconcileScheduler::new(
            dispatcher.clone(),
            Duration::from_secs(config.reconcile_interval_secs.max(1)),
        );

        Self {
            config,
            store,
            credentials,
            locks,
            orchestrator,
            risk,
            closer,
            reconciler,
            dispatcher,
            scheduler,
        }
    }

    /// 启动工作池与周期对账
    pub async fn start(&self) -> Result<()> {
        self.dispatcher.start().await?;
        self.scheduler.start().await;
        Ok(())
    }

    /// 信号分发给每个拥有启用凭证的用户，返回投递的工作项数
    pub async fn submit_signal(&self, signal: Signal) -> Result<usize> {
        let users = self.credentials.list_active_users().await?;
        for user_id in &users {
            self.dispatcher
                .submit(WorkItem::Signal {
                    user_id: *user_id,
                    signal: signal.clone(),
                })
                .await?;
        }
        log::info!(
            "Signal {} {} fanned out to {} users",
            signal.side.as_str(),
            signal.symbol,
            users.len()
        );
        Ok(users.len())
    }

    pub async fn submit_task(&self, item: WorkItem) -> Result<()> {
        self.dispatcher.submit(item).await
    }

    pub async fn handle_signal_for_user(
        &self,
        user_id: UserId,
        signal: &Signal,
    ) -> Result<SignalOutcome> {
        self.orchestrator.handle_signal(user_id, signal).await
    }

    /// 手动平仓，与同交易对的信号处理互斥
    pub async fn close_position(
        &self,
        user_id: UserId,
        position_id: PositionId,
    ) -> Result<CloseOutcome> {
        let position = self.store.get_user_position(user_id, position_id)?;
        let _guard = self.locks.acquire(user_id, &position.symbol).await;
        retry_with_backoff(&self.config.retry, "close position", || {
            self.closer.close(&position)
        })
        .await
    }

    pub async fn set_stop(
        &self,
        user_id: UserId,
        position_id: PositionId,
        stop_price: Option<Decimal>,
    ) -> Result<Position> {
        let position = self.store.get_user_position(user_id, position_id)?;
        let _guard = self.locks.acquire(user_id, &position.symbol).await;
        self.risk.set_stop(user_id, position_id, stop_price).await
    }

    pub async fn set_targets(
        &self,
        user_id: UserId,
        position_id: PositionId,
        ladder: &[LadderStep],
    ) -> Result<Vec<ProfitLeg>> {
        let position = self.store.get_user_position(user_id, position_id)?;
        let _guard = self.locks.acquire(user_id, &position.symbol).await;
        self.risk.set_targets(user_id, position_id, ladder).await
    }

    pub fn set_ignore_opposite_signal(
        &self,
        user_id: UserId,
        position_id: PositionId,
        ignore: bool,
    ) -> Result<Position> {
        let position = self
            .store
            .set_ignore_opposite_signal(user_id, position_id, ignore)?;
        log::info!(
            "Position {} ignore_opposite_signal set to {}",
            position_id,
            ignore
        );
        Ok(position)
    }

    /// 立即对单个持仓对账
    pub async fn refresh_position(
        &self,
        user_id: UserId,
        position_id: PositionId,
    ) -> Result<ReconcileReport> {
        self.reconciler
            .reconcile_position(user_id, position_id)
            .await
    }

    /// 把单个持仓的对账放入队列
    pub async fn request_refresh(&self, user_id: UserId, position_id: PositionId) -> Result<()> {
        self.store.get_user_position(user_id, position_id)?;
        self.dispatcher
            .submit(WorkItem::ReconcilePosition {
                user_id,
                position_id,
            })
            .await
    }

    pub async fn reconcile_all(&self) -> Result<ReconcileReport> {
        self.reconciler.reconcile_all().await
    }

    /// 用户全部持仓，新的在前
    pub fn positions(&self, user_id: UserId) -> Result<Vec<Position>> {
        self.store.list_user_positions(user_id)
    }

    pub fn position_legs(&self, user_id: UserId, position_id: PositionId) -> Result<Vec<ProfitLeg>> {
        self.store.get_user_position(user_id, position_id)?;
        self.store.get_legs(position_id)
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.dispatcher.shutdown().await;
        log::info!("Trading engine stopped");
    }
}
