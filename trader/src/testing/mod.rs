pub mod mock_gateway;
pub use mock_gateway::*;

use crate::{
    config::{EngineConfig, RetryConfig},
    execution::{EntryEngine, PositionCloser, Reconciler, RiskModifier},
    gateway::{InMemoryCredentialProvider, SessionFactory},
    models::{Credential, UserId},
    orchestrator::{SignalOrchestrator, SymbolLocks},
    store::PositionStore,
};
use std::sync::Arc;

pub const USER: UserId = 1;

/// 内存库 + MockGateway，用户 1 持有启用凭证，默认价格 100、余额 1000 USDT
pub struct Harness {
    pub config: Arc<EngineConfig>,
    pub gateway: Arc<MockGateway>,
    pub credentials: Arc<InMemoryCredentialProvider>,
    pub sessions: SessionFactory,
    pub store: PositionStore,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
        ..EngineConfig::default()
    }
}

pub async fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let gateway = Arc::new(MockGateway::new());
    let credentials = Arc::new(InMemoryCredentialProvider::new());
    credentials
        .insert(
            USER,
            Credential {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
            },
        )
        .await;
    let connector = Arc::new(MockConnector {
        gateway: gateway.clone(),
    });
    let sessions = SessionFactory::new(credentials.clone(), connector);
    let store = PositionStore::open(":memory:").unwrap();

    Harness {
        config: Arc::new(test_config()),
        gateway,
        credentials,
        sessions,
        store,
    }
}

impl Harness {
    pub fn entry_engine(&self) -> EntryEngine {
        EntryEngine::new(self.config.clone(), self.store.clone(), self.sessions.clone())
    }

    pub fn risk_modifier(&self) -> RiskModifier {
        RiskModifier::new(self.store.clone(), self.sessions.clone())
    }

    pub fn closer(&self) -> PositionCloser {
        PositionCloser::new(self.store.clone(), self.sessions.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.store.clone(), self.sessions.clone())
    }

    pub fn orchestrator(&self) -> SignalOrchestrator {
        SignalOrchestrator::new(
            self.config.clone(),
            self.store.clone(),
            SymbolLocks::new(),
            self.entry_engine(),
            self.closer(),
        )
    }
}
