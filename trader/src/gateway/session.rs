use crate::{
    errors::Result,
    gateway::{CredentialProvider, ExchangeGateway, GatewayConnector},
    models::{MarketKind, UserId},
};
use std::sync::Arc;

/// 按用户凭证建立网关会话，每次操作独立持有
#[derive(Clone)]
pub struct SessionFactory {
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn GatewayConnector>,
}

impl SessionFactory {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn GatewayConnector>,
    ) -> Self {
        Self {
            credentials,
            connector,
        }
    }

    pub async fn open(&self, user_id: UserId, market: MarketKind) -> Result<Arc<dyn ExchangeGateway>> {
        let credential = self.credentials.get_active_credential(user_id).await?;
        self.connector.connect(market, &credential).await
    }
}
