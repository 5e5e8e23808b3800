use crate::{
    errors::{Result, TradeError},
    models::{Credential, UserId},
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 用户当前唯一启用的凭证，不存在时返回 NotFound
    async fn get_active_credential(&self, user_id: UserId) -> Result<Credential>;

    /// 拥有启用凭证的全部用户
    async fn list_active_users(&self) -> Result<Vec<UserId>>;
}

/// 内存凭证表，嵌入方可在启动时装载已解密的凭证
#[derive(Default)]
pub struct InMemoryCredentialProvider {
    credentials: RwLock<BTreeMap<UserId, (Credential, bool)>>,
}

impl InMemoryCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: UserId, credential: Credential) {
        self.credentials
            .write()
            .await
            .insert(user_id, (credential, true));
    }

    pub async fn set_active(&self, user_id: UserId, active: bool) -> Result<()> {
        let mut credentials = self.credentials.write().await;
        let entry = credentials.get_mut(&user_id).ok_or_else(|| {
            TradeError::not_found(format!("no credential for user {}", user_id))
        })?;
        entry.1 = active;
        Ok(())
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCredentialProvider {
    async fn get_active_credential(&self, user_id: UserId) -> Result<Credential> {
        let credentials = self.credentials.read().await;
        match credentials.get(&user_id) {
            Some((credential, true)) => Ok(credential.clone()),
            _ => Err(TradeError::not_found(format!(
                "no active credential for user {}",
                user_id
            ))),
        }
    }

    async fn list_active_users(&self) -> Result<Vec<UserId>> {
        let credentials = self.credentials.read().await;
        Ok(credentials
            .iter()
            .filter(|(_, (_, active))| *active)
            .map(|(user_id, _)| *user_id)
            .collect())
    }
}
