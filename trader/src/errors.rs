use db::DBError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradeError {
    /// 参数不合法，不重试，且不会发出任何远程调用
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    /// 网络、超时、限频等临时性网关错误，可退避重试
    #[error("Gateway error: {message}")]
    GatewayError { message: String },

    /// 交易所明确拒绝（余额不足、非法订单等），不重试
    #[error("Gateway rejected request: {message}")]
    GatewayRejected { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Store error: {message}")]
    StoreError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl TradeError {
    pub fn validation(message: impl Into<String>) -> Self {
        TradeError::ValidationError {
            message: message.into(),
        }
    }

    pub fn gateway(message: impl Into<String>) -> Self {
        TradeError::GatewayError {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        TradeError::NotFound {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TradeError::GatewayError { .. })
    }
}

impl From<DBError> for TradeError {
    fn from(e: DBError) -> Self {
        TradeError::StoreError {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TradeError>;
