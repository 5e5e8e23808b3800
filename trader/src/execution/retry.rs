use crate::{config::RetryConfig, errors::Result};
use std::future::Future;

/// 仅对临时性网关错误按指数退避重试，其它错误立即返回
pub async fn retry_with_backoff<T, F, Fut>(retry: &RetryConfig, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let backoff = retry.backoff(attempt);
                log::warn!(
                    "{} failed (attempt {}/{}), retry in {:?}: {}",
                    op_name,
                    attempt,
                    max_attempts,
                    backoff,
                    e
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                if e.is_transient() {
                    log::error!("{} failed after {} attempts: {}", op_name, attempt, e);
                }
                return Err(e);
            }
        }
    }
}
