use crate::errors::{Result, TradeError};
use env_logger::Env;
use std::{fs::OpenOptions, io::Write};

/// 初始化全局日志，`log_file` 为空时输出到 stderr
///
/// 重复初始化返回错误而不是 panic。
pub fn init(log_file: Option<&str>, default_level: &str) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default_level));
    builder.format(|buf, record| {
        let ts = buf.timestamp();
        writeln!(buf, "{} [{}] - {}", ts, record.level(), record.args())
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TradeError::ConfigError {
                message: format!("failed to open log file {}: {}", path, e),
            })?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().map_err(|e| TradeError::ConfigError {
        message: format!("failed to init logger: {}", e),
    })?;
    log::info!(
        "logger initialised, writing to {}",
        log_file.unwrap_or("stderr")
    );
    Ok(())
}
