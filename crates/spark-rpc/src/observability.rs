//! 日志订阅器的便捷安装入口。
//!
//! 本 crate 只通过 `tracing` 宏输出事件（target 为 `spark.rpc.server`、`spark.rpc.client`、
//! `spark.rpc.credentials`），不会主动安装订阅器。可执行程序若没有自己的订阅器，
//! 可调用 [`install_tracing`] 获得 `fmt + EnvFilter` 的默认组合。

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,

    #[error("failed to install tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] dispatcher::SetGlobalDefaultError),
}

/// 安装全局 `tracing` 订阅器。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 过滤规则取自 `RUST_LOG`，未设置或无法解析时使用 `info`；
/// - 进程内已存在全局订阅器时返回 [`TracingError::SubscriberAlreadySet`]，不会覆盖。
pub fn install_tracing() -> Result<(), TracingError> {
    if dispatcher::has_been_set() {
        return Err(TracingError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
