//! 日志初始化

use tracing_subscriber::EnvFilter;

/// 初始化 tracing 订阅器
///
/// 过滤级别通过 `RUST_LOG` 控制，默认 `info`。
/// 重复调用安全（后续调用为 no-op）。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
