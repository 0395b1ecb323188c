//! 日志初始化
//!
//! 安装 `tracing-subscriber` fmt 订阅者，并通过 `tracing-log` 桥接 `log` 记录。

use tracing_subscriber::EnvFilter;

/// 未设置 `RUST_LOG` 时使用的过滤规则
pub const DEFAULT_FILTER: &str = "roomba=info";

/// 初始化日志（默认过滤 `roomba=info`，可被 `RUST_LOG` 覆盖）
///
/// 返回 `true` 表示本次调用完成了安装；重复调用或已有全局订阅者时返回 `false`。
pub fn init_logger() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter)
}

/// 使用指定过滤规则初始化日志（忽略 `RUST_LOG`）
pub fn init_logger_with_filter(directives: &str) -> bool {
    install(EnvFilter::new(directives))
}

fn install(filter: EnvFilter) -> bool {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }

    // 依赖 crate 通过 log 输出的记录转发到 tracing
    let _ = tracing_log::LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();
    true
}
