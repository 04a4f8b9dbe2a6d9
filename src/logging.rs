//! tracing 订阅器初始化

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// 安装全局 `fmt` 订阅器；`RUST_LOG` 优先于配置中的过滤器
///
/// 已经安装过订阅器时（测试、嵌入宿主）返回 `false`。
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(filter = %config.filter, json = config.json, "logging initialised");
    }
    installed
}
