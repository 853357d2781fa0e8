//! 可观测性：tracing 订阅器初始化（只在二进制 / 测试入口调用，库代码从不安装订阅器）

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装 EnvFilter（默认 info，可用 RUST_LOG 覆盖）与 fmt 输出层；重复调用时返回 false
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
