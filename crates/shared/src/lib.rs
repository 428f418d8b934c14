//! 共享库
//!
//! 包含规则引擎及其宿主进程共用的配置、错误处理、领域事件、可观测性等基础设施代码。

pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod test_utils;
