//! 共享库
//!
//! 包含过滤引擎与投递缓存共用的配置加载和可观测性初始化代码。

pub mod config;
pub mod observability;
