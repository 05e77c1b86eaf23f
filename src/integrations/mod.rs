//! 框架集成
//!
//! 服务端（Axum中间件）和客户端（Reqwest拦截器）各自按feature开关编译。

#[cfg(feature = "axum")]
pub mod axum;
#[cfg(feature = "reqwest")]
pub mod reqwest;
