//! B3 链路追踪与请求/响应日志模块
//!
//! 专注于 B3 追踪上下文（traceId / spanId / parentSpanId）的生成、传递和管理，
//! 并为每一次入站请求和出站调用输出结构化的请求/响应日志。
//! 核心功能与 Web 框架无关，并为 Axum（服务端中间件）和 Reqwest（客户端拦截器）
//! 提供了开箱即用的集成支持。
//!
//! ## Usage
//!
//! ### 基础用法：建立和读取追踪上下文
//! ```
//! use trace_b3::TraceContext;
//!
//! // 为一次新请求建立根上下文（traceId == spanId，parentSpanId 为空）
//! let ctx = TraceContext::new_root();
//! assert_eq!(ctx.trace_id(), ctx.span_id());
//! assert!(ctx.parent_span_id().is_empty());
//! ```
//!
//! ### Axum 集成（需要启用 axum feature）
//! ```ignore
//! use axum::{routing::get, Router};
//! use trace_b3::{TraceContext, TraceLayer};
//!
//! async fn handler(ctx: TraceContext) -> String {
//!     format!("traceId: {}", ctx.trace_id())
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .route("/", get(handler))
//!         .layer(TraceLayer::new().service_name("demo"));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ### Reqwest 集成（需要启用 reqwest feature）
//! ```ignore
//! use trace_b3::TracedClient;
//!
//! let client = TracedClient::builder("order-service").build();
//! // 在追踪上下文内发起的调用会自动携带 X-B3-* 头部
//! let resp = client.send(client.inner().get("http://orders/list")).await?;
//! ```

mod context;
mod event;
mod headers;
mod id;
mod ignore;
mod sink;
mod trace_context;

pub mod error;

pub use context::{current_trace_context, get_trace_context, with_trace_context};
pub use error::RemoteError;
pub use event::{
    format_event, format_payload, level_for_status, EventFormatter, EventKind, LogEvent, LogLevel,
};
pub use headers::{derive_context, extract_context, inject_context};
pub use ignore::{should_ignore, IgnoreSubject, Matcher};
pub use sink::{LogSink, ScopedLogger, TracingSink};
pub use trace_context::TraceContext;

/// HTTP 头部中的追踪ID字段名
pub const TRACE_ID_HEADER: &str = "X-B3-TraceId";
/// HTTP 头部中的跨度ID字段名
pub const SPAN_ID_HEADER: &str = "X-B3-SpanId";
/// HTTP 头部中的父跨度ID字段名
pub const PARENT_SPAN_ID_HEADER: &str = "X-B3-ParentSpanId";

// -- framework integrations --
#[cfg(any(feature = "axum", feature = "reqwest"))]
mod integrations;
#[cfg(feature = "axum")]
pub use integrations::axum::{error_reply, RequestInfo, TraceLayer, TraceService};
#[cfg(feature = "reqwest")]
pub use integrations::reqwest::{ClientBuilder, TracedClient, TracedResponse};
