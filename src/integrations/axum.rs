//! Axum框架的追踪中间件
//!
//! 放在服务端管道最前面，为整个请求生命周期建立追踪上下文：
//! 从入站头部派生（或新建）B3三元组，挂到请求扩展和任务级上下文，
//! 输出请求/响应日志（可被忽略规则排除、可被调用方钩子接管），
//! 并在响应上写回三个 `X-B3-*` 头部。

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::{
    body::{to_bytes, Body},
    extract::{FromRequestParts, MatchedPath, Request},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tower::{Layer, Service};
use tracing::Instrument;

use crate::context;
use crate::error::RemoteError;
use crate::event::{format_event, level_for_status, EventFormatter, EventKind, LogEvent, LogLevel};
use crate::headers;
use crate::ignore::{should_ignore, IgnoreSubject, Matcher};
use crate::sink::{LogSink, ScopedLogger, TracingSink};
use crate::trace_context::TraceContext;

/// 服务端日志里对端的固定名称
const CLIENT_PEER: &str = "客户端";

/// 为记录日志而缓冲的请求/响应体大小上限
const BODY_LOG_LIMIT: usize = 256 * 1024;

/// 中间件配置
///
/// 构造时确定一次，同一实例处理的所有请求只读共享。
#[derive(Clone)]
struct TraceConfig {
    service_name: String,
    port: u16,
    ignore: Vec<Matcher>,
    request_log: Option<EventFormatter>,
    response_log: Option<EventFormatter>,
    set_head: bool,
    sink: Arc<dyn LogSink>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            port: 0,
            ignore: Vec::new(),
            request_log: None,
            response_log: None,
            set_head: true,
            sink: Arc::new(TracingSink),
        }
    }
}

/// 追踪中间件层
///
/// 通过builder方法配置，`layer`时配置冻结为只读。
#[derive(Clone, Default)]
pub struct TraceLayer {
    config: TraceConfig,
}

impl TraceLayer {
    /// 创建新的追踪层，使用默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置服务名，输出在日志首行的标识段里
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// 设置服务端口，输出在请求span的字段里
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// 追加一条忽略规则
    ///
    /// 单条规则等价于只含一个元素的规则列表。
    pub fn ignore(mut self, matcher: impl Into<Matcher>) -> Self {
        self.config.ignore.push(matcher.into());
        self
    }

    /// 追加一条谓词形式的忽略规则
    pub fn ignore_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&IgnoreSubject<'_>) -> bool + Send + Sync + 'static,
    {
        self.config.ignore.push(Matcher::predicate(f));
        self
    }

    /// 提供请求日志的渲染钩子，替代默认格式化器
    pub fn request_log<F>(mut self, f: F) -> Self
    where
        F: Fn(&LogEvent) -> String + Send + Sync + 'static,
    {
        self.config.request_log = Some(Arc::new(f));
        self
    }

    /// 提供响应日志的渲染钩子，替代默认格式化器
    pub fn response_log<F>(mut self, f: F) -> Self
    where
        F: Fn(&LogEvent) -> String + Send + Sync + 'static,
    {
        self.config.response_log = Some(Arc::new(f));
        self
    }

    /// 是否在响应上写回 `X-B3-*` 头部（默认写回）
    pub fn set_head(mut self, enabled: bool) -> Self {
        self.config.set_head = enabled;
        self
    }

    /// 注入自定义日志槽，默认委托给 `tracing`
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.config.sink = sink;
        self
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            config: Arc::new(self.config.clone()),
        }
    }
}

/// 请求扩展里的只读请求画像
///
/// 中间件在进入时写入一次，处理器只能读取。
#[derive(Debug, Clone)]
pub struct RequestInfo {
    path: String,
    method: String,
    host: String,
}

impl RequestInfo {
    /// 解析后的请求路径
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 大写的请求方法
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 请求目标主机
    pub fn host(&self) -> &str {
        &self.host
    }
}

/// 追踪中间件服务
#[derive(Clone)]
pub struct TraceService<S> {
    inner: S,
    config: Arc<TraceConfig>,
}

impl<S> Service<Request> for TraceService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let config = self.config.clone();

        // 从入站头部派生追踪上下文（缺失时新建根上下文）
        let ctx = headers::derive_context(req.headers());

        let method = req.method().as_str().to_uppercase();
        let path = req.uri().path().to_string();
        let query = req.uri().query().and_then(parse_query);
        let ip = client_ip(&req);
        let host = request_host(&req);
        // 路由层暴露的匹配路径优先于原始路径（作为route_layer使用时可用）
        let matched_path = req
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string());

        let ignored = should_ignore(
            &config.ignore,
            &IgnoreSubject {
                path: &path,
                method: &method,
                ip: &ip,
                host: &host,
            },
        );

        // 挂到请求扩展：上下文、请求画像、范围日志门面
        req.extensions_mut().insert(ctx.clone());
        req.extensions_mut().insert(RequestInfo {
            path: path.clone(),
            method: method.clone(),
            host: host.clone(),
        });
        req.extensions_mut()
            .insert(ScopedLogger::new(ctx.clone(), config.sink.clone()));

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (req, data) = if ignored {
                (req, None)
            } else {
                buffer_request_body(req).await
            };

            if !ignored {
                let event = LogEvent {
                    kind: EventKind::Request,
                    service_name: config.service_name.clone(),
                    peer: CLIENT_PEER.to_string(),
                    trace_id: ctx.trace_id().to_string(),
                    span_id: ctx.span_id().to_string(),
                    parent_span_id: ctx.parent_span_id().to_string(),
                    method: method.clone(),
                    url: path.clone(),
                    ip: ip.clone(),
                    host: host.clone(),
                    query,
                    data,
                    ..Default::default()
                };
                let message = match &config.request_log {
                    Some(render) => render(&event),
                    None => format_event(&event),
                };
                config.sink.info(&message);
            }

            let span = tracing::info_span!(
                "request",
                trace_id = %ctx.trace_id(),
                method = %method,
                path = %path,
                port = config.port,
            );
            let result = context::with_trace_context(ctx.clone(), inner.call(req))
                .instrument(span)
                .await;

            // 成功与失败汇合到同一条响应记录路径；错误只观察不吞掉
            match result {
                Ok(response) => {
                    let (mut response, data) = if ignored {
                        (response, None)
                    } else {
                        buffer_response_body(response).await
                    };
                    let status = response.status().as_u16();

                    if !ignored {
                        let event = LogEvent {
                            kind: EventKind::Response,
                            service_name: config.service_name.clone(),
                            peer: CLIENT_PEER.to_string(),
                            trace_id: ctx.trace_id().to_string(),
                            span_id: ctx.span_id().to_string(),
                            parent_span_id: ctx.parent_span_id().to_string(),
                            method,
                            url: matched_path.unwrap_or(path),
                            ip,
                            host,
                            status: Some(status),
                            content_type: content_type_of(response.headers()),
                            data,
                            time: Some(ctx.elapsed()),
                            ..Default::default()
                        };
                        let message = match &config.response_log {
                            Some(render) => render(&event),
                            None => format_event(&event),
                        };
                        config.sink.log(level_for_status(status), &message);
                    }

                    if config.set_head {
                        headers::inject_context(&ctx, response.headers_mut());
                    }
                    Ok(response)
                }
                Err(err) => {
                    if !ignored {
                        let event = LogEvent {
                            kind: EventKind::Response,
                            service_name: config.service_name.clone(),
                            peer: CLIENT_PEER.to_string(),
                            trace_id: ctx.trace_id().to_string(),
                            span_id: ctx.span_id().to_string(),
                            parent_span_id: ctx.parent_span_id().to_string(),
                            method,
                            url: matched_path.unwrap_or(path),
                            ip,
                            host,
                            status: Some(500),
                            data: Some(Value::String(err.to_string())),
                            time: Some(ctx.elapsed()),
                            ..Default::default()
                        };
                        let message = match &config.response_log {
                            Some(render) => render(&event),
                            None => format_event(&event),
                        };
                        config.sink.log(LogLevel::Error, &message);
                    }
                    Err(err)
                }
            }
        })
    }
}

/// 解析查询字符串为JSON对象，空查询返回None
fn parse_query(query: &str) -> Option<Value> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    if pairs.is_empty() {
        return None;
    }
    let mut map = serde_json::Map::new();
    for (key, value) in pairs {
        map.insert(key, Value::String(value));
    }
    Some(Value::Object(map))
}

/// 客户端IP：优先 X-Forwarded-For 的第一跳，其次连接信息
fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default()
}

/// 请求目标主机：Host头部，其次URI里的host
fn request_host(req: &Request) -> String {
    req.headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
        .unwrap_or_default()
}

fn content_type_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// 缓冲JSON请求体用于日志，并原样重建请求
///
/// 非JSON请求体不读取；读取失败时降级为空体、负载记为缺失。
async fn buffer_request_body(req: Request) -> (Request, Option<Value>) {
    let is_json = content_type_of(req.headers())
        .map(|t| t.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return (req, None);
    }

    let (parts, body) = req.into_parts();
    match to_bytes(body, BODY_LOG_LIMIT).await {
        Ok(bytes) => {
            let data = serde_json::from_slice::<Value>(&bytes).ok();
            (Request::from_parts(parts, Body::from(bytes)), data)
        }
        Err(_) => (Request::from_parts(parts, Body::empty()), None),
    }
}

/// 缓冲JSON/纯文本响应体用于日志，并原样重建响应
async fn buffer_response_body(res: Response) -> (Response, Option<Value>) {
    let content_type = content_type_of(res.headers());
    let kind = content_type.as_deref().unwrap_or("");
    let is_json = kind.starts_with("application/json");
    let is_text = kind.starts_with("text/plain");
    if !is_json && !is_text {
        return (res, None);
    }

    let (parts, body) = res.into_parts();
    match to_bytes(body, BODY_LOG_LIMIT).await {
        Ok(bytes) => {
            let data = if is_json {
                serde_json::from_slice::<Value>(&bytes).ok()
            } else {
                std::str::from_utf8(&bytes)
                    .ok()
                    .map(|s| Value::String(s.to_string()))
            };
            (Response::from_parts(parts, Body::from(bytes)), data)
        }
        Err(_) => (Response::from_parts(parts, Body::empty()), None),
    }
}

/// 便捷错误响应助手
///
/// 记录错误（可抑制），状态码取嵌套出站调用还原的上游状态，
/// 否则取调用方给的默认值；响应体为JSON的 `{"message": ...}`，
/// 消息依次取显式消息、上游错误体消息、错误自身文本、通用兜底。
pub fn error_reply(
    logger: &ScopedLogger,
    error: &(dyn std::error::Error + 'static),
    default_status: StatusCode,
    message: Option<&str>,
    print: bool,
) -> Response {
    if print {
        logger.error(&error.to_string());
    }

    let remote = error.downcast_ref::<RemoteError>();
    let status = remote
        .and_then(|r| StatusCode::from_u16(r.status).ok())
        .unwrap_or(default_status);
    let message = message
        .map(str::to_string)
        .or_else(|| remote.and_then(|r| r.message.clone()))
        .unwrap_or_else(|| {
            let text = error.to_string();
            if text.is_empty() {
                "系统错误".to_string()
            } else {
                text
            }
        });

    (status, Json(json!({ "message": message }))).into_response()
}

// -- Extractors --

/// Axum 提取器，用于在 handler 函数签名中直接获取追踪上下文
///
/// 中间件已把上下文放进请求扩展；扩展缺失时回退到任务级上下文，
/// 因此这个提取器永远不会失败。
impl<S> FromRequestParts<S> for TraceContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<TraceContext>()
            .cloned()
            .unwrap_or_else(context::get_trace_context))
    }
}

/// Axum 提取器，用于在 handler 函数签名中直接获取范围日志门面
impl<S> FromRequestParts<S> for ScopedLogger
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ScopedLogger>()
            .cloned()
            .unwrap_or_else(|| {
                ScopedLogger::new(context::get_trace_context(), Arc::new(TracingSink))
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let parsed = parse_query("page=1&size=20").unwrap();
        assert_eq!(parsed["page"], "1");
        assert_eq!(parsed["size"], "20");

        assert!(parse_query("").is_none());
    }

    #[test]
    fn test_request_host_prefers_host_header() {
        let req = Request::builder()
            .uri("http://uri-host/orders")
            .header("host", "header-host")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&req), "header-host");

        let req = Request::builder()
            .uri("http://uri-host/orders")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&req), "uri-host");
    }

    #[test]
    fn test_client_ip_from_forwarded_header() {
        let req = Request::builder()
            .uri("/orders")
            .header("x-forwarded-for", "10.1.2.3, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "10.1.2.3");

        let req = Request::builder()
            .uri("/orders")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "");
    }

    #[tokio::test]
    async fn test_buffer_request_body_json_only() {
        let req = Request::builder()
            .method("POST")
            .uri("/orders")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"bear"}"#))
            .unwrap();
        let (req, data) = buffer_request_body(req).await;
        assert_eq!(data.unwrap()["name"], "bear");

        // 请求体应原样重建
        let bytes = to_bytes(req.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"name":"bear"}"#);

        // 非JSON请求体不读取
        let req = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "application/octet-stream")
            .body(Body::from("binary"))
            .unwrap();
        let (_req, data) = buffer_request_body(req).await;
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_buffer_response_body_text_plain() {
        let res = Response::builder()
            .status(200)
            .header("content-type", "text/plain; charset=utf-8")
            .body(Body::from("pong"))
            .unwrap();
        let (res, data) = buffer_response_body(res).await;
        assert_eq!(data.unwrap(), Value::String("pong".to_string()));

        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");
    }

    #[test]
    fn test_error_reply_uses_remote_status() {
        let logger = ScopedLogger::new(
            TraceContext::from_ids("t", "s", ""),
            Arc::new(TracingSink),
        );
        let err = RemoteError::new(502, Some("upstream down".into()));
        let response = error_reply(&logger, &err, StatusCode::INTERNAL_SERVER_ERROR, None, false);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_reply_default_status() {
        let logger = ScopedLogger::new(
            TraceContext::from_ids("t", "s", ""),
            Arc::new(TracingSink),
        );
        let err = std::io::Error::new(std::io::ErrorKind::Other, "db unreachable");
        let response = error_reply(
            &logger,
            &err,
            StatusCode::INTERNAL_SERVER_ERROR,
            Some("请稍后重试"),
            false,
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
