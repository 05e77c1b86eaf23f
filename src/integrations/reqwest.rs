//! Reqwest客户端的追踪拦截器
//!
//! 包装 `reqwest::Client`：发出请求前从任务级上下文读取当前追踪三元组
//! 并盖到 `X-B3-*` 头部，记录请求日志；收到响应后读回头部里的三元组
//! （远端重派生的值优先于发出时的值）、计算耗时并按状态码级别记录
//! 响应日志。网络错误原样上抛，非2xx状态只记日志、不转成错误。

use std::sync::Arc;
use std::time::Instant;

use http::HeaderMap;
use reqwest::{Client, Request, RequestBuilder, StatusCode, Url};
use serde_json::Value;

use crate::context::current_trace_context;
use crate::error::RemoteError;
use crate::event::{format_event, level_for_status, EventFormatter, EventKind, LogEvent};
use crate::headers;
use crate::sink::{LogSink, TracingSink};
use crate::trace_context::TraceContext;
use crate::{PARENT_SPAN_ID_HEADER, SPAN_ID_HEADER, TRACE_ID_HEADER};

/// 追踪客户端的构造器
pub struct ClientBuilder {
    remote_service_name: String,
    ip: String,
    client: Client,
    sink: Arc<dyn LogSink>,
    request_log: Option<EventFormatter>,
    response_log: Option<EventFormatter>,
}

impl ClientBuilder {
    /// 设置本机IP，输出在请求日志的来源行里
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// 使用预先配置好的 `reqwest::Client`（超时、代理等透传选项）
    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// 注入自定义日志槽，默认委托给 `tracing`
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 提供请求日志的渲染钩子，替代默认格式化器
    pub fn request_log<F>(mut self, f: F) -> Self
    where
        F: Fn(&LogEvent) -> String + Send + Sync + 'static,
    {
        self.request_log = Some(Arc::new(f));
        self
    }

    /// 提供响应日志的渲染钩子，替代默认格式化器
    pub fn response_log<F>(mut self, f: F) -> Self
    where
        F: Fn(&LogEvent) -> String + Send + Sync + 'static,
    {
        self.response_log = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> TracedClient {
        TracedClient {
            remote_service_name: self.remote_service_name,
            ip: self.ip,
            inner: self.client,
            sink: self.sink,
            request_log: self.request_log,
            response_log: self.response_log,
        }
    }
}

/// 带追踪拦截的HTTP客户端
///
/// 每次调用都独立执行一遍"盖头部、记请求、发送、读回头部、记响应"
/// 的流程；拦截逻辑自身不产生错误。
pub struct TracedClient {
    inner: Client,
    remote_service_name: String,
    ip: String,
    sink: Arc<dyn LogSink>,
    request_log: Option<EventFormatter>,
    response_log: Option<EventFormatter>,
}

impl TracedClient {
    /// 以默认配置创建客户端
    ///
    /// # 参数
    /// * `remote_service_name` - 远端服务名，输出在日志的方向标注里
    pub fn new(remote_service_name: impl Into<String>) -> Self {
        Self::builder(remote_service_name).build()
    }

    pub fn builder(remote_service_name: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            remote_service_name: remote_service_name.into(),
            ip: String::new(),
            client: Client::new(),
            sink: Arc::new(TracingSink),
            request_log: None,
            response_log: None,
        }
    }

    /// 底层的 `reqwest::Client`，用于构造请求
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// 构建并发送一个请求
    pub async fn send(&self, builder: RequestBuilder) -> reqwest::Result<TracedResponse> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// 发送一个已构建的请求
    ///
    /// 当前任务存在追踪上下文时把三元组盖到出站头部；上下文缺失时
    /// 不写头部，属于正常情况。网络层错误原样返回，本层不重试。
    pub async fn execute(&self, mut request: Request) -> reqwest::Result<TracedResponse> {
        let ctx = current_trace_context();
        if let Some(ctx) = &ctx {
            headers::inject_context(ctx, request.headers_mut());
        }
        let start = Instant::now();

        let method = request.method().as_str().to_uppercase();
        let url = request.url().to_string();
        let path = request.url().path().to_string();
        let query = query_value(request.url());
        let data = request
            .body()
            .and_then(|body| body.as_bytes())
            .and_then(|bytes| serde_json::from_slice::<Value>(bytes).ok());

        let (trace_id, span_id, parent_span_id) = ambient_triple(ctx.as_ref());
        let request_event = LogEvent {
            kind: EventKind::Request,
            service_name: self.remote_service_name.clone(),
            peer: self.remote_service_name.clone(),
            trace_id,
            span_id,
            parent_span_id,
            method: method.clone(),
            url,
            ip: self.ip.clone(),
            host: request.url().host_str().unwrap_or_default().to_string(),
            query,
            data,
            ..Default::default()
        };
        let message = match &self.request_log {
            Some(render) => render(&request_event),
            None => format_event(&request_event),
        };
        self.sink.info(&message);

        let response = self.inner.execute(request).await?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let response_url = response.url().clone();
        let content_type = response_headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        // 远端框架可能重新派生了自己的跨度：响应头部携带的三元组
        // 优先于发出时的值，头部缺失的字段回退到发出时的值
        let (trace_id, span_id, parent_span_id) =
            reconcile_triple(&response_headers, ctx.as_ref());

        let response_event = LogEvent {
            kind: EventKind::Response,
            service_name: self.remote_service_name.clone(),
            peer: self.remote_service_name.clone(),
            trace_id,
            span_id,
            parent_span_id,
            method,
            url: path,
            ip: self.ip.clone(),
            host: response_url.host_str().unwrap_or_default().to_string(),
            status: Some(status.as_u16()),
            content_type,
            data: body_value(&body, response_headers.get(http::header::CONTENT_TYPE)),
            time: Some(start.elapsed()),
            ..Default::default()
        };
        let message = match &self.response_log {
            Some(render) => render(&response_event),
            None => format_event(&response_event),
        };
        self.sink
            .log(level_for_status(status.as_u16()), &message);

        Ok(TracedResponse {
            status,
            headers: response_headers,
            url: response_url,
            body,
        })
    }
}

/// 已缓冲的出站调用响应
///
/// 响应体在拦截器里读完用于记日志，这里按值持有。
#[derive(Debug, Clone)]
pub struct TracedResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Vec<u8>,
}

impl TracedResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// 响应体的文本形式
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 把响应体反序列化为JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// 非2xx状态转换为 [`RemoteError`]
    ///
    /// 拦截器自己不做这个转换；调用方需要把上游失败当错误处理时
    /// 显式调用，错误消息取上游响应体的 `message` 字段。
    pub fn error_for_status(self) -> Result<Self, RemoteError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let message = serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));
        Err(RemoteError::new(self.status.as_u16(), message))
    }
}

/// 当前任务的三元组，上下文缺失时全部为空字符串
fn ambient_triple(ctx: Option<&TraceContext>) -> (String, String, String) {
    match ctx {
        Some(ctx) => (
            ctx.trace_id().to_string(),
            ctx.span_id().to_string(),
            ctx.parent_span_id().to_string(),
        ),
        None => (String::new(), String::new(), String::new()),
    }
}

/// 响应头部携带的三元组优先，缺失字段回退到发出时的值
fn reconcile_triple(headers: &HeaderMap, sent: Option<&TraceContext>) -> (String, String, String) {
    let fallback = ambient_triple(sent);
    let pick = |name: &str, fallback: String| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or(fallback)
    };
    (
        pick(TRACE_ID_HEADER, fallback.0),
        pick(SPAN_ID_HEADER, fallback.1),
        pick(PARENT_SPAN_ID_HEADER, fallback.2),
    )
}

fn query_value(url: &Url) -> Option<Value> {
    let mut map = serde_json::Map::new();
    for (key, value) in url.query_pairs() {
        map.insert(key.into_owned(), Value::String(value.into_owned()));
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

/// 响应体负载：JSON解析优先，纯文本按字符串记录，其余不记
fn body_value(body: &[u8], content_type: Option<&http::HeaderValue>) -> Option<Value> {
    let kind = content_type.and_then(|v| v.to_str().ok()).unwrap_or("");
    if kind.starts_with("application/json") {
        serde_json::from_slice(body).ok()
    } else if kind.starts_with("text/plain") {
        std::str::from_utf8(body)
            .ok()
            .map(|s| Value::String(s.to_string()))
    } else {
        None
    }
}
