//! 日志事件与默认格式化
//!
//! `LogEvent` 是一条请求或响应日志的瞬态载体，只在一次格式化/发送调用
//! 期间存在。默认格式化器输出固定的多行布局；调用方可以通过
//! requestLog/responseLog 覆盖钩子接管渲染。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// 调用方提供的事件渲染钩子
///
/// 配置时选定一次：提供了钩子就用它的返回文本替代默认布局，
/// 再按事件级别交给日志槽发送。
pub type EventFormatter = Arc<dyn Fn(&LogEvent) -> String + Send + Sync>;

/// 响应体日志的截断上限（字符数），超出部分替换为长度标注
const RESPONSE_DATA_LIMIT: usize = 500;

/// 事件方向：请求或响应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EventKind {
    #[default]
    Request,
    Response,
}

/// 日志输出级别
///
/// 与日志槽（sink）的四个方法一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// 根据响应状态码选择日志级别
///
/// 200 和 204 输出 info，其余一律 error（包括非HTTP惯例的状态值）。
pub fn level_for_status(status: u16) -> LogLevel {
    if matches!(status, 200 | 204) {
        LogLevel::Info
    } else {
        LogLevel::Error
    }
}

/// 一条请求/响应日志事件
///
/// 字段集合对覆盖钩子是稳定契约；事件本身不持久化。
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogEvent {
    pub kind: EventKind,
    /// 本服务名；出站事件里是远端服务名
    pub service_name: String,
    /// 对端名称：服务端日志为"客户端"，客户端日志为远端服务名
    pub peer: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub method: String,
    pub url: String,
    pub ip: String,
    pub host: String,
    pub query: Option<Value>,
    pub data: Option<Value>,
    pub params: Option<Value>,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub time: Option<Duration>,
}

/// 把一个负载渲染成日志片段
///
/// 负载缺失、为null或序列化结果是空映射时返回空字符串（连标签一起省略），
/// 否则返回 `"\n<标签>: <序列化文本>"`。序列化失败时回退到值自身的
/// 字符串形式，这条路径只降级、不上抛。
pub fn format_payload(value: Option<&Value>, label: &str) -> String {
    let value = match value {
        None | Some(Value::Null) => return String::new(),
        Some(v) => v,
    };
    if matches!(value, Value::Object(map) if map.is_empty()) {
        return String::new();
    }
    match serde_json::to_string(value) {
        Ok(text) => format!("\n{label}: {text}"),
        Err(_) => format!("\n{label}: {value}"),
    }
}

/// 截断过长的响应体日志片段
///
/// 超过500字符时保留前500字符并附加原始长度标注，上限不可配置。
fn truncate_payload(text: String) -> String {
    let len = text.chars().count();
    if len <= RESPONSE_DATA_LIMIT {
        return text;
    }
    let head: String = text.chars().take(RESPONSE_DATA_LIMIT).collect();
    format!("{head} <data长度为{len}，只保留500字符>")
}

/// 默认格式化器
///
/// 没有提供覆盖钩子时使用。请求事件输出来源行（from ip to host）
/// 和 query/data/params 负载段；响应事件输出耗时、状态和截断后的
/// 响应体负载段。末行标注方向（请求/响应）。
pub fn format_event(event: &LogEvent) -> String {
    let identity = format!(
        "[{},{},{},{}]",
        event.service_name, event.trace_id, event.span_id, event.parent_span_id
    );
    let method = event.method.to_uppercase();

    match event.kind {
        EventKind::Request => {
            format!(
                "{identity}\n{method} {url}\norigin: [from {ip} to {host}]{query}{data}{params}\nsource: {peer} 请求\n",
                url = event.url,
                ip = event.ip,
                host = event.host,
                query = format_payload(event.query.as_ref(), "query"),
                data = format_payload(event.data.as_ref(), "data"),
                params = format_payload(event.params.as_ref(), "params"),
                peer = event.peer,
            )
        }
        EventKind::Response => {
            let time_ms = event
                .time
                .unwrap_or(Duration::ZERO)
                .as_micros() as f64
                / 1000.0;
            format!(
                "{identity}\n{method} {url}\ntime: {time_ms}ms\nstatus: {status} <{content_type}>{data}\ndst: {peer} 响应\n",
                url = event.url,
                status = event.status.unwrap_or(0),
                content_type = event.content_type.as_deref().unwrap_or("undefined"),
                data = truncate_payload(format_payload(event.data.as_ref(), "data")),
                peer = event.peer,
            )
        }
    }
}
