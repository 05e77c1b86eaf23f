//! B3 头部编解码
//!
//! 在 `http::HeaderMap`（按HTTP语义对头部名大小写不敏感）和追踪上下文
//! 之间做双向转换。头部缺失不是错误：提取失败时由调用方建立根上下文。

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::trace_context::TraceContext;
use crate::{PARENT_SPAN_ID_HEADER, SPAN_ID_HEADER, TRACE_ID_HEADER};

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 从入站头部提取追踪上下文
///
/// traceId 和 spanId 头部同时存在时才视为携带了追踪信息，
/// 三个值按原样保留；parentSpanId 缺失时取空字符串。
///
/// # 返回
/// 头部携带追踪信息时返回Some，否则返回None
pub fn extract_context(headers: &HeaderMap) -> Option<TraceContext> {
    let trace_id = header_str(headers, TRACE_ID_HEADER)?;
    let span_id = header_str(headers, SPAN_ID_HEADER)?;
    let parent_span_id = header_str(headers, PARENT_SPAN_ID_HEADER).unwrap_or("");

    Some(TraceContext::from_ids(trace_id, span_id, parent_span_id))
}

/// 从入站头部派生追踪上下文
///
/// 头部携带追踪信息时复用，否则建立新的根上下文。
pub fn derive_context(headers: &HeaderMap) -> TraceContext {
    extract_context(headers).unwrap_or_else(TraceContext::new_root)
}

/// 把追踪上下文写入出站头部
///
/// traceId 和 spanId 都非空时恰好写入三个 `X-B3-*` 头部，否则什么都不写。
/// 无法表示为合法头部值的字段被跳过，本函数不产生错误。
pub fn inject_context(ctx: &TraceContext, headers: &mut HeaderMap) {
    if ctx.trace_id().is_empty() || ctx.span_id().is_empty() {
        return;
    }
    let pairs = [
        (TRACE_ID_HEADER, ctx.trace_id()),
        (SPAN_ID_HEADER, ctx.span_id()),
        (PARENT_SPAN_ID_HEADER, ctx.parent_span_id()),
    ];
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}
